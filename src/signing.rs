//! Signing Release manifests.

use async_trait::async_trait;

use crate::config::GpgConfig;
use crate::error::{PublishError, PublishResult};
use crate::process::run_with_input;

#[async_trait]
pub trait Signer: Send + Sync {
    /// ASCII-armoured detached signature of `content`.
    async fn sign_detached(&self, key: &str, content: &[u8]) -> PublishResult<Vec<u8>>;

    /// Clear-signed copy of `content`.
    async fn sign_clear(&self, key: &str, content: &[u8]) -> PublishResult<Vec<u8>>;
}

/// Signs by running `gpg`.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    config: GpgConfig,
}

impl GpgSigner {
    pub fn new(config: GpgConfig) -> Self {
        Self { config }
    }

    fn args(&self, key: &str, mode: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(home) = &self.config.gpg_home {
            args.push("--homedir".to_string());
            args.push(home.display().to_string());
        }
        args.extend(
            [
                "--batch",
                "--no-tty",
                "--armor",
                "--digest-algo",
                "SHA512",
                "--local-user",
                key,
                mode,
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }

    async fn sign(&self, key: &str, mode: &str, content: &[u8]) -> PublishResult<Vec<u8>> {
        let (code, stdout, stderr) =
            run_with_input(&self.config.gpg, &self.args(key, mode), content).await?;
        if code != 0 {
            return Err(PublishError::Signing(format!(
                "{} {} exited with {}: {}",
                self.config.gpg,
                mode,
                code,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn sign_detached(&self, key: &str, content: &[u8]) -> PublishResult<Vec<u8>> {
        self.sign(key, "--detach-sign", content).await
    }

    async fn sign_clear(&self, key: &str, content: &[u8]) -> PublishResult<Vec<u8>> {
        self.sign(key, "--clearsign", content).await
    }
}
