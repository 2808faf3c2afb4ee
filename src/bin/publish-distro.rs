use archive_publisher::config::Config;
use archive_publisher::librarian::FilesystemBlobStore;
use archive_publisher::model::Suite;
use archive_publisher::orchestrator::{DistributionPublisher, PublishOptions};
use archive_publisher::publisher::CarefulModes;
use archive_publisher::signing::GpgSigner;
use archive_publisher::store::JsonPublicationStore;
use clap::Parser;

#[derive(Parser)]
struct Args {
    #[clap(long, env = "ARCHIVE_PUBLISHER_CONFIG", default_value = "publisher.json")]
    /// Path to configuration.
    config: std::path::PathBuf,

    #[clap(short, long, default_value = "ubuntu")]
    /// Distribution to publish.
    distribution: String,

    #[clap(short, long = "suite")]
    /// Only publish this suite. May be given more than once.
    suites: Vec<Suite>,

    #[clap(long = "archive")]
    /// Only publish this archive. May be given more than once.
    archives: Vec<String>,

    #[clap(short = 'C', long)]
    /// Republish everything: implies all other careful options.
    careful: bool,

    #[clap(long)]
    /// Re-copy files of already published publications.
    careful_publishing: bool,

    #[clap(long)]
    /// Regenerate indexes for every suite.
    careful_apt: bool,

    #[clap(long)]
    /// Rewrite every Release file.
    careful_release: bool,

    #[clap(long)]
    /// Only publish pending changes in security pockets.
    security_only: bool,

    #[clap(flatten)]
    logging: archive_publisher::logging::LoggingArgs,
}

#[tokio::main]
async fn main() -> Result<(), i32> {
    let args = Args::parse();

    args.logging.init();

    tracing::info!("Reading configuration");
    let config = Config::from_file(&args.config).map_err(|e| {
        tracing::error!("{}", e);
        1
    })?;

    let store = JsonPublicationStore::open(&config.store.publications).map_err(|e| {
        tracing::error!("Opening publication store: {}", e);
        1
    })?;
    let blobs = FilesystemBlobStore::new(&config.store.librarian_root);
    let signer = GpgSigner::new(config.signing.clone());

    let options = PublishOptions {
        suites: args.suites,
        archives: args.archives,
        careful: CarefulModes {
            publishing: args.careful || args.careful_publishing,
            apt: args.careful || args.careful_apt,
            release: args.careful || args.careful_release,
        },
        security_only: args.security_only,
    };

    let mut publisher = DistributionPublisher::new(
        &config,
        &args.distribution,
        &store,
        &blobs,
        Some(&signer),
        options,
    )
    .map_err(|e| {
        tracing::error!("{}", e);
        1
    })?;

    let reports = publisher.run().await.map_err(|e| {
        tracing::error!("{}", e);
        1
    })?;

    for (archive, report) in reports {
        tracing::info!(
            "{}: {} published, {} rejected, {} Release files written",
            archive,
            report.published,
            report.rejections.len(),
            report.released.len()
        );
    }
    Ok(())
}
