use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use archive_publisher::config::Config;
use archive_publisher::librarian::MemoryBlobStore;
use archive_publisher::model::{Pocket, PublicationRef, PublishingStatus, Suite};
use archive_publisher::layout::ArchiveLayout;
use archive_publisher::orchestrator::{DistributionPublisher, PublishOptions};
use archive_publisher::publisher::{load_unfinished_suites, CarefulModes};
use archive_publisher::signing::Signer;
use archive_publisher::store::{MemoryPublicationStore, PublicationSet};
use archive_publisher::{ErrorKind, PublishResult};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

const SUITE: &str = "breezy-autotest";

fn config_json(root: &Path) -> serde_json::Value {
    json!({
        "archive_root": root.join("archive"),
        "distributions": [{
            "name": "ubuntutest",
            "displayname": "Ubuntu Test",
            "bugs_url": "https://bugs.example.com/ubuntutest",
            "series": [{
                "name": SUITE,
                "version": "6.6.6",
                "displayname": "Breezy Badger Autotest",
                "status": "development",
                "architectures": ["i386"],
                "components": ["main"],
                "index_compressors": ["none", "gzip"]
            }]
        }],
        "archives": [
            {"name": "primary", "distribution": "ubuntutest", "purpose": "primary"},
            {"name": "ppa", "distribution": "ubuntutest", "purpose": "ppa", "owner": "cprov"}
        ],
        "indexer": {"backend": "native"},
        "store": {
            "publications": root.join("publications.json"),
            "librarian_root": root.join("librarian")
        }
    })
}

fn parse(value: serde_json::Value) -> Config {
    value.to_string().parse().unwrap()
}

fn bar_source() -> serde_json::Value {
    json!({
        "id": 1, "archive": "primary", "series": SUITE, "pocket": "release",
        "component": "main", "section": "devel", "status": "pending",
        "name": "bar", "version": "1.0-1",
        "files": [{"filename": "bar_1.0-1.dsc", "blob_id": "bar-dsc"}]
    })
}

fn foo_binary() -> serde_json::Value {
    json!({
        "id": 2, "archive": "primary", "series": SUITE, "pocket": "release",
        "component": "main", "section": "base", "priority": "extra", "status": "pending",
        "name": "foo", "version": "666", "source_name": "foo", "source_version": "666",
        "arch_tag": "i386", "phased_update_percentage": 30,
        "summary": "Foo app is great", "description": "Well ...\nit does nothing, though",
        "file": {"filename": "foo_666_i386.deb", "blob_id": "foo-deb"}
    })
}

fn zoo_ppa_source() -> serde_json::Value {
    json!({
        "id": 3, "archive": "ppa", "series": SUITE, "pocket": "release",
        "component": "main", "section": "devel", "status": "pending",
        "name": "zoo", "version": "2",
        "files": [{"filename": "zoo_2.dsc", "blob_id": "zoo-dsc"}]
    })
}

fn openssl_security_source() -> serde_json::Value {
    json!({
        "id": 4, "archive": "primary", "series": SUITE, "pocket": "security",
        "component": "main", "section": "libs", "status": "pending",
        "name": "openssl", "version": "1.1",
        "files": [{"filename": "openssl_1.1.dsc", "blob_id": "openssl-dsc"}]
    })
}

fn store(sources: Vec<serde_json::Value>, binaries: Vec<serde_json::Value>) -> MemoryPublicationStore {
    let set: PublicationSet =
        serde_json::from_value(json!({"sources": sources, "binaries": binaries})).unwrap();
    MemoryPublicationStore::from_set(set)
}

fn blobs() -> MemoryBlobStore {
    let blobs = MemoryBlobStore::new();
    blobs.insert("bar-dsc", "Format: 3.0 (quilt)\nSource: bar\n");
    blobs.insert("foo-deb", "!<arch>\nfoo");
    blobs.insert("zoo-dsc", "Format: 3.0 (native)\nSource: zoo\n");
    blobs.insert("openssl-dsc", "Format: 3.0 (quilt)\nSource: openssl\n");
    blobs
}

fn primary_root(root: &Path) -> PathBuf {
    root.join("archive/ubuntutest")
}

fn live_suite(root: &Path) -> PathBuf {
    primary_root(root).join("dists").join(SUITE)
}

/// Every file below `dir` with its content.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    if !dir.exists() {
        return files;
    }
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            files.insert(
                entry.path().strip_prefix(dir).unwrap().to_path_buf(),
                fs::read(entry.path()).unwrap(),
            );
        }
    }
    files
}

async fn run(
    config: &Config,
    store: &MemoryPublicationStore,
    blobs: &MemoryBlobStore,
    signer: Option<&dyn Signer>,
    options: PublishOptions,
) -> PublishResult<Vec<(String, archive_publisher::publisher::PublishReport)>> {
    let mut publisher =
        DistributionPublisher::new(config, "ubuntutest", store, blobs, signer, options)?;
    publisher.run_until(std::future::pending::<()>()).await
}

struct FixedSigner;

#[async_trait]
impl Signer for FixedSigner {
    async fn sign_detached(&self, _key: &str, _content: &[u8]) -> PublishResult<Vec<u8>> {
        Ok(b"-----BEGIN PGP SIGNATURE-----\n".to_vec())
    }

    async fn sign_clear(&self, _key: &str, content: &[u8]) -> PublishResult<Vec<u8>> {
        let mut out = b"-----BEGIN PGP SIGNED MESSAGE-----\n".to_vec();
        out.extend_from_slice(content);
        Ok(out)
    }
}

/// Signals when asked to sign, then never returns.
struct StuckSigner {
    reached: Arc<Notify>,
}

#[async_trait]
impl Signer for StuckSigner {
    async fn sign_detached(&self, _key: &str, _content: &[u8]) -> PublishResult<Vec<u8>> {
        self.reached.notify_one();
        std::future::pending().await
    }

    async fn sign_clear(&self, _key: &str, _content: &[u8]) -> PublishResult<Vec<u8>> {
        self.reached.notify_one();
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_publish_then_rerun_is_noop() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let config = parse(config_json(root));
    let store = store(vec![bar_source(), zoo_ppa_source()], vec![foo_binary()]);
    let blobs = blobs();

    let reports = run(&config, &store, &blobs, None, PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].0, "primary");
    assert_eq!(reports[0].1.published, 2);
    assert_eq!(reports[1].1.published, 1);

    let suite_dir = live_suite(root);
    let sources = fs::read_to_string(suite_dir.join("main/source/Sources")).unwrap();
    assert!(sources.contains("Package: bar\n"));
    assert!(sources.contains("Directory: pool/main/b/bar\n"));
    let packages = fs::read_to_string(suite_dir.join("main/binary-i386/Packages")).unwrap();
    assert!(packages.contains("Package: foo\n"));
    assert!(packages.contains("Phased-Update-Percentage: 30\n"));
    let release = fs::read_to_string(suite_dir.join("Release")).unwrap();
    assert!(release.starts_with("Origin: Ubuntu Test\nLabel: Ubuntu Test\n"));
    assert!(release.contains(" main/binary-i386/Packages.gz\n"));
    assert!(!suite_dir.join("Release.gpg").exists());
    assert_eq!(
        fs::read(primary_root(root).join("pool/main/b/bar/bar_1.0-1.dsc")).unwrap(),
        b"Format: 3.0 (quilt)\nSource: bar\n"
    );
    assert!(!primary_root(root).join("dists.in-progress").exists());

    let ppa_release = fs::read_to_string(
        root.join("archive/ppa/cprov/ppa/ubuntutest/dists")
            .join(SUITE)
            .join("Release"),
    )
    .unwrap();
    assert!(ppa_release.starts_with("Origin: LP-PPA-cprov\nLabel: PPA for cprov\n"));
    assert!(ppa_release.contains("Components: main\n"));

    for publication in [
        PublicationRef::Source(1),
        PublicationRef::Binary(2),
        PublicationRef::Source(3),
    ] {
        assert_eq!(
            store.status(publication).unwrap(),
            Some(PublishingStatus::Published)
        );
    }

    let before = snapshot(&primary_root(root).join("dists"));
    let reports = run(&config, &store, &blobs, None, PublishOptions::default())
        .await
        .unwrap();
    assert!(reports.iter().all(|(_, r)| !r.changed_dists()));
    assert_eq!(snapshot(&primary_root(root).join("dists")), before);
}

#[tokio::test]
async fn test_external_indexer_inputs() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let mut value = config_json(root);
    value["indexer"] = json!({"backend": "external", "command": ["true"]});
    let config = parse(value);
    let store = store(vec![bar_source()], vec![foo_binary()]);
    let blobs = blobs();
    let options = PublishOptions {
        archives: vec!["primary".to_string()],
        ..Default::default()
    };

    // `true` writes no indexes, so the Release file cannot be assembled.
    let err = run(&config, &store, &blobs, None, options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Batch);
    assert!(err.to_string().contains("which was never generated"));

    let overrides = root.join("archive/ubuntutest-overrides");
    assert_eq!(
        fs::read_to_string(overrides.join(format!("override.{}.main.src", SUITE))).unwrap(),
        "bar\tdevel\n"
    );
    let binary = fs::read_to_string(overrides.join(format!("override.{}.main", SUITE))).unwrap();
    assert!(binary.lines().any(|l| l == "foo\textra\tbase"));
    let extra =
        fs::read_to_string(overrides.join(format!("override.{}.extra.main", SUITE))).unwrap();
    assert!(extra
        .lines()
        .any(|l| l == "foo/i386\tPhased-Update-Percentage\t30"));

    let source_list =
        fs::read_to_string(overrides.join(format!("{}_main_source", SUITE))).unwrap();
    let pool_path = primary_root(root).join("pool/main/b/bar/bar_1.0-1.dsc");
    assert_eq!(source_list, format!("{}\n", pool_path.display()));
    assert!(pool_path.exists());

    // The live tree was not touched, but phase A stays committed.
    assert!(snapshot(&primary_root(root).join("dists")).is_empty());
    assert_eq!(
        store.status(PublicationRef::Source(1)).unwrap(),
        Some(PublishingStatus::Published)
    );
}

#[tokio::test]
async fn test_indexer_failure_is_reported() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let mut value = config_json(root);
    value["indexer"] = json!({"backend": "auto", "command": ["false"]});
    let config = parse(value);
    let store = store(vec![bar_source(), zoo_ppa_source()], vec![]);
    let blobs = blobs();

    let err = run(&config, &store, &blobs, None, PublishOptions::default())
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("1 archive(s) failed to publish"));
    assert!(message.contains("Failure(s) from false: i386 (returned 1), source (returned 1)"));
    // The PPA uses the native backend and still got published.
    assert!(root
        .join("archive/ppa/cprov/ppa/ubuntutest/dists")
        .join(SUITE)
        .join("Release")
        .exists());
}

#[tokio::test]
async fn test_interrupted_run_leaves_live_tree_alone() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let mut value = config_json(root);
    value["archives"] = json!([{
        "name": "primary", "distribution": "ubuntutest", "purpose": "primary",
        "signing_key": "0xDEADBEEF"
    }]);
    let config = parse(value);
    let store = store(vec![bar_source()], vec![]);
    let blobs = blobs();

    run(&config, &store, &blobs, Some(&FixedSigner), PublishOptions::default())
        .await
        .unwrap();
    let suite_dir = live_suite(root);
    assert!(suite_dir.join("Release.gpg").exists());
    assert!(fs::read_to_string(suite_dir.join("InRelease"))
        .unwrap()
        .starts_with("-----BEGIN PGP SIGNED MESSAGE-----\nOrigin: Ubuntu Test\n"));
    let before = snapshot(&primary_root(root).join("dists"));

    store
        .add_binary(serde_json::from_value(foo_binary()).unwrap())
        .unwrap();
    let reached = Arc::new(Notify::new());
    let stuck = StuckSigner {
        reached: reached.clone(),
    };
    let mut publisher = DistributionPublisher::new(
        &config,
        "ubuntutest",
        &store,
        &blobs,
        Some(&stuck),
        PublishOptions::default(),
    )
    .unwrap();
    let err = publisher
        .run_until(async { reached.notified().await })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);

    assert_eq!(snapshot(&primary_root(root).join("dists")), before);
    assert!(!primary_root(root).join("dists.in-progress").exists());
    assert_eq!(
        store.status(PublicationRef::Binary(2)).unwrap(),
        Some(PublishingStatus::Published)
    );

    // The next run only has indexes left to do.
    let reports = run(&config, &store, &blobs, Some(&FixedSigner), PublishOptions::default())
        .await
        .unwrap();
    let report = &reports[0].1;
    assert_eq!(report.published, 0);
    assert_eq!(report.released, vec![Suite::new(SUITE, Pocket::Release)]);
    let packages = fs::read_to_string(suite_dir.join("main/binary-i386/Packages")).unwrap();
    assert!(packages.contains("Package: foo\n"));
}

#[tokio::test]
async fn test_compressor_switch_prunes_old_variants() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let mut value = config_json(root);
    value["distributions"][0]["series"][0]["index_compressors"] = json!(["bzip2"]);
    let config = parse(value.clone());
    let store = store(vec![bar_source()], vec![foo_binary()]);
    let blobs = blobs();
    let primary_only = PublishOptions {
        archives: vec!["primary".to_string()],
        ..Default::default()
    };

    run(&config, &store, &blobs, None, primary_only.clone())
        .await
        .unwrap();
    let suite_dir = live_suite(root);
    assert!(suite_dir.join("main/binary-i386/Packages.bz2").exists());
    assert!(!suite_dir.join("main/binary-i386/Packages").exists());
    fs::create_dir_all(suite_dir.join("main/i18n")).unwrap();
    fs::write(suite_dir.join("main/i18n/Translation-de"), "Package: foo\n").unwrap();

    value["distributions"][0]["series"][0]["index_compressors"] = json!(["xz"]);
    let config = parse(value);
    let careful = PublishOptions {
        careful: CarefulModes::all(),
        ..primary_only
    };
    run(&config, &store, &blobs, None, careful).await.unwrap();

    assert!(suite_dir.join("main/binary-i386/Packages.xz").exists());
    assert!(suite_dir.join("main/source/Sources.xz").exists());
    assert!(!suite_dir.join("main/binary-i386/Packages.bz2").exists());
    assert!(!suite_dir.join("main/source/Sources.bz2").exists());
    assert_eq!(
        fs::read_to_string(suite_dir.join("main/i18n/Translation-de")).unwrap(),
        "Package: foo\n"
    );
    let release = fs::read_to_string(suite_dir.join("Release")).unwrap();
    assert!(release.contains(" main/i18n/Translation-de\n"));
    assert!(release.contains(" main/i18n/Index\n"));
    assert!(!release.contains(".bz2"));
}

#[tokio::test]
async fn test_staged_files_are_merged_once() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let config = parse(config_json(root));
    let store = store(vec![bar_source()], vec![]);
    let blobs = blobs();
    let primary_only = PublishOptions {
        archives: vec!["primary".to_string()],
        ..Default::default()
    };
    run(&config, &store, &blobs, None, primary_only.clone())
        .await
        .unwrap();

    let staged = root
        .join("archive/ubuntutest-staging")
        .join(SUITE)
        .join("main/dep11/Components-i386.yml");
    fs::create_dir_all(staged.parent().unwrap()).unwrap();
    fs::write(&staged, "---\nFile: DEP-11\n").unwrap();

    let reports = run(&config, &store, &blobs, None, primary_only.clone())
        .await
        .unwrap();
    assert_eq!(
        reports[0].1.released,
        vec![Suite::new(SUITE, Pocket::Release)]
    );
    let suite_dir = live_suite(root);
    assert_eq!(
        fs::read_to_string(suite_dir.join("main/dep11/Components-i386.yml")).unwrap(),
        "---\nFile: DEP-11\n"
    );
    assert!(fs::read_to_string(suite_dir.join("Release"))
        .unwrap()
        .contains(" main/dep11/Components-i386.yml\n"));

    let before = snapshot(&primary_root(root).join("dists"));
    let reports = run(&config, &store, &blobs, None, primary_only)
        .await
        .unwrap();
    assert!(!reports[0].1.changed_dists());
    assert_eq!(snapshot(&primary_root(root).join("dists")), before);
}

#[tokio::test]
async fn test_staged_files_wait_for_their_suite() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let config = parse(config_json(root));
    let store = store(vec![bar_source()], vec![]);
    let blobs = blobs();
    let primary_only = PublishOptions {
        archives: vec!["primary".to_string()],
        ..Default::default()
    };
    run(&config, &store, &blobs, None, primary_only.clone())
        .await
        .unwrap();

    let staged = root
        .join("archive/ubuntutest-staging")
        .join(SUITE)
        .join("main/dep11/Components-i386.yml");
    fs::create_dir_all(staged.parent().unwrap()).unwrap();
    fs::write(&staged, "---\nFile: DEP-11\n").unwrap();

    // A run restricted to another suite leaves the staged file alone.
    let security_only_suite = PublishOptions {
        suites: vec![Suite::new(SUITE, Pocket::Security)],
        ..primary_only.clone()
    };
    run(&config, &store, &blobs, None, security_only_suite)
        .await
        .unwrap();
    let suite_dir = live_suite(root);
    assert!(!suite_dir.join("main/dep11/Components-i386.yml").exists());

    let reports = run(&config, &store, &blobs, None, primary_only)
        .await
        .unwrap();
    assert_eq!(
        reports[0].1.released,
        vec![Suite::new(SUITE, Pocket::Release)]
    );
    assert!(suite_dir.join("main/dep11/Components-i386.yml").exists());
    assert!(fs::read_to_string(suite_dir.join("Release"))
        .unwrap()
        .contains(" main/dep11/Components-i386.yml\n"));
}

#[tokio::test]
async fn test_security_only_run_after_interruption() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let mut value = config_json(root);
    value["archives"] = json!([{
        "name": "primary", "distribution": "ubuntutest", "purpose": "primary",
        "signing_key": "0xDEADBEEF"
    }]);
    let config = parse(value);
    let store = store(vec![bar_source(), openssl_security_source()], vec![]);
    let blobs = blobs();
    let release = Suite::new(SUITE, Pocket::Release);
    let security = Suite::new(SUITE, Pocket::Security);
    let layout = ArchiveLayout::new(primary_root(root));

    let reached = Arc::new(Notify::new());
    let stuck = StuckSigner {
        reached: reached.clone(),
    };
    let mut publisher = DistributionPublisher::new(
        &config,
        "ubuntutest",
        &store,
        &blobs,
        Some(&stuck),
        PublishOptions::default(),
    )
    .unwrap();
    let err = publisher
        .run_until(async { reached.notified().await })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
    assert_eq!(
        load_unfinished_suites(&layout).unwrap(),
        [release.clone(), security.clone()].into()
    );

    // Only the security suite is finished; the other stays recorded.
    let security_only = PublishOptions {
        security_only: true,
        ..Default::default()
    };
    let reports = run(&config, &store, &blobs, Some(&FixedSigner), security_only)
        .await
        .unwrap();
    assert_eq!(reports[0].1.published, 0);
    assert_eq!(reports[0].1.released, vec![security.clone()]);
    assert_eq!(
        load_unfinished_suites(&layout).unwrap(),
        [release.clone()].into()
    );
    let dists = primary_root(root).join("dists");
    assert!(dists.join(security.name()).join("Release").exists());
    assert!(!dists.join(release.name()).join("Release").exists());

    let reports = run(&config, &store, &blobs, Some(&FixedSigner), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(reports[0].1.released, vec![release]);
    assert!(load_unfinished_suites(&layout).unwrap().is_empty());
    assert!(!layout.misc_root.join("unfinished-suites.json").exists());
}
