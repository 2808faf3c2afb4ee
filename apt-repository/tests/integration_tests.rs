use apt_repository::hash::hash_file;
use apt_repository::index::variant_path;
use apt_repository::*;
use std::fs;
use tempfile::TempDir;

fn write_suite(root: &std::path::Path, compressions: &[Compression]) -> Release {
    let mut sources = IndexFileWriter::new(&root.join("main/source/Sources"), compressions).unwrap();
    sources
        .write_stanza("Package: bar\nVersion: 1.0-1\nDirectory: pool/main/b/bar\n")
        .unwrap();
    sources.close().unwrap();

    let mut packages =
        IndexFileWriter::new(&root.join("main/binary-amd64/Packages"), compressions).unwrap();
    packages
        .write_stanza("Package: bar-bin\nVersion: 1.0-1\nArchitecture: amd64\n")
        .unwrap();
    packages.close().unwrap();

    let mut release = ReleaseBuilder::new()
        .origin("Test Origin")
        .label("Test Label")
        .suite("test-suite")
        .codename("test")
        .architectures(vec!["amd64".to_string()])
        .components(vec!["main".to_string()])
        .build()
        .unwrap();
    for dir in ["main/source/Sources", "main/binary-amd64/Packages"] {
        for compression in compressions {
            let rel = format!("{}{}", dir, compression.extension());
            release.add_file(HashedFile::from_path(rel.clone(), &root.join(&rel)).unwrap());
        }
    }
    fs::write(root.join("Release"), release.to_string()).unwrap();
    release
}

#[test]
fn test_release_digests_match_files() {
    let td = TempDir::new().unwrap();
    let root = td.path();
    write_suite(root, &[Compression::None, Compression::Gzip, Compression::Xz]);

    let parsed = Release::parse(&fs::read_to_string(root.join("Release")).unwrap()).unwrap();
    assert_eq!(parsed.files.len(), 6);
    for file in &parsed.files {
        let (size, hashes) = hash_file(&root.join(&file.path), HashAlgorithm::all()).unwrap();
        assert_eq!(size, file.size, "{}", file.path);
        for algorithm in RELEASE_HASH_ALGORITHMS {
            assert_eq!(file.get_hash(algorithm), hashes.get(algorithm));
        }
    }
}

#[test]
fn test_compressed_variants_decompress_to_plain() {
    let td = TempDir::new().unwrap();
    let root = td.path();
    write_suite(root, &[Compression::None, Compression::Bzip2]);

    let target = root.join("main/source/Sources");
    let plain = fs::read(&target).unwrap();
    let bz2 = fs::read(variant_path(&target, Compression::Bzip2)).unwrap();
    assert_eq!(Compression::Bzip2.decompress(&bz2).unwrap(), plain);
}

#[test]
fn test_switching_compressors_replaces_variants() {
    let td = TempDir::new().unwrap();
    let root = td.path();
    write_suite(root, &[Compression::None, Compression::Bzip2]);
    write_suite(root, &[Compression::None, Compression::Xz]);

    let target = root.join("main/binary-amd64/Packages");
    assert!(target.exists());
    assert!(variant_path(&target, Compression::Xz).exists());
    assert!(!variant_path(&target, Compression::Bzip2).exists());
}
