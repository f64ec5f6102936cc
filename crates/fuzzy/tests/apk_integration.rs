//! APK 摘要集成测试
//!
//! 运行: `cargo test -p fuzzy --test apk_integration`

use std::io::{Cursor, Write};

use fuzzy::{digest_corpus, Algorithm, ContainerKind, DigestGenerator, SourceFile, SubDigest};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 确定性的伪随机字节
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn build_apk(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn test_repackaged_apk_shares_members() {
    let shared = noise(4096, 1);
    let original = build_apk(&[
        ("classes.dex", shared.as_slice()),
        ("res/raw/blob.bin", noise(2048, 2).as_slice()),
    ]);
    let repacked = build_apk(&[
        ("classes.dex", shared.as_slice()),
        ("res/raw/blob.bin", noise(2048, 3).as_slice()),
        ("assets/extra.bin", noise(1024, 4).as_slice()),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.apk");
    let b_path = dir.path().join("b.apk");
    std::fs::write(&a_path, &original).unwrap();
    std::fs::write(&b_path, &repacked).unwrap();

    let gen = DigestGenerator::new(Algorithm::Tlsh).unwrap();
    let out = digest_corpus(
        &gen,
        &[SourceFile::new("b", "b.apk", &b_path), SourceFile::new("a", "a.apk", &a_path)],
    );
    assert!(out.skipped.is_empty());
    assert_eq!(out.digests.len(), 2);

    let (a, b) = (&out.digests[0], &out.digests[1]);
    assert_eq!(a.owner_file_id(), "a");
    assert_eq!(a.container_kind(), Some(ContainerKind::Apk));
    assert_eq!(b.sub_digests().len(), 3);

    let dex_a = a.sub_digest("classes.dex").and_then(SubDigest::as_value).unwrap();
    let dex_b = b.sub_digest("classes.dex").and_then(SubDigest::as_value).unwrap();
    assert_eq!(gen.compare(dex_a, dex_b).unwrap(), 0);

    let blob_a = a.sub_digest("res/raw/blob.bin").and_then(SubDigest::as_value).unwrap();
    let blob_b = b.sub_digest("res/raw/blob.bin").and_then(SubDigest::as_value).unwrap();
    assert!(gen.compare(blob_a, blob_b).unwrap() > 0);
}

#[test]
fn test_sanitized_digest_roundtrip() {
    let apk = build_apk(&[
        ("lib/arm64-v8a/libfoo.so", noise(3000, 5).as_slice()),
        ("$meta.bin", noise(3000, 6).as_slice()),
    ]);
    let gen = DigestGenerator::new(Algorithm::Tlsh).unwrap();
    let digest = gen.digest_bytes("x", "x.apk", &apk).unwrap();

    let clean = digest.sanitized().unwrap();
    assert!(clean.sub_digests().keys().all(|k| fuzzy::is_storage_safe(k)));

    let json = serde_json::to_string(&clean).unwrap();
    let back: fuzzy::Digest = serde_json::from_str(&json).unwrap();
    assert_eq!(back.restored().unwrap(), digest);
}

#[test]
fn test_lzjd_generator() {
    let gen = DigestGenerator::new(Algorithm::Lzjd).unwrap();
    let base = noise(8192, 7);
    let mut edited = base.clone();
    edited[4000..4100].fill(0);

    let a = gen.digest_bytes("1", "a", &base).unwrap();
    let b = gen.digest_bytes("2", "b", &edited).unwrap();
    let c = gen.digest_bytes("3", "c", &noise(8192, 8)).unwrap();

    let near = fuzzy::compare(&a, &b).unwrap();
    let far = fuzzy::compare(&a, &c).unwrap();
    assert!(near < far, "near={} far={}", near, far);
    assert_eq!(fuzzy::compare(&a, &a).unwrap(), 0);
}
