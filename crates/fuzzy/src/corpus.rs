//! 批量摘要
//!
//! 单个文件失败不影响其他文件，失败原因收集到 `skipped`。

use rayon::prelude::*;

use crate::digest::Digest;
use crate::generator::{DigestGenerator, SourceFile};

/// 未能生成摘要的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub file_id: String,
    pub filename: String,
    pub reason: String,
}

/// 批量摘要结果，两个列表都按 file_id 排序
#[derive(Debug, Default)]
pub struct CorpusDigests {
    pub digests: Vec<Digest>,
    pub skipped: Vec<SkippedFile>,
}

/// 并行对一批文件生成摘要
pub fn digest_corpus(generator: &DigestGenerator, files: &[SourceFile]) -> CorpusDigests {
    let outcomes: Vec<_> = files
        .par_iter()
        .map(|file| (file, generator.generate_digest(file)))
        .collect();

    let mut out = CorpusDigests::default();
    for (file, outcome) in outcomes {
        match outcome {
            Ok(digest) => out.digests.push(digest),
            Err(e) => {
                if e.is_skip() {
                    tracing::debug!("skipping {} ({}): {}", file.filename, file.file_id, e);
                } else {
                    tracing::warn!("failed to digest {} ({}): {}", file.filename, file.file_id, e);
                }
                out.skipped.push(SkippedFile {
                    file_id: file.file_id.clone(),
                    filename: file.filename.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    out.digests.sort_by(|a, b| a.owner_file_id().cmp(b.owner_file_id()));
    out.skipped.sort_by(|a, b| a.file_id.cmp(&b.file_id));

    tracing::info!(
        "digested {} files ({} skipped) with {}",
        out.digests.len(),
        out.skipped.len(),
        generator.algorithm()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use crate::tlsh::tests::noise;

    #[test]
    fn test_digest_corpus_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, data: &[u8]| {
            let path = dir.path().join(name);
            std::fs::write(&path, data).unwrap();
            path
        };

        let files = vec![
            SourceFile::new("3", "c.bin", write("c.bin", &noise(2048, 3))),
            SourceFile::new("1", "a.bin", write("a.bin", &noise(2048, 1))),
            SourceFile::new("2", "tiny.txt", write("tiny.txt", &b"short"[..])),
            SourceFile::new("4", "missing.bin", dir.path().join("missing.bin")),
        ];

        let gen = DigestGenerator::new(Algorithm::Tlsh).unwrap();
        let out = digest_corpus(&gen, &files);

        let ids: Vec<&str> = out.digests.iter().map(|d| d.owner_file_id()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        let skipped: Vec<&str> = out.skipped.iter().map(|s| s.file_id.as_str()).collect();
        assert_eq!(skipped, vec!["2", "4"]);
        assert!(out.skipped[0].reason.contains("insufficient entropy"));
    }
}
