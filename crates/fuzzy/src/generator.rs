//! 摘要生成器

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::algorithm::{Algorithm, FuzzyHasher};
use crate::apk::{is_zip, ScratchArchive};
use crate::config::DigestConfig;
use crate::digest::{ContainerKind, Digest, SubDigest, HEADER_SECTION};
use crate::elf::{is_elf, parse_sections};
use crate::error::Result;

/// 抽取流水线交付的文件，内容已完整落盘
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_id: String,
    pub filename: String,
    pub path: PathBuf,
}

impl SourceFile {
    pub fn new(file_id: impl Into<String>, filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            file_id: file_id.into(),
            filename: filename.into(),
            path: path.into(),
        }
    }
}

/// 摘要生成器
pub struct DigestGenerator {
    hasher: &'static dyn FuzzyHasher,
    config: DigestConfig,
}

impl DigestGenerator {
    pub fn new(algorithm: Algorithm) -> Result<Self> {
        Ok(Self {
            hasher: algorithm.hasher()?,
            config: DigestConfig::default(),
        })
    }

    pub fn with_config(mut self, config: DigestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.hasher.algorithm()
    }

    /// 对字节流生成摘要值
    pub fn generate(&self, data: &[u8]) -> Result<String> {
        self.hasher.hash(data)
    }

    /// 比较两个摘要值
    pub fn compare(&self, a: &str, b: &str) -> Result<u32> {
        self.hasher.compare(a, b)
    }

    /// 读取落盘文件并生成 Digest
    pub fn generate_digest(&self, file: &SourceFile) -> Result<Digest> {
        let data = std::fs::read(&file.path)?;
        self.digest_bytes(&file.file_id, &file.filename, &data)
    }

    /// 对内存中的文件内容生成 Digest
    ///
    /// 顶层摘要失败（熵不足）直接返回错误；容器内部解析失败只会退化为普通摘要。
    pub fn digest_bytes(&self, file_id: &str, filename: &str, data: &[u8]) -> Result<Digest> {
        let value = self.generate(data)?;

        let container = if is_zip(data) {
            self.apk_sub_digests(data).map(|subs| (ContainerKind::Apk, subs))
        } else if is_elf(data) || has_extension(filename, "so") {
            self.elf_sub_digests(data)
                .map(|sections| {
                    let subs: BTreeMap<String, SubDigest> =
                        sections.into_iter().map(|(k, v)| (k, SubDigest::Value(v))).collect();
                    (ContainerKind::Elf, subs)
                })
        } else {
            return Ok(Digest::flat(file_id, filename, self.algorithm(), value));
        };

        match container {
            Ok((kind, subs)) => Ok(Digest::container(file_id, filename, self.algorithm(), value, kind, subs)),
            Err(e) => {
                tracing::warn!("{} ({}): {}, falling back to flat digest", filename, file_id, e);
                Ok(Digest::flat(file_id, filename, self.algorithm(), value))
            }
        }
    }

    /// APK 成员摘要，键为压缩包内相对路径
    fn apk_sub_digests(&self, data: &[u8]) -> Result<BTreeMap<String, SubDigest>> {
        let scratch = ScratchArchive::extract(data, &self.config)?;
        let mut subs = BTreeMap::new();

        for member in scratch.members() {
            let bytes = scratch.read(member)?;

            if is_elf(&bytes) || has_extension(member, "so") {
                match self.elf_sub_digests(&bytes) {
                    Ok(sections) if !sections.is_empty() => {
                        subs.insert(member.clone(), SubDigest::Sections(sections));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("{}: {}, digesting as plain member", member, e),
                }
            }

            match self.generate(&bytes) {
                Ok(v) => {
                    subs.insert(member.clone(), SubDigest::Value(v));
                }
                Err(e) if e.is_skip() => tracing::debug!("skipping member {}: {}", member, e),
                Err(e) => return Err(e),
            }
        }

        Ok(subs)
    }

    /// ELF 节摘要 + "header" 伪节
    fn elf_sub_digests(&self, data: &[u8]) -> Result<BTreeMap<String, String>> {
        let parsed = parse_sections(data)?;
        let mut out = BTreeMap::new();

        let named = std::iter::once((HEADER_SECTION.to_string(), parsed.header.as_slice()))
            .chain(parsed.sections.iter().map(|(n, d)| (n.clone(), *d)));
        for (name, bytes) in named {
            match self.generate(bytes) {
                Ok(v) => {
                    out.insert(name, v);
                }
                Err(e) if e.is_skip() => tracing::debug!("skipping section {}: {}", name, e),
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::tests::build_zip;
    use crate::elf::tests::build_elf64;
    use crate::tlsh::tests::noise;

    fn tlsh() -> DigestGenerator {
        DigestGenerator::new(Algorithm::Tlsh).unwrap()
    }

    #[test]
    fn test_flat_file() {
        let d = tlsh().digest_bytes("1", "boot.img", &noise(4096, 1)).unwrap();
        assert_eq!(d.container_kind(), None);
        assert!(d.sub_digests().is_empty());
        assert_eq!(d.value().len(), crate::tlsh::DIGEST_LEN);
    }

    #[test]
    fn test_deterministic() {
        let data = noise(4096, 9);
        let a = tlsh().digest_bytes("1", "x", &data).unwrap();
        let b = tlsh().digest_bytes("1", "x", &data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_insufficient_entropy_is_error() {
        let err = tlsh().digest_bytes("1", "tiny", b"abc").unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_apk_identical_members() {
        let payload = noise(3000, 4);
        let zip = build_zip(&[
            ("assets/a.bin", payload.as_slice()),
            ("res/raw/b.bin", payload.as_slice()),
            ("tiny.txt", &b"hi"[..]),
            ("assets/other.bin", noise(3000, 5).as_slice()),
        ]);

        let gen = tlsh();
        let d = gen.digest_bytes("apk1", "app.apk", &zip).unwrap();
        assert_eq!(d.container_kind(), Some(ContainerKind::Apk));
        assert!(d.sub_digest("tiny.txt").is_none());

        let a = d.sub_digest("assets/a.bin").and_then(|s| s.as_value()).unwrap();
        let b = d.sub_digest("res/raw/b.bin").and_then(|s| s.as_value()).unwrap();
        assert_eq!(a, b);
        assert_eq!(gen.compare(a, b).unwrap(), 0);
    }

    #[test]
    fn test_apk_with_elf_member() {
        let elf = build_elf64(&noise(800, 1), &noise(400, 2));
        let zip = build_zip(&[
            ("lib/arm64-v8a/libfoo.so", elf.as_slice()),
            ("classes.dex", noise(2000, 3).as_slice()),
        ]);

        let d = tlsh().digest_bytes("apk2", "app.apk", &zip).unwrap();
        let sections = d
            .sub_digest("lib/arm64-v8a/libfoo.so")
            .and_then(|s| s.sections())
            .unwrap();
        assert!(sections.contains_key(HEADER_SECTION));
        assert!(sections.contains_key(".text"));
        assert!(sections.contains_key(".data"));
        assert!(d.sub_digest("classes.dex").and_then(|s| s.as_value()).is_some());
    }

    #[test]
    fn test_top_level_elf() {
        let elf = build_elf64(&noise(800, 1), &noise(400, 2));
        let d = tlsh().digest_bytes("e1", "libbar.so", &elf).unwrap();
        assert_eq!(d.container_kind(), Some(ContainerKind::Elf));
        let keys: Vec<&str> = d.sub_digests().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec![".data", ".text", "header"]);
    }

    #[test]
    fn test_header_pseudo_section_not_overwritten() {
        let mut elf = build_elf64(&noise(800, 1), &noise(400, 2));
        crate::elf::tests::rename_strtab_to_header(&mut elf);

        let gen = tlsh();
        let d = gen.digest_bytes("e3", "libbar.so", &elf).unwrap();
        let header = parse_sections(&elf).unwrap().header;
        let value = d.sub_digest(HEADER_SECTION).and_then(|s| s.as_value()).unwrap();
        assert_eq!(value, gen.generate(&header).unwrap());
    }

    #[test]
    fn test_malformed_elf_degrades_to_flat() {
        let mut elf = build_elf64(&noise(800, 1), &noise(400, 2));
        let len = elf.len();
        elf.truncate(len - 200);
        let d = tlsh().digest_bytes("e2", "libbroken.so", &elf).unwrap();
        assert_eq!(d.container_kind(), None);
        assert!(d.sub_digests().is_empty());
    }

    #[test]
    fn test_generate_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, noise(2048, 8)).unwrap();

        let file = SourceFile::new("f9", "blob.bin", &path);
        let d = tlsh().generate_digest(&file).unwrap();
        assert_eq!(d.owner_file_id(), "f9");
        assert_eq!(d.value(), tlsh().generate(&noise(2048, 8)).unwrap());
    }
}
