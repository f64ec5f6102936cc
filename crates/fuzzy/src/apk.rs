//! APK（zip）展开
//!
//! 把条目解压到临时目录后按相对路径遍历。临时目录随 `ScratchArchive` 释放而删除，
//! 任何退出路径（成功、解析失败、提前返回）都会清理。

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::config::DigestConfig;
use crate::error::{DigestError, Result};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

pub fn is_zip(data: &[u8]) -> bool {
    data.len() >= 4 && &data[..4] == ZIP_MAGIC
}

/// 已解压到临时目录的压缩包
pub struct ScratchArchive {
    dir: TempDir,
    /// 相对路径（`/` 分隔），按字典序
    members: Vec<String>,
}

impl ScratchArchive {
    /// 解压到新的临时目录
    pub fn extract(data: &[u8], config: &DigestConfig) -> Result<Self> {
        let mut archive = ZipArchive::new(io::Cursor::new(data))
            .map_err(|e| DigestError::ContainerParse(format!("zip: {}", e)))?;
        let dir = tempfile::Builder::new().prefix("lineage-apk-").tempdir()?;

        if archive.len() > config.max_entries {
            tracing::warn!(
                "archive has {} entries, only the first {} are digested",
                archive.len(),
                config.max_entries
            );
        }

        for i in 0..archive.len().min(config.max_entries) {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| DigestError::ContainerParse(format!("zip entry {}: {}", i, e)))?;
            if entry.is_dir() {
                continue;
            }
            // enclosed_name 过滤掉 `..` 与绝对路径
            let Some(rel) = entry.enclosed_name() else {
                tracing::warn!("skipping unsafe zip entry name {:?}", entry.name());
                continue;
            };
            if entry.size() > config.max_member_bytes {
                tracing::warn!(
                    "skipping zip entry {} ({} bytes exceeds limit {})",
                    rel.display(),
                    entry.size(),
                    config.max_member_bytes
                );
                continue;
            }

            let target = dir.path().join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            let mut limited = (&mut entry).take(config.max_member_bytes);
            io::copy(&mut limited, &mut out)?;
        }

        let mut files = Vec::new();
        walk(dir.path(), &mut files)?;
        let mut members: Vec<String> = files
            .iter()
            .filter_map(|p| p.strip_prefix(dir.path()).ok())
            .map(relative_key)
            .collect();
        members.sort();

        Ok(Self { dir, members })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// 读取成员内容
    pub fn read(&self, member: &str) -> Result<Vec<u8>> {
        let path = member
            .split('/')
            .fold(self.dir.path().to_path_buf(), |acc, part| acc.join(part));
        Ok(fs::read(path)?)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// 内存中构造 zip
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_and_cleanup() {
        let zip = build_zip(&[
            ("AndroidManifest.xml", &b"<manifest/>"[..]),
            ("lib/arm64-v8a/libfoo.so", &b"\x7fELF...."[..]),
            ("assets/data.bin", &b"0123456789"[..]),
        ]);
        assert!(is_zip(&zip));

        let scratch = ScratchArchive::extract(&zip, &DigestConfig::default()).unwrap();
        assert_eq!(
            scratch.members(),
            &["AndroidManifest.xml", "assets/data.bin", "lib/arm64-v8a/libfoo.so"]
        );
        assert_eq!(scratch.read("assets/data.bin").unwrap(), b"0123456789");

        let path = scratch.path().to_path_buf();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_entry_limit() {
        let zip = build_zip(&[("a", &b"1"[..]), ("b", &b"2"[..]), ("c", &b"3"[..])]);
        let config = DigestConfig { max_entries: 2, ..DigestConfig::default() };
        let scratch = ScratchArchive::extract(&zip, &config).unwrap();
        assert_eq!(scratch.members().len(), 2);
    }

    #[test]
    fn test_member_size_limit() {
        let zip = build_zip(&[("big", &[7u8; 100][..]), ("small", &b"ok"[..])]);
        let config = DigestConfig { max_member_bytes: 10, ..DigestConfig::default() };
        let scratch = ScratchArchive::extract(&zip, &config).unwrap();
        assert_eq!(scratch.members(), &["small"]);
    }

    #[test]
    fn test_corrupt_zip() {
        let mut zip = build_zip(&[("a", &b"1"[..])]);
        zip.truncate(10);
        assert!(matches!(
            ScratchArchive::extract(&zip, &DigestConfig::default()),
            Err(DigestError::ContainerParse(_))
        ));
    }
}
