//! 二进制块存储 - 结果溢出与图数据

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 块存储错误
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobRef),
    #[error("blob backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 块引用：内容的 SHA-256（小写 hex）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn for_content(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 外部块存储
///
/// 内容寻址：相同内容 `put` 两次得到同一个引用。
pub trait BlobStore {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError>;

    fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError>;
}

/// 内存块存储
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobRef, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::for_content(bytes);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| BlobError::Backend(e.to_string().into()))?;
        blobs.entry(blob.clone()).or_insert_with(|| bytes.to_vec());
        Ok(blob)
    }

    fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| BlobError::Backend(e.to_string().into()))?;
        blobs.get(blob).cloned().ok_or_else(|| BlobError::NotFound(blob.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"hello").unwrap();
        let b = store.put(b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(
            a.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(store.get(&a).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_blob() {
        let store = MemoryBlobStore::new();
        let missing = BlobRef::for_content(b"nope");
        assert!(matches!(store.get(&missing), Err(BlobError::NotFound(_))));
        assert!(BlobRef::from_hex(missing.as_str()).is_some());
        assert!(BlobRef::from_hex("xyz").is_none());
    }
}
