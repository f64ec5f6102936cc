//! 块存储 - 以内容 SHA-256 为键

use rusqlite::{params, Result as SqliteResult};

use super::Database;
use crate::blob::{BlobError, BlobRef, BlobStore};

impl Database {
    /// 写入块，内容已存在时不重复写
    pub fn put_blob(&self, bytes: &[u8]) -> SqliteResult<BlobRef> {
        let blob = BlobRef::for_content(bytes);
        self.conn.execute(
            "INSERT OR IGNORE INTO blobs (sha256, data, size) VALUES (?, ?, ?)",
            params![blob.as_str(), bytes, bytes.len() as i64],
        )?;
        Ok(blob)
    }

    pub fn get_blob(&self, blob: &BlobRef) -> SqliteResult<Option<Vec<u8>>> {
        let result = self
            .conn
            .query_row("SELECT data FROM blobs WHERE sha256 = ?", [blob.as_str()], |row| row.get(0));

        match result {
            Ok(data) => Ok(Some(data)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 块总数与总字节数
    pub fn blob_stats(&self) -> SqliteResult<(usize, u64)> {
        self.conn.query_row("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM blobs", [], |row| {
            let count: i64 = row.get(0)?;
            let bytes: i64 = row.get(1)?;
            Ok((count as usize, bytes as u64))
        })
    }
}

impl BlobStore for Database {
    fn put(&self, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        self.put_blob(bytes).map_err(|e| BlobError::Backend(Box::new(e)))
    }

    fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, BlobError> {
        self.get_blob(blob)
            .map_err(|e| BlobError::Backend(Box::new(e)))?
            .ok_or_else(|| BlobError::NotFound(blob.clone()))
    }
}
