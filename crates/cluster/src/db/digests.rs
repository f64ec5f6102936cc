//! Digest CRUD 操作
//!
//! 文档以清洗后的键名写入，读取时还原。

use fuzzy::{Algorithm, Digest, SkippedFile};
use rusqlite::{params, Result as SqliteResult, Row};

use super::types::{DigestRecord, SkippedRecord};
use super::{from_sql_err, parse_algorithm, to_sql_err, Database};

const DIGEST_COLUMNS: &str = "document, firmware_id, created_at";

impl Database {
    /// 插入或更新摘要
    pub fn upsert_digest(&self, digest: &Digest, firmware_id: Option<&str>) -> SqliteResult<()> {
        let document = encode_digest(digest)?;
        self.conn.execute(
            r#"
            INSERT INTO digests (owner_file_id, algorithm, filename, firmware_id, document)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner_file_id, algorithm) DO UPDATE SET
                filename = excluded.filename,
                firmware_id = COALESCE(excluded.firmware_id, digests.firmware_id),
                document = excluded.document
            "#,
            params![
                digest.owner_file_id(),
                digest.algorithm().as_str(),
                digest.filename(),
                firmware_id,
                document,
            ],
        )?;
        // 重新生成成功，清除之前的失败记录
        self.conn.execute(
            "DELETE FROM skipped_files WHERE file_id = ? AND algorithm = ?",
            params![digest.owner_file_id(), digest.algorithm().as_str()],
        )?;
        Ok(())
    }

    /// 批量写入摘要（单事务）
    pub fn batch_upsert_digests(&self, digests: &[Digest], firmware_id: Option<&str>) -> SqliteResult<usize> {
        self.conn.execute("BEGIN TRANSACTION", [])?;

        let result = (|| {
            let mut count = 0;
            for digest in digests {
                self.upsert_digest(digest, firmware_id)?;
                count += 1;
            }
            Ok::<usize, rusqlite::Error>(count)
        })();

        match result {
            Ok(count) => {
                self.conn.execute("COMMIT", [])?;
                Ok(count)
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// 获取单个摘要
    pub fn get_digest(&self, owner_file_id: &str, algorithm: Algorithm) -> SqliteResult<Option<DigestRecord>> {
        let query = format!(
            "SELECT {} FROM digests WHERE owner_file_id = ? AND algorithm = ?",
            DIGEST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let result = stmt.query_row(params![owner_file_id, algorithm.as_str()], Self::row_to_digest);

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 列出摘要，按 owner_file_id 排序 (None 表示全部算法)
    pub fn list_digests(&self, algorithm: Option<Algorithm>) -> SqliteResult<Vec<DigestRecord>> {
        match algorithm {
            None => {
                let query = format!(
                    "SELECT {} FROM digests ORDER BY owner_file_id, algorithm",
                    DIGEST_COLUMNS
                );
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map([], Self::row_to_digest)?;
                rows.collect()
            }
            Some(algorithm) => {
                let query = format!(
                    "SELECT {} FROM digests WHERE algorithm = ? ORDER BY owner_file_id",
                    DIGEST_COLUMNS
                );
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map([algorithm.as_str()], Self::row_to_digest)?;
                rows.collect()
            }
        }
    }

    /// 文件删除时级联删除其全部摘要与失败记录
    pub fn delete_digests_for_file(&self, owner_file_id: &str) -> SqliteResult<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM digests WHERE owner_file_id = ?", [owner_file_id])?;
        self.conn
            .execute("DELETE FROM skipped_files WHERE file_id = ?", [owner_file_id])?;
        Ok(deleted)
    }

    /// 记录摘要失败的文件
    pub fn record_skipped(
        &self,
        skipped: &SkippedFile,
        algorithm: Algorithm,
        firmware_id: Option<&str>,
    ) -> SqliteResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO skipped_files (file_id, algorithm, filename, firmware_id, reason)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(file_id, algorithm) DO UPDATE SET
                filename = excluded.filename,
                firmware_id = COALESCE(excluded.firmware_id, skipped_files.firmware_id),
                reason = excluded.reason
            "#,
            params![
                &skipped.file_id,
                algorithm.as_str(),
                &skipped.filename,
                firmware_id,
                &skipped.reason
            ],
        )?;
        Ok(())
    }

    pub fn list_skipped(&self, algorithm: Algorithm) -> SqliteResult<Vec<SkippedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_id, algorithm, filename, firmware_id, reason FROM skipped_files WHERE algorithm = ? ORDER BY file_id",
        )?;
        let rows = stmt.query_map([algorithm.as_str()], |row| {
            let algorithm: String = row.get(1)?;
            Ok(SkippedRecord {
                file_id: row.get(0)?,
                algorithm: parse_algorithm(1, &algorithm)?,
                filename: row.get(2)?,
                firmware_id: row.get(3)?,
                reason: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_skipped(&self, algorithm: Algorithm) -> SqliteResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM skipped_files WHERE algorithm = ?",
            [algorithm.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn row_to_digest(row: &Row) -> SqliteResult<DigestRecord> {
        let document: String = row.get(0)?;
        Ok(DigestRecord {
            digest: decode_digest(&document)?,
            firmware_id: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

fn encode_digest(digest: &Digest) -> SqliteResult<String> {
    let clean = digest.sanitized().map_err(to_sql_err)?;
    serde_json::to_string(&clean).map_err(to_sql_err)
}

fn decode_digest(document: &str) -> SqliteResult<Digest> {
    let stored: Digest = serde_json::from_str(document).map_err(|e| from_sql_err(0, e))?;
    stored.restored().map_err(|e| from_sql_err(0, e))
}
