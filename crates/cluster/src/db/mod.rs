//! 数据库模块 - 摘要、块、索引快照与聚类结果

mod types;
mod digests;
mod blobs;
mod indexes;
mod results;

pub use types::*;

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;

/// 数据库管理
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS digests (
                owner_file_id TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                filename TEXT NOT NULL,
                firmware_id TEXT,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (owner_file_id, algorithm)
            );

            CREATE TABLE IF NOT EXISTS skipped_files (
                file_id TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                filename TEXT NOT NULL,
                firmware_id TEXT,
                reason TEXT NOT NULL,
                PRIMARY KEY (file_id, algorithm)
            );

            CREATE TABLE IF NOT EXISTS blobs (
                sha256 TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS similarity_indexes (
                id INTEGER PRIMARY KEY,
                algorithm TEXT NOT NULL,
                table_length INTEGER NOT NULL,
                band_width INTEGER NOT NULL,
                band_width_threshold INTEGER NOT NULL,
                member_count INTEGER NOT NULL,
                document BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cluster_results (
                id INTEGER PRIMARY KEY,
                method TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                member_count INTEGER NOT NULL,
                skipped_count INTEGER NOT NULL,
                distance_threshold INTEGER NOT NULL,
                regex_filter TEXT,
                description TEXT,
                document BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_digests_algorithm ON digests(algorithm);
            CREATE INDEX IF NOT EXISTS idx_digests_firmware ON digests(firmware_id);
            CREATE INDEX IF NOT EXISTS idx_indexes_algorithm ON similarity_indexes(algorithm);
            "#,
        )?;
        Ok(())
    }
}

/// 文档编解码失败转成 rusqlite 错误，与其余 CRUD 共用返回类型
fn to_sql_err(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(e.into())
}

fn from_sql_err(
    column: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, e.into())
}

fn parse_algorithm(column: usize, s: &str) -> SqliteResult<fuzzy::Algorithm> {
    fuzzy::Algorithm::from_str(s).ok_or_else(|| from_sql_err(column, format!("unknown algorithm {}", s)))
}
