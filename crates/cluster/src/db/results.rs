//! ClusterResult 持久化

use rusqlite::{params, Result as SqliteResult, Row};

use super::types::ClusterResultRecord;
use super::{from_sql_err, parse_algorithm, to_sql_err, Database};
use crate::result::{ClusterResult, Method};

const RECORD_COLUMNS: &str = "id, method, algorithm, member_count, skipped_count, distance_threshold, \
                              regex_filter, description, created_at";

impl Database {
    /// 保存聚类结果，返回结果 ID
    pub fn save_result(&self, result: &ClusterResult) -> SqliteResult<i64> {
        let document = result.to_storage().map_err(to_sql_err)?;
        self.conn.execute(
            r#"
            INSERT INTO cluster_results
                (method, algorithm, member_count, skipped_count, distance_threshold,
                 regex_filter, description, document)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                result.method().as_str(),
                result.algorithm().as_str(),
                result.member_count() as i64,
                result.skipped_count() as i64,
                result.distance_threshold(),
                result.regex_filter(),
                result.description(),
                document,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 获取单个结果（文档内溢出字段仍是块引用）
    pub fn get_result(&self, id: i64) -> SqliteResult<Option<(ClusterResultRecord, ClusterResult)>> {
        let query = format!("SELECT {}, document FROM cluster_results WHERE id = ?", RECORD_COLUMNS);
        let result = self.conn.query_row(&query, [id], |row| {
            let record = Self::row_to_result_record(row)?;
            let document: Vec<u8> = row.get(9)?;
            let result = ClusterResult::from_storage(&document).map_err(|e| from_sql_err(9, e))?;
            Ok((record, result))
        });

        match result {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 最近的结果，新的在前
    pub fn list_results(&self, limit: usize) -> SqliteResult<Vec<ClusterResultRecord>> {
        let query = format!("SELECT {} FROM cluster_results ORDER BY id DESC LIMIT ?", RECORD_COLUMNS);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([limit as i64], Self::row_to_result_record)?;
        rows.collect()
    }

    pub fn delete_result(&self, id: i64) -> SqliteResult<bool> {
        let n = self.conn.execute("DELETE FROM cluster_results WHERE id = ?", [id])?;
        Ok(n > 0)
    }

    fn row_to_result_record(row: &Row) -> SqliteResult<ClusterResultRecord> {
        let method: String = row.get(1)?;
        let algorithm: String = row.get(2)?;
        Ok(ClusterResultRecord {
            id: row.get(0)?,
            method: Method::from_str(&method)
                .ok_or_else(|| from_sql_err(1, format!("unknown method {}", method)))?,
            algorithm: parse_algorithm(2, &algorithm)?,
            member_count: row.get::<_, i64>(3)? as usize,
            skipped_count: row.get::<_, i64>(4)? as usize,
            distance_threshold: row.get(5)?,
            regex_filter: row.get(6)?,
            description: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}
