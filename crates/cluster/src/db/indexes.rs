//! 相似度索引快照

use fuzzy::Algorithm;
use rusqlite::{params, Result as SqliteResult};

use super::types::IndexRecord;
use super::{from_sql_err, parse_algorithm, to_sql_err, Database};
use crate::index::{IndexParams, SimilarityIndex};

impl Database {
    /// 保存索引快照，返回快照 ID
    pub fn save_index(&self, algorithm: Algorithm, index: &SimilarityIndex) -> SqliteResult<i64> {
        let document = index.to_storage().map_err(to_sql_err)?;
        let p = index.params();
        self.conn.execute(
            r#"
            INSERT INTO similarity_indexes
                (algorithm, table_length, band_width, band_width_threshold, member_count, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                algorithm.as_str(),
                p.table_length as i64,
                p.band_width as i64,
                p.band_width_threshold as i64,
                index.member_count() as i64,
                document,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 最新的索引快照
    pub fn load_latest_index(&self, algorithm: Algorithm) -> SqliteResult<Option<(IndexRecord, SimilarityIndex)>> {
        let result = self.conn.query_row(
            r#"
            SELECT id, algorithm, table_length, band_width, band_width_threshold,
                   member_count, created_at, document
            FROM similarity_indexes
            WHERE algorithm = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
            [algorithm.as_str()],
            |row| {
                let algorithm: String = row.get(1)?;
                let record = IndexRecord {
                    id: row.get(0)?,
                    algorithm: parse_algorithm(1, &algorithm)?,
                    params: IndexParams {
                        table_length: row.get::<_, i64>(2)? as usize,
                        band_width: row.get::<_, i64>(3)? as usize,
                        band_width_threshold: row.get::<_, i64>(4)? as usize,
                    },
                    member_count: row.get::<_, i64>(5)? as usize,
                    created_at: row.get(6)?,
                };
                let document: Vec<u8> = row.get(7)?;
                let index = SimilarityIndex::from_storage(&document).map_err(|e| from_sql_err(7, e))?;
                Ok((record, index))
            },
        );

        match result {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
