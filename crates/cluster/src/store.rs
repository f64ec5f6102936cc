//! 存储层 - 协调 SQLite 数据库和相似度索引

use std::path::Path;

use fuzzy::{Algorithm, CorpusDigests, Digest};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::db::{ClusterResultRecord, Database};
use crate::engine::{CancelFlag, ClusterEngine, ClusterError};
use crate::index::{rebuild_index_locked, IndexError, IndexLock, IndexParams, SimilarityIndex};
use crate::result::{ClusterParams, ClusterResult, Method, ResolvedClusterResult};
use crate::select::MemberSelector;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// 存储层 - 管理 Database + 最近一次加载的 SimilarityIndex
pub struct Store {
    db: Database,
    index: Option<(Algorithm, SimilarityIndex)>,
    config: EngineConfig,
}

impl Store {
    /// 打开或创建 Store
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::with_database(Database::open(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    fn with_database(db: Database) -> Self {
        Self { db, index: None, config: EngineConfig::default() }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// 写入一批摘要结果及其失败记录
    pub fn ingest(&self, corpus: &CorpusDigests, algorithm: Algorithm, firmware_id: Option<&str>) -> Result<usize> {
        let stored = self.db.batch_upsert_digests(&corpus.digests, firmware_id)?;
        for skipped in &corpus.skipped {
            self.db.record_skipped(skipped, algorithm, firmware_id)?;
        }
        tracing::info!("stored {} digests, {} skipped files", stored, corpus.skipped.len());
        Ok(stored)
    }

    /// 从已存摘要重建索引（持锁），保存快照并缓存
    pub fn rebuild_index(&mut self, lock: &dyn IndexLock, algorithm: Algorithm, params: IndexParams) -> Result<i64> {
        let digests: Vec<Digest> = self
            .db
            .list_digests(Some(algorithm))?
            .into_iter()
            .map(|r| r.digest)
            .collect();

        let index = rebuild_index_locked(lock, &digests, params)?;
        let id = self.db.save_index(algorithm, &index)?;
        tracing::info!("saved index snapshot {} ({} members)", id, index.member_count());

        self.index = Some((algorithm, index));
        Ok(id)
    }

    /// 确保缓存的是该算法最新的索引快照
    fn ensure_index_loaded(&mut self, algorithm: Algorithm) -> Result<()> {
        if matches!(&self.index, Some((a, _)) if *a == algorithm) {
            return Ok(());
        }
        self.index = self
            .db
            .load_latest_index(algorithm)?
            .map(|(record, index)| {
                tracing::info!("loaded index snapshot {} from {}", record.id, record.created_at);
                (algorithm, index)
            });
        Ok(())
    }

    fn cached_index(&self, algorithm: Algorithm) -> Option<&SimilarityIndex> {
        match &self.index {
            Some((a, index)) if *a == algorithm => Some(index),
            _ => None,
        }
    }

    pub fn select_members(&self, algorithm: Algorithm, selector: &MemberSelector) -> Result<Vec<Digest>> {
        let records = self.db.list_digests(Some(algorithm))?;
        Ok(selector.select(&records))
    }

    /// 被同一选择条件命中、但摘要失败的文件数
    pub fn count_skipped_for(&self, algorithm: Algorithm, selector: &MemberSelector) -> Result<usize> {
        Ok(self
            .db
            .list_skipped(algorithm)?
            .iter()
            .filter(|s| selector.matches_skipped(s))
            .count())
    }

    /// 选择成员、运行引擎并保存结果；失败时不写入任何结果
    pub fn cluster(
        &mut self,
        algorithm: Algorithm,
        selector: &MemberSelector,
        mut params: ClusterParams,
        cancel: CancelFlag,
    ) -> Result<(i64, ClusterResult)> {
        if params.method == Method::Indexed {
            self.ensure_index_loaded(algorithm)?;
        }

        let members = self.select_members(algorithm, selector)?;
        params.regex_filter = selector.regex_filter().map(String::from);
        params.skipped_count = self.count_skipped_for(algorithm, selector)?;

        let engine = ClusterEngine::new(&self.db)
            .with_config(self.config.clone())
            .with_cancel(cancel);
        let result = engine.cluster(&members, &params, self.cached_index(algorithm))?;

        let id = self.db.save_result(&result)?;
        tracing::info!("saved cluster result {} ({} groups)", id, result.group_count());
        Ok((id, result))
    }

    /// 读取结果并取回溢出字段
    pub fn load_result(&self, id: i64) -> Result<Option<(ClusterResultRecord, ClusterResult, ResolvedClusterResult)>> {
        match self.db.get_result(id)? {
            Some((record, result)) => {
                let resolved = result.resolve(&self.db)?;
                Ok(Some((record, result, resolved)))
            }
            None => Ok(None),
        }
    }
}
