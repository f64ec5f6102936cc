//! 数据库类型定义

use fuzzy::{Algorithm, Digest};

use crate::index::IndexParams;
use crate::result::Method;

/// 摘要记录
#[derive(Debug, Clone, PartialEq)]
pub struct DigestRecord {
    /// 已还原键名的摘要
    pub digest: Digest,
    pub firmware_id: Option<String>,
    pub created_at: String,
}

/// 摘要失败的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub file_id: String,
    pub algorithm: Algorithm,
    pub filename: String,
    pub firmware_id: Option<String>,
    pub reason: String,
}

/// 索引快照元数据
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: i64,
    pub algorithm: Algorithm,
    pub params: IndexParams,
    pub member_count: usize,
    pub created_at: String,
}

/// 聚类结果摘要信息（不含文档本体）
#[derive(Debug, Clone)]
pub struct ClusterResultRecord {
    pub id: i64,
    pub method: Method,
    pub algorithm: Algorithm,
    pub member_count: usize,
    pub skipped_count: usize,
    pub distance_threshold: i32,
    pub regex_filter: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}
