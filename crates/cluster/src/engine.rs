//! 距离计算与聚类引擎
//!
//! 一次运行: 选定成员 -> 计算距离 -> 阈值过滤 -> 建图 -> 连通分量 -> 生成结果。
//! 任一步失败整次运行失败，不产生部分结果。

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fuzzy::{Algorithm, Digest, DigestError};
use rayon::prelude::*;
use thiserror::Error;

use crate::blob::{BlobError, BlobStore};
use crate::config::EngineConfig;
use crate::graph::{DistanceMap, WeightedGraph};
use crate::index::{IndexError, SimilarityIndex};
use crate::result::{ClusterParams, ClusterResult, ClusterRun, Method};

/// 聚类错误
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("need at least 2 members to cluster, got {0}")]
    InsufficientMembers(usize),
    #[error("INDEXED clustering requires a similarity index")]
    IndexMissing,
    #[error("member {0} appears more than once")]
    DuplicateMember(String),
    #[error("node label {0} is shared by more than one member")]
    DuplicateLabel(String),
    #[error("clustering run cancelled")]
    Cancelled,
    #[error("groups cover {grouped} members, expected {member_count}")]
    InvalidPartition { grouped: usize, member_count: usize },
    #[error("digest error: {0}")]
    Digest(#[from] DigestError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// 协作式取消标志，在每个成员的距离行开始前检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 聚类引擎
pub struct ClusterEngine<'a> {
    blobs: &'a dyn BlobStore,
    config: EngineConfig,
    cancel: CancelFlag,
}

impl<'a> ClusterEngine<'a> {
    pub fn new(blobs: &'a dyn BlobStore) -> Self {
        Self {
            blobs,
            config: EngineConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// 对成员集聚类；`method` 为 INDEXED 时必须提供索引
    pub fn cluster(
        &self,
        members: &[Digest],
        params: &ClusterParams,
        index: Option<&SimilarityIndex>,
    ) -> Result<ClusterResult> {
        if members.len() < 2 {
            return Err(ClusterError::InsufficientMembers(members.len()));
        }
        let index = match params.method {
            Method::Indexed => Some(index.ok_or(ClusterError::IndexMissing)?),
            Method::Exhaustive => None,
        };

        let sorted = sort_members(members)?;
        let algorithm = common_algorithm(&sorted)?;
        if let Some(index) = index {
            index.validate()?;
        }

        tracing::info!(
            "clustering {} members ({}, {}, threshold {})",
            sorted.len(),
            algorithm,
            params.method.as_str(),
            params.distance_threshold
        );

        let rows = compute_rows(&sorted, index, &self.cancel, self.config.parallel)?;
        let unfiltered = label_distances(&sorted, &rows);
        let filtered = filter_distances(&unfiltered, params.distance_threshold);

        let labels: Vec<String> = sorted.iter().map(|d| d.node_label()).collect();
        let graph = WeightedGraph::from_distances(labels, &filtered);
        let groups = graph.connected_components();

        tracing::info!(
            "{} pairs computed, {} kept, {} groups",
            pair_count(&unfiltered),
            pair_count(&filtered),
            groups.len()
        );

        let run = ClusterRun {
            algorithm,
            member_count: sorted.len(),
            distances: filtered,
            distances_unfiltered: unfiltered,
            groups,
            graph,
        };
        ClusterResult::finalize(run, params, self.blobs, self.config.spill_ceiling)
    }
}

/// 丢弃自环和超过阈值的距离；阈值小于 0 时只丢自环
pub fn filter_distances(distances: &DistanceMap, threshold: i32) -> DistanceMap {
    let mut out = DistanceMap::new();
    for (a, row) in distances {
        for (b, &d) in row {
            if a == b || (threshold >= 0 && i64::from(d) > i64::from(threshold)) {
                continue;
            }
            out.entry(a.clone()).or_default().insert(b.clone(), d);
        }
    }
    out
}

fn sort_members(members: &[Digest]) -> Result<Vec<&Digest>> {
    let mut sorted: Vec<&Digest> = members.iter().collect();
    sorted.sort_by(|a, b| a.owner_file_id().cmp(b.owner_file_id()));
    if let Some(pair) = sorted.windows(2).find(|w| w[0].owner_file_id() == w[1].owner_file_id()) {
        return Err(ClusterError::DuplicateMember(pair[0].owner_file_id().to_string()));
    }
    // 文件名或 id 含 ':' 时不同成员可能得到相同标签
    let mut labels = HashSet::with_capacity(sorted.len());
    for d in &sorted {
        let label = d.node_label();
        if !labels.insert(label.clone()) {
            return Err(ClusterError::DuplicateLabel(label));
        }
    }
    Ok(sorted)
}

fn common_algorithm(members: &[&Digest]) -> Result<Algorithm> {
    let first = members[0].algorithm();
    if let Some(other) = members.iter().find(|d| d.algorithm() != first) {
        return Err(DigestError::AlgorithmMismatch { left: first, right: other.algorithm() }.into());
    }
    Ok(first)
}

/// 每个成员一行 (对方下标, 距离)，按成员顺序排列
fn compute_rows(
    members: &[&Digest],
    index: Option<&SimilarityIndex>,
    cancel: &CancelFlag,
    parallel: bool,
) -> Result<Vec<Vec<(usize, u32)>>> {
    let row = |i: usize| -> Result<Vec<(usize, u32)>> {
        if cancel.is_cancelled() {
            tracing::warn!("clustering cancelled at member {} of {}", i, members.len());
            return Err(ClusterError::Cancelled);
        }
        let me = members[i];
        let others: Vec<usize> = match index {
            None => (i + 1..members.len()).collect(),
            Some(index) => index
                .candidates(me)?
                .iter()
                .filter_map(|id| members.binary_search_by(|d| d.owner_file_id().cmp(id)).ok())
                .filter(|&j| j != i)
                .collect(),
        };
        others
            .into_iter()
            .map(|j| -> Result<(usize, u32)> { Ok((j, fuzzy::compare(me, members[j])?)) })
            .collect()
    };

    if parallel {
        (0..members.len()).into_par_iter().map(row).collect()
    } else {
        (0..members.len()).map(row).collect()
    }
}

/// 行结果转成按标签的对称距离表
fn label_distances(members: &[&Digest], rows: &[Vec<(usize, u32)>]) -> DistanceMap {
    let labels: Vec<String> = members.iter().map(|d| d.node_label()).collect();
    let mut out: DistanceMap = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        for &(j, d) in row {
            out.entry(labels[i].clone()).or_default().insert(labels[j].clone(), d);
            out.entry(labels[j].clone()).or_default().insert(labels[i].clone(), d);
        }
    }
    out
}

fn pair_count(distances: &DistanceMap) -> usize {
    distances.values().map(|row| row.len()).sum::<usize>() / 2
}
