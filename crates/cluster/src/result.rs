//! 聚类结果模型
//!
//! `distances`、`distances_unfiltered`、`groups` 序列化后超过上限时写入块存储，
//! 文档内只保留空占位和块引用。溢出只发生在 `finalize` 中。

use std::collections::BTreeSet;

use fuzzy::Algorithm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::blob::{BlobRef, BlobStore};
use crate::engine::{ClusterError, Result};
use crate::graph::{DistanceMap, WeightedGraph};

/// 默认溢出上限（字节）
pub const DEFAULT_SPILL_CEILING: usize = 8 * 1024;

/// 距离计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Exhaustive,
    Indexed,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhaustive => "EXHAUSTIVE",
            Self::Indexed => "INDEXED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EXHAUSTIVE" => Some(Self::Exhaustive),
            "INDEXED" => Some(Self::Indexed),
            _ => None,
        }
    }
}

/// 一次聚类运行的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterParams {
    pub method: Method,
    /// 小于 0 表示不过滤
    pub distance_threshold: i32,
    pub regex_filter: Option<String>,
    pub description: Option<String>,
    /// 上游摘要失败而未进入成员集的文件数
    pub skipped_count: usize,
}

impl ClusterParams {
    pub fn new(method: Method, distance_threshold: i32) -> Self {
        Self {
            method,
            distance_threshold,
            regex_filter: None,
            description: None,
            skipped_count: 0,
        }
    }
}

/// 可能溢出到块存储的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spillable<T> {
    #[serde(default)]
    inline: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob: Option<BlobRef>,
}

impl<T> Spillable<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    pub fn inline(value: T) -> Self {
        Self { inline: value, blob: None }
    }

    /// 序列化后超过 `ceiling` 字节则写入块存储
    fn spill(value: T, ceiling: usize, blobs: &dyn BlobStore, field: &str) -> Result<Self> {
        let bytes = serde_json::to_vec(&value)?;
        if bytes.len() <= ceiling {
            return Ok(Self::inline(value));
        }
        let blob = blobs.put(&bytes)?;
        tracing::info!("spilled {} ({} bytes) to blob {}", field, bytes.len(), blob);
        Ok(Self { inline: T::default(), blob: Some(blob) })
    }

    pub fn is_spilled(&self) -> bool {
        self.blob.is_some()
    }

    /// 未溢出时的内联内容
    pub fn as_inline(&self) -> Option<&T> {
        match self.blob {
            Some(_) => None,
            None => Some(&self.inline),
        }
    }

    pub fn blob(&self) -> Option<&BlobRef> {
        self.blob.as_ref()
    }

    /// 取回完整内容
    pub fn resolve(&self, blobs: &dyn BlobStore) -> Result<T> {
        match &self.blob {
            Some(blob) => Ok(serde_json::from_slice(&blobs.get(blob)?)?),
            None => Ok(self.inline.clone()),
        }
    }
}

/// 引擎交给 `finalize` 的运行产物
#[derive(Debug)]
pub struct ClusterRun {
    pub algorithm: Algorithm,
    pub member_count: usize,
    pub distances: DistanceMap,
    pub distances_unfiltered: DistanceMap,
    pub groups: Vec<BTreeSet<String>>,
    pub graph: WeightedGraph,
}

/// 一次聚类运行的结果，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    member_count: usize,
    skipped_count: usize,
    distance_threshold: i32,
    method: Method,
    algorithm: Algorithm,
    regex_filter: Option<String>,
    description: Option<String>,
    distances: Spillable<DistanceMap>,
    distances_unfiltered: Spillable<DistanceMap>,
    groups: Spillable<Vec<BTreeSet<String>>>,
    group_count: usize,
    group_sizes: Spillable<Vec<usize>>,
    graph_blob: BlobRef,
}

/// 溢出字段全部取回后的结果内容
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedClusterResult {
    pub distances: DistanceMap,
    pub distances_unfiltered: DistanceMap,
    pub groups: Vec<BTreeSet<String>>,
    pub group_sizes: Vec<usize>,
    pub graph: WeightedGraph,
}

impl ClusterResult {
    /// 写入图数据并对超限字段执行溢出
    pub fn finalize(
        run: ClusterRun,
        params: &ClusterParams,
        blobs: &dyn BlobStore,
        spill_ceiling: usize,
    ) -> Result<Self> {
        let group_sizes: Vec<usize> = run.groups.iter().map(|g| g.len()).collect();
        check_partition(&group_sizes, run.member_count)?;

        let graph_blob = blobs.put(&run.graph.to_node_link_json()?)?;
        let group_count = run.groups.len();

        Ok(Self {
            member_count: run.member_count,
            skipped_count: params.skipped_count,
            distance_threshold: params.distance_threshold,
            method: params.method,
            algorithm: run.algorithm,
            regex_filter: params.regex_filter.clone(),
            description: params.description.clone(),
            distances: Spillable::spill(run.distances, spill_ceiling, blobs, "distances")?,
            distances_unfiltered: Spillable::spill(
                run.distances_unfiltered,
                spill_ceiling,
                blobs,
                "distances_unfiltered",
            )?,
            groups: Spillable::spill(run.groups, spill_ceiling, blobs, "groups")?,
            group_count,
            group_sizes: Spillable::spill(group_sizes, spill_ceiling, blobs, "group_sizes")?,
            graph_blob,
        })
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped_count
    }

    pub fn distance_threshold(&self) -> i32 {
        self.distance_threshold
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn regex_filter(&self) -> Option<&str> {
        self.regex_filter.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn distances(&self) -> &Spillable<DistanceMap> {
        &self.distances
    }

    pub fn distances_unfiltered(&self) -> &Spillable<DistanceMap> {
        &self.distances_unfiltered
    }

    pub fn groups(&self) -> &Spillable<Vec<BTreeSet<String>>> {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn group_sizes(&self) -> &Spillable<Vec<usize>> {
        &self.group_sizes
    }

    pub fn graph_blob(&self) -> &BlobRef {
        &self.graph_blob
    }

    pub fn to_storage(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_storage(bytes: &[u8]) -> Result<Self> {
        let result: Self = serde_json::from_slice(bytes)?;
        // 溢出的 group_sizes 在 resolve 时再校验
        if let Some(sizes) = result.group_sizes.as_inline() {
            check_partition(sizes, result.member_count)?;
        }
        Ok(result)
    }

    pub fn resolve(&self, blobs: &dyn BlobStore) -> Result<ResolvedClusterResult> {
        let group_sizes = self.group_sizes.resolve(blobs)?;
        check_partition(&group_sizes, self.member_count)?;
        Ok(ResolvedClusterResult {
            distances: self.distances.resolve(blobs)?,
            distances_unfiltered: self.distances_unfiltered.resolve(blobs)?,
            groups: self.groups.resolve(blobs)?,
            group_sizes,
            graph: WeightedGraph::from_node_link_json(&blobs.get(&self.graph_blob)?)?,
        })
    }
}

fn check_partition(group_sizes: &[usize], member_count: usize) -> Result<()> {
    let total: usize = group_sizes.iter().sum();
    if total != member_count {
        return Err(ClusterError::InvalidPartition { grouped: total, member_count });
    }
    Ok(())
}
