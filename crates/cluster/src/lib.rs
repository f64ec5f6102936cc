//! cluster - 模糊摘要的近重复检测与聚类
//!
//! 分带索引预筛候选、计算成对距离、按阈值建图并取连通分量，结果超限部分溢出到块存储。

mod blob;
mod config;
mod engine;
mod graph;
mod index;
mod result;
mod select;
mod store;

pub mod db;

pub use blob::{BlobError, BlobRef, BlobStore, MemoryBlobStore};
pub use config::{get_db_path, EngineConfig};
pub use db::Database;
pub use engine::{filter_distances, CancelFlag, ClusterEngine, ClusterError};
pub use graph::{DistanceMap, Edge, WeightedGraph, MIN_EDGE_WEIGHT};
pub use index::{
    build_index, rebuild_index_locked, BandKey, IndexError, IndexLock, IndexParams, LocalIndexLock,
    SimilarityIndex,
};
pub use result::{
    ClusterParams, ClusterResult, ClusterRun, Method, ResolvedClusterResult, Spillable,
    DEFAULT_SPILL_CEILING,
};
pub use select::MemberSelector;
pub use store::{Store, StoreError};
