//! 引擎配置与数据库路径

use std::path::PathBuf;

use crate::result::DEFAULT_SPILL_CEILING;

/// 聚类引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 单个字段序列化后超过该字节数即溢出到块存储
    pub spill_ceiling: usize,
    /// 是否用 rayon 并行计算距离行
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spill_ceiling: DEFAULT_SPILL_CEILING,
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LINEAGE_SPILL_CEILING") {
            if let Ok(n) = v.parse() {
                config.spill_ceiling = n;
            }
        }

        if let Ok(v) = std::env::var("LINEAGE_PARALLEL") {
            config.parallel = !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
        }

        config
    }
}

/// 数据库路径: `LINEAGE_DB`，否则 `~/.lineage/lineage.db`
pub fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("LINEAGE_DB") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lineage")
        .join("lineage.db")
}
