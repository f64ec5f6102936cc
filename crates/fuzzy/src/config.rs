//! 摘要生成配置

/// 摘要生成配置
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// 单个 APK 最多展开的条目数
    pub max_entries: usize,
    /// 容器内单个成员的最大字节数，超出则跳过
    pub max_member_bytes: u64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_member_bytes: 256 * 1024 * 1024,
        }
    }
}

impl DigestConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LINEAGE_MAX_ENTRIES") {
            if let Ok(n) = v.parse() {
                config.max_entries = n;
            }
        }

        if let Ok(v) = std::env::var("LINEAGE_MAX_MEMBER_BYTES") {
            if let Ok(n) = v.parse() {
                config.max_member_bytes = n;
            }
        }

        config
    }
}
