//! 摘要算法与统一的生成 / 比较接口

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};
use crate::{lzjd, tlsh};

/// 摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    Tlsh,
    Ssdeep,
    Lzjd,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tlsh => "TLSH",
            Self::Ssdeep => "SSDEEP",
            Self::Lzjd => "LZJD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TLSH" => Some(Self::Tlsh),
            "SSDEEP" => Some(Self::Ssdeep),
            "LZJD" => Some(Self::Lzjd),
            _ => None,
        }
    }

    /// 获取算法实现；SSDEEP 仅作为模型的一部分，不提供生成
    pub fn hasher(&self) -> Result<&'static dyn FuzzyHasher> {
        match self {
            Self::Tlsh => Ok(&tlsh::Tlsh),
            Self::Lzjd => Ok(&lzjd::Lzjd),
            Self::Ssdeep => Err(DigestError::UnsupportedAlgorithm(*self)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模糊哈希算法
///
/// `compare` 返回距离：0 表示相同，越大越不相似，没有固定上界。
pub trait FuzzyHasher: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    fn hash(&self, data: &[u8]) -> Result<String>;

    fn compare(&self, a: &str, b: &str) -> Result<u32>;
}
