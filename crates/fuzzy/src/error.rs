//! 摘要错误定义

use thiserror::Error;

use crate::algorithm::Algorithm;

#[derive(Error, Debug)]
pub enum DigestError {
    /// 输入过短或分布过于单一，无法生成有意义的摘要（应跳过该文件）
    #[error("insufficient entropy for {algorithm}: {reason}")]
    InsufficientEntropy { algorithm: Algorithm, reason: String },
    #[error("digest length mismatch: {left} vs {right}")]
    DigestLengthMismatch { left: usize, right: usize },
    #[error("algorithm mismatch: {left} vs {right}")]
    AlgorithmMismatch { left: Algorithm, right: Algorithm },
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("invalid {algorithm} digest: {reason}")]
    InvalidDigest { algorithm: Algorithm, reason: String },
    /// APK / ELF 内部结构无法解析，调用方应退化为普通文件摘要
    #[error("container parse error: {0}")]
    ContainerParse(String),
    #[error("sub-digest key collision while mapping storage keys: {0}")]
    SanitizeCollision(String),
    #[error("flat file {0} cannot carry sub-digests")]
    UnexpectedSubDigests(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DigestError {
    /// 是否属于"跳过即可"的错误
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::InsufficientEntropy { .. })
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
