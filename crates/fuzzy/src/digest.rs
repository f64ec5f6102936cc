//! Digest 记录

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::error::{DigestError, Result};
use crate::keys::{restore_key, sanitize_key};

/// ELF 头部伪节名
pub const HEADER_SECTION: &str = "header";

/// 容器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Apk,
    Elf,
}

/// 子摘要：普通成员是单个摘要值，APK 内的 ELF 成员是按节的摘要表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubDigest {
    Value(String),
    Sections(BTreeMap<String, String>),
}

impl SubDigest {
    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            Self::Sections(_) => None,
        }
    }

    pub fn sections(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Value(_) => None,
            Self::Sections(s) => Some(s),
        }
    }
}

/// 单个文件的局部敏感摘要，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDigest")]
pub struct Digest {
    owner_file_id: String,
    filename: String,
    algorithm: Algorithm,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainerKind>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sub_digests: BTreeMap<String, SubDigest>,
}

#[derive(Deserialize)]
struct RawDigest {
    owner_file_id: String,
    filename: String,
    algorithm: Algorithm,
    value: String,
    #[serde(default)]
    container: Option<ContainerKind>,
    #[serde(default)]
    sub_digests: BTreeMap<String, SubDigest>,
}

impl TryFrom<RawDigest> for Digest {
    type Error = DigestError;

    fn try_from(raw: RawDigest) -> Result<Self> {
        if raw.container.is_none() && !raw.sub_digests.is_empty() {
            return Err(DigestError::UnexpectedSubDigests(raw.owner_file_id));
        }
        Ok(Self {
            owner_file_id: raw.owner_file_id,
            filename: raw.filename,
            algorithm: raw.algorithm,
            value: raw.value,
            container: raw.container,
            sub_digests: raw.sub_digests,
        })
    }
}

impl Digest {
    /// 普通文件摘要（无子摘要）
    pub fn flat(
        owner_file_id: impl Into<String>,
        filename: impl Into<String>,
        algorithm: Algorithm,
        value: impl Into<String>,
    ) -> Self {
        Self {
            owner_file_id: owner_file_id.into(),
            filename: filename.into(),
            algorithm,
            value: value.into(),
            container: None,
            sub_digests: BTreeMap::new(),
        }
    }

    /// 容器文件摘要
    pub fn container(
        owner_file_id: impl Into<String>,
        filename: impl Into<String>,
        algorithm: Algorithm,
        value: impl Into<String>,
        kind: ContainerKind,
        sub_digests: BTreeMap<String, SubDigest>,
    ) -> Self {
        Self {
            owner_file_id: owner_file_id.into(),
            filename: filename.into(),
            algorithm,
            value: value.into(),
            container: Some(kind),
            sub_digests,
        }
    }

    pub fn owner_file_id(&self) -> &str {
        &self.owner_file_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn container_kind(&self) -> Option<ContainerKind> {
        self.container
    }

    pub fn sub_digests(&self) -> &BTreeMap<String, SubDigest> {
        &self.sub_digests
    }

    pub fn sub_digest(&self, path: &str) -> Option<&SubDigest> {
        self.sub_digests.get(path)
    }

    /// 聚类图中的节点标签: "filename:id"，同名文件靠 id 区分
    pub fn node_label(&self) -> String {
        format!("{}:{}", self.filename, self.owner_file_id)
    }

    /// 清洗子摘要键名，用于写入文档存储
    pub fn sanitized(&self) -> Result<Self> {
        self.map_keys(sanitize_key)
    }

    /// 还原 `sanitized` 的键名；还原后出现重名视为错误
    pub fn restored(&self) -> Result<Self> {
        self.map_keys(restore_key)
    }

    fn map_keys(&self, f: fn(&str) -> String) -> Result<Self> {
        let mut sub_digests = BTreeMap::new();
        for (path, sub) in &self.sub_digests {
            let sub = match sub {
                SubDigest::Value(v) => SubDigest::Value(v.clone()),
                SubDigest::Sections(sections) => {
                    let mut mapped = BTreeMap::new();
                    for (name, v) in sections {
                        let key = f(name);
                        if mapped.insert(key.clone(), v.clone()).is_some() {
                            return Err(DigestError::SanitizeCollision(format!("{}/{}", path, key)));
                        }
                    }
                    SubDigest::Sections(mapped)
                }
            };
            let key = f(path);
            if sub_digests.insert(key.clone(), sub).is_some() {
                return Err(DigestError::SanitizeCollision(key));
            }
        }
        Ok(Self { sub_digests, ..self.clone() })
    }
}

/// 比较两个 Digest 的顶层摘要
pub fn compare(a: &Digest, b: &Digest) -> Result<u32> {
    if a.algorithm != b.algorithm {
        return Err(DigestError::AlgorithmMismatch { left: a.algorithm, right: b.algorithm });
    }
    a.algorithm.hasher()?.compare(&a.value, &b.value)
}
