//! 分带相似度索引
//!
//! 把定长摘要按固定宽度切成若干列，以 (列偏移, 子串) 为键记录包含该子串的成员。
//! 查询时统计每个成员命中的列数，达到阈值的成员才作为候选，再由引擎计算精确距离。
//!
//! 这是启发式预筛：`band_width` 越大、`band_width_threshold` 越高，候选越少，
//! 漏掉真实相似对（假阴性）的概率也越高。
//!
//! TLSH 摘要都以 `T1` 版本前缀开头。`band_width <= 2` 时偏移 0 的列对所有成员相同，
//! 每个成员因此白得一次命中，该键的成员表也随语料线性增长；这时 `band_width_threshold`
//! 需要比预期多 1 才能起到同样的筛选作用。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use fuzzy::{tlsh, Digest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 索引错误
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid index parameter: {0}")]
    InvalidParameter(String),
    #[error("digest length mismatch for {member}: index expects {expected}, got {actual}")]
    DigestLengthMismatch { member: String, expected: usize, actual: usize },
    #[error("invalid digest for {member}: {reason}")]
    InvalidDigest { member: String, reason: String },
    #[error("member {0} indexed twice")]
    DuplicateMember(String),
    #[error("corrupt index: {0}")]
    Corrupt(String),
    #[error("index rebuild already in progress")]
    LockHeld,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// 索引参数；`band_width_threshold` 没有默认值，必须由调用方给出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub table_length: usize,
    pub band_width: usize,
    pub band_width_threshold: usize,
}

impl IndexParams {
    /// `table_length` 取 TLSH 摘要长度
    pub fn new(band_width: usize, band_width_threshold: usize) -> Result<Self> {
        let params = Self {
            table_length: tlsh::DIGEST_LEN,
            band_width,
            band_width_threshold,
        };
        params.check()?;
        Ok(params)
    }

    pub fn with_table_length(self, table_length: usize) -> Result<Self> {
        let params = Self { table_length, ..self };
        params.check()?;
        Ok(params)
    }

    /// 每个摘要贡献的列数: ceil(table_length / band_width)
    pub fn band_count(&self) -> usize {
        self.table_length.div_ceil(self.band_width)
    }

    /// 偏移 0 的列完全落在 TLSH 版本前缀内，对所有成员都相同
    pub fn prefix_band_shared(&self) -> bool {
        self.table_length == tlsh::DIGEST_LEN && self.band_width <= tlsh::VERSION_PREFIX.len()
    }

    fn check(&self) -> Result<()> {
        if self.table_length == 0 {
            return Err(IndexError::InvalidParameter("table_length must be > 0".into()));
        }
        if self.band_width == 0 {
            return Err(IndexError::InvalidParameter("band_width must be > 0".into()));
        }
        if self.band_width_threshold == 0 {
            return Err(IndexError::InvalidParameter("band_width_threshold must be > 0".into()));
        }
        Ok(())
    }

    /// (offset, band) 序列
    fn bands<'a>(&self, member: &str, value: &'a str) -> Result<Vec<(usize, &'a str)>> {
        if value.len() != self.table_length {
            return Err(IndexError::DigestLengthMismatch {
                member: member.to_string(),
                expected: self.table_length,
                actual: value.len(),
            });
        }
        if !value.is_ascii() {
            return Err(IndexError::InvalidDigest {
                member: member.to_string(),
                reason: "non-ASCII digest".to_string(),
            });
        }
        Ok((0..self.table_length)
            .step_by(self.band_width)
            .map(|offset| {
                let end = (offset + self.band_width).min(self.table_length);
                (offset, &value[offset..end])
            })
            .collect())
    }
}

/// 分带键：列偏移 + 该列子串
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BandKey {
    pub offset: usize,
    pub band: String,
}

/// 分带索引，构建后只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredIndex", try_from = "StoredIndex")]
pub struct SimilarityIndex {
    params: IndexParams,
    member_count: usize,
    bands: HashMap<BandKey, BTreeSet<String>>,
}

impl SimilarityIndex {
    /// 构建索引；成员 ID 为 `owner_file_id`
    pub fn build(digests: &[Digest], params: IndexParams) -> Result<Self> {
        params.check()?;
        if params.prefix_band_shared() {
            tracing::warn!(
                "band width {} puts the constant TLSH version prefix in its own band; \
                 every member gets one free hit towards threshold {}",
                params.band_width,
                params.band_width_threshold
            );
        }

        let mut bands: HashMap<BandKey, BTreeSet<String>> = HashMap::new();
        let mut seen = BTreeSet::new();

        for digest in digests {
            let member = digest.owner_file_id();
            if !seen.insert(member) {
                return Err(IndexError::DuplicateMember(member.to_string()));
            }
            for (offset, band) in params.bands(member, digest.value())? {
                bands
                    .entry(BandKey { offset, band: band.to_string() })
                    .or_default()
                    .insert(member.to_string());
            }
        }

        tracing::info!(
            "built similarity index: {} members, {} band keys (width {}, threshold {})",
            seen.len(),
            bands.len(),
            params.band_width,
            params.band_width_threshold
        );

        Ok(Self { params, member_count: seen.len(), bands })
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn table_length(&self) -> usize {
        self.params.table_length
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn is_empty(&self) -> bool {
        self.member_count == 0
    }

    pub fn band_key_count(&self) -> usize {
        self.bands.len()
    }

    pub fn members_for(&self, key: &BandKey) -> Option<&BTreeSet<String>> {
        self.bands.get(key)
    }

    /// 候选成员（可能包含查询摘要自身）
    pub fn candidates(&self, digest: &Digest) -> Result<BTreeSet<String>> {
        self.candidates_for_value(digest.owner_file_id(), digest.value())
    }

    /// 按摘要值查询候选；`member` 仅用于错误信息
    pub fn candidates_for_value(&self, member: &str, value: &str) -> Result<BTreeSet<String>> {
        let mut tally: HashMap<&str, usize> = HashMap::new();

        for (offset, band) in self.params.bands(member, value)? {
            let key = BandKey { offset, band: band.to_string() };
            if let Some(members) = self.bands.get(&key) {
                for m in members {
                    *tally.entry(m.as_str()).or_insert(0) += 1;
                }
            }
        }

        Ok(tally
            .into_iter()
            .filter(|(_, hits)| *hits >= self.params.band_width_threshold)
            .map(|(m, _)| m.to_string())
            .collect())
    }

    /// 检查索引结构：参数、键的偏移与宽度、每个成员恰好出现 band_count 次
    pub fn validate(&self) -> Result<()> {
        self.params.check()?;
        let p = &self.params;

        let mut per_member: HashMap<&str, usize> = HashMap::new();
        for (key, members) in &self.bands {
            if key.offset >= p.table_length || key.offset % p.band_width != 0 {
                return Err(IndexError::Corrupt(format!("bad band offset {}", key.offset)));
            }
            let width = p.band_width.min(p.table_length - key.offset);
            if key.band.len() != width {
                return Err(IndexError::Corrupt(format!(
                    "band at offset {} has width {}, expected {}",
                    key.offset,
                    key.band.len(),
                    width
                )));
            }
            for m in members {
                *per_member.entry(m.as_str()).or_insert(0) += 1;
            }
        }

        if per_member.len() != self.member_count {
            return Err(IndexError::Corrupt(format!(
                "{} members recorded, {} found in bands",
                self.member_count,
                per_member.len()
            )));
        }
        let expected = p.band_count();
        if let Some((m, n)) = per_member.iter().find(|(_, n)| **n != expected) {
            return Err(IndexError::Corrupt(format!(
                "member {} has {} band entries, expected {}",
                m, n, expected
            )));
        }
        Ok(())
    }

    pub fn to_storage(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_storage(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 构建索引
pub fn build_index(digests: &[Digest], params: IndexParams) -> Result<SimilarityIndex> {
    SimilarityIndex::build(digests, params)
}

/// 持久化形式：分带表按 (offset, band) 排序，输出稳定
#[derive(Serialize, Deserialize)]
struct StoredIndex {
    params: IndexParams,
    member_count: usize,
    bands: Vec<StoredBand>,
}

#[derive(Serialize, Deserialize)]
struct StoredBand {
    offset: usize,
    band: String,
    members: BTreeSet<String>,
}

impl From<SimilarityIndex> for StoredIndex {
    fn from(index: SimilarityIndex) -> Self {
        let sorted: BTreeMap<BandKey, BTreeSet<String>> = index.bands.into_iter().collect();
        Self {
            params: index.params,
            member_count: index.member_count,
            bands: sorted
                .into_iter()
                .map(|(key, members)| StoredBand { offset: key.offset, band: key.band, members })
                .collect(),
        }
    }
}

impl TryFrom<StoredIndex> for SimilarityIndex {
    type Error = IndexError;

    fn try_from(stored: StoredIndex) -> Result<Self> {
        let mut bands = HashMap::with_capacity(stored.bands.len());
        for b in stored.bands {
            let key = BandKey { offset: b.offset, band: b.band };
            if bands.insert(key.clone(), b.members).is_some() {
                return Err(IndexError::Corrupt(format!(
                    "duplicate band key ({}, {})",
                    key.offset, key.band
                )));
            }
        }
        let index = Self { params: stored.params, member_count: stored.member_count, bands };
        index.validate()?;
        Ok(index)
    }
}

/// 索引重建的互斥锁，由部署方提供（分布式锁、文件锁等）
pub trait IndexLock {
    /// 获取锁；已被占用时返回 `LockHeld`
    fn acquire(&self) -> Result<()>;

    fn release(&self);
}

/// 进程内锁
#[derive(Debug, Default)]
pub struct LocalIndexLock {
    held: AtomicBool,
}

impl LocalIndexLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl IndexLock for LocalIndexLock {
    fn acquire(&self) -> Result<()> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| IndexError::LockHeld)
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

struct LockGuard<'a>(&'a dyn IndexLock);

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// 持锁重建索引
pub fn rebuild_index_locked(
    lock: &dyn IndexLock,
    digests: &[Digest],
    params: IndexParams,
) -> Result<SimilarityIndex> {
    lock.acquire()?;
    let _guard = LockGuard(lock);
    SimilarityIndex::build(digests, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuzzy::Algorithm;

    fn digest(id: &str, value: &str) -> Digest {
        Digest::flat(id, format!("{}.bin", id), Algorithm::Tlsh, value)
    }

    fn params(width: usize, threshold: usize, len: usize) -> IndexParams {
        IndexParams::new(width, threshold).unwrap().with_table_length(len).unwrap()
    }

    #[test]
    fn test_band_entries_per_digest() {
        // 长度 9、宽度 2 -> 5 列，最后一列宽度 1
        let p = params(2, 1, 9);
        assert_eq!(p.band_count(), 5);

        let index = SimilarityIndex::build(&[digest("a", "AABBCCDDE")], p).unwrap();
        assert_eq!(index.band_key_count(), 5);
        assert!(index
            .members_for(&BandKey { offset: 8, band: "E".into() })
            .is_some_and(|m| m.contains("a")));
        index.validate().unwrap();
    }

    #[test]
    fn test_empty_index_is_valid() {
        let index = SimilarityIndex::build(&[], params(4, 2, 8)).unwrap();
        assert!(index.is_empty());
        index.validate().unwrap();
        assert!(index.candidates(&digest("q", "AAAABBBB")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(IndexParams::new(0, 1), Err(IndexError::InvalidParameter(_))));
        assert!(matches!(IndexParams::new(4, 0), Err(IndexError::InvalidParameter(_))));
        let p = IndexParams { table_length: 8, band_width: 0, band_width_threshold: 1 };
        assert!(matches!(SimilarityIndex::build(&[], p), Err(IndexError::InvalidParameter(_))));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let p = params(2, 1, 8);
        let err = SimilarityIndex::build(&[digest("a", "AABBCCDD"), digest("b", "AABBCC")], p).unwrap_err();
        assert!(matches!(err, IndexError::DigestLengthMismatch { expected: 8, actual: 6, .. }));

        let index = SimilarityIndex::build(&[digest("a", "AABBCCDD")], p).unwrap();
        assert!(matches!(
            index.candidates(&digest("q", "AABBCCDDEE")),
            Err(IndexError::DigestLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_candidates_respect_threshold() {
        let digests = [
            digest("a", "AABBCCDD"),
            digest("b", "AABBCCXX"), // 3 列相同
            digest("c", "AAYYZZXX"), // 与 a 1 列相同
            digest("d", "QQRRSSTT"),
        ];
        let query = digest("a", "AABBCCDD");

        let loose = SimilarityIndex::build(&digests, params(2, 1, 8)).unwrap();
        let got: Vec<String> = loose.candidates(&query).unwrap().into_iter().collect();
        assert_eq!(got, vec!["a", "b", "c"]);

        let strict = SimilarityIndex::build(&digests, params(2, 3, 8)).unwrap();
        let got: Vec<String> = strict.candidates(&query).unwrap().into_iter().collect();
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let err = SimilarityIndex::build(&[digest("a", "AABBCCDD"), digest("a", "AABBCCDD")], params(2, 1, 8))
            .unwrap_err();
        assert!(matches!(err, IndexError::DuplicateMember(_)));
    }

    #[test]
    fn test_storage_roundtrip() {
        let digests = [digest("a", "AABBCCDD"), digest("b", "AABBCCXX")];
        let index = SimilarityIndex::build(&digests, params(3, 2, 8)).unwrap();
        let bytes = index.to_storage().unwrap();
        assert_eq!(SimilarityIndex::from_storage(&bytes).unwrap(), index);
        // 稳定输出
        assert_eq!(index.clone().to_storage().unwrap(), bytes);
    }

    #[test]
    fn test_corrupt_index_detected() {
        let digests = [digest("a", "AABBCCDD")];
        let index = SimilarityIndex::build(&digests, params(2, 1, 8)).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&index.to_storage().unwrap()).unwrap();

        // 删掉一列，成员的列数不再等于 band_count
        doc["bands"].as_array_mut().unwrap().pop();
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert!(SimilarityIndex::from_storage(&bytes).is_err());
    }

    #[test]
    fn test_rebuild_locked() {
        let lock = LocalIndexLock::new();
        let digests = [digest("a", "AABBCCDD")];

        lock.acquire().unwrap();
        assert!(matches!(
            rebuild_index_locked(&lock, &digests, params(2, 1, 8)),
            Err(IndexError::LockHeld)
        ));
        lock.release();

        let index = rebuild_index_locked(&lock, &digests, params(2, 1, 8)).unwrap();
        assert_eq!(index.member_count(), 1);
        assert!(!lock.is_held());

        // 构建失败同样释放锁
        assert!(rebuild_index_locked(&lock, &[digest("x", "AB")], params(2, 1, 8)).is_err());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_version_prefix_band_is_shared() {
        let a = format!("T1{}", "A".repeat(70));
        let b = format!("T1{}", "B".repeat(70));
        let p = IndexParams::new(2, 1).unwrap();
        assert!(p.prefix_band_shared());
        assert_eq!(p.band_count(), 36);

        let digests = [digest("a", &a), digest("b", &b)];
        let index = SimilarityIndex::build(&digests, p).unwrap();
        index.validate().unwrap();
        let shared = index.members_for(&BandKey { offset: 0, band: "T1".into() }).unwrap();
        assert_eq!(shared.len(), 2);

        // 阈值 1 时前缀列让不相关的摘要也成为候选，阈值多加 1 即可排除
        let got: Vec<String> = index.candidates(&digests[0]).unwrap().into_iter().collect();
        assert_eq!(got, vec!["a", "b"]);
        let strict = SimilarityIndex::build(&digests, IndexParams::new(2, 2).unwrap()).unwrap();
        let got: Vec<String> = strict.candidates(&digests[0]).unwrap().into_iter().collect();
        assert_eq!(got, vec!["a"]);

        assert!(!IndexParams::new(3, 1).unwrap().prefix_band_shared());
        assert!(!params(2, 1, 8).prefix_band_shared());
    }

    #[test]
    fn test_real_tlsh_digests() {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        let a = fuzzy::tlsh::hash(&data).unwrap();
        let p = IndexParams::new(6, 2).unwrap();
        let index = SimilarityIndex::build(&[digest("a", &a)], p).unwrap();
        assert_eq!(index.table_length(), 72);
        assert_eq!(index.band_key_count(), 12);
        assert!(index.candidates(&digest("a", &a)).unwrap().contains("a"));
    }
}
