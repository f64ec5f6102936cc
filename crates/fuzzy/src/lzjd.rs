//! LZJD (Lempel-Ziv Jaccard Distance)
//!
//! 以 LZ 方式切分字节串得到子串集合，取哈希值最小的 k 个作为 bottom-k 签名，
//! 摘要为排序后大端 u32 序列的 base64。摘要长度随输入变化，不参与分带索引。

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::algorithm::{Algorithm, FuzzyHasher};
use crate::error::{DigestError, Result};

/// 签名大小
pub const SIGNATURE_SIZE: usize = 1024;

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// LZJD 实现
pub struct Lzjd;

impl FuzzyHasher for Lzjd {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lzjd
    }

    fn hash(&self, data: &[u8]) -> Result<String> {
        hash(data)
    }

    fn compare(&self, a: &str, b: &str) -> Result<u32> {
        compare(a, b)
    }
}

/// 生成 LZJD 摘要
pub fn hash(data: &[u8]) -> Result<String> {
    let mut seen: HashSet<u32> = HashSet::new();
    let mut h = FNV_OFFSET;

    for &byte in data {
        h = (h ^ byte as u32).wrapping_mul(FNV_PRIME);
        if seen.insert(h) {
            // 新子串入集合，从下一个字节重新开始
            h = FNV_OFFSET;
        }
    }

    if seen.is_empty() {
        return Err(DigestError::InsufficientEntropy {
            algorithm: Algorithm::Lzjd,
            reason: "no substrings".to_string(),
        });
    }

    let mut signature: Vec<u32> = seen.into_iter().collect();
    signature.sort_unstable();
    signature.truncate(SIGNATURE_SIZE);

    let bytes: Vec<u8> = signature.iter().flat_map(|v| v.to_be_bytes()).collect();
    Ok(STANDARD.encode(bytes))
}

/// 距离 = round(100 * (1 - Jaccard 估计))
pub fn compare(a: &str, b: &str) -> Result<u32> {
    let a = decode(a)?;
    let b = decode(b)?;

    let k = SIGNATURE_SIZE.min(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    let (mut taken, mut shared) = (0usize, 0usize);

    // 合并两个有序签名，取并集中最小的 k 个
    while taken < k && (i < a.len() || j < b.len()) {
        match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) if x == y => {
                shared += 1;
                i += 1;
                j += 1;
            }
            (Some(x), Some(y)) if x < y => i += 1,
            (Some(_), Some(_)) => j += 1,
            (Some(_), None) => i += 1,
            (None, Some(_)) => j += 1,
            (None, None) => break,
        }
        taken += 1;
    }

    if taken == 0 {
        return Ok(0);
    }
    let similarity = shared as f64 / taken as f64;
    Ok(((1.0 - similarity) * 100.0).round() as u32)
}

fn decode(s: &str) -> Result<Vec<u32>> {
    let bytes = STANDARD.decode(s).map_err(|e| DigestError::InvalidDigest {
        algorithm: Algorithm::Lzjd,
        reason: e.to_string(),
    })?;
    if bytes.len() % 4 != 0 {
        return Err(DigestError::InvalidDigest {
            algorithm: Algorithm::Lzjd,
            reason: format!("{} bytes is not a multiple of 4", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlsh::tests::noise;

    #[test]
    fn test_identity_and_symmetry() {
        let a = hash(&noise(20_000, 1)).unwrap();
        let b = hash(&noise(20_000, 2)).unwrap();
        assert_eq!(compare(&a, &a).unwrap(), 0);
        assert_eq!(compare(&a, &b).unwrap(), compare(&b, &a).unwrap());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(hash(&[]).unwrap_err().is_skip());
    }

    #[test]
    fn test_shared_prefix_is_closer() {
        let base = noise(20_000, 11);
        let mut near = base.clone();
        near.extend(noise(2_000, 12));
        let far = noise(20_000, 13);

        let h = hash(&base).unwrap();
        let d_near = compare(&h, &hash(&near).unwrap()).unwrap();
        let d_far = compare(&h, &hash(&far).unwrap()).unwrap();
        assert!(d_near < d_far, "near={} far={}", d_near, d_far);
    }

    #[test]
    fn test_invalid_digest() {
        assert!(matches!(
            compare("!!!", "AAAA"),
            Err(DigestError::InvalidDigest { .. })
        ));
    }
}
