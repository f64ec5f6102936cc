//! TLSH 局部敏感哈希（128 桶，1 字节校验和）
//!
//! 摘要格式: `"T1"` + 70 位大写十六进制，共 72 个字符。
//! 比较时也接受不带版本前缀的 70 位格式，但两侧长度必须一致。

use crate::algorithm::{Algorithm, FuzzyHasher};
use crate::error::{DigestError, Result};

/// 完整摘要长度（含 "T1" 前缀）
pub const DIGEST_LEN: usize = 72;
/// 最小输入长度
pub const MIN_DATA_LENGTH: usize = 50;
/// 版本前缀
pub const VERSION_PREFIX: &str = "T1";
const RAW_HEX_LEN: usize = 70;
const WINDOW: usize = 5;
const BUCKETS: usize = 256;
const EFF_BUCKETS: usize = 128;
const CODE_SIZE: usize = 32;
const RANGE_LVALUE: u32 = 256;
const RANGE_QRATIO: u32 = 16;
const LENGTH_MULT: u32 = 12;
const QRATIO_MULT: u32 = 12;

// Pearson 置换表
const V_TABLE: [u8; 256] = [
    1, 87, 49, 12, 176, 178, 102, 166, 121, 193, 6, 84, 249, 230, 44, 163,
    14, 197, 213, 181, 161, 85, 218, 80, 64, 239, 24, 226, 236, 142, 38, 200,
    110, 177, 104, 103, 141, 253, 255, 50, 77, 101, 81, 18, 45, 96, 31, 222,
    25, 107, 190, 70, 86, 237, 240, 34, 72, 242, 20, 214, 244, 227, 149, 235,
    97, 234, 57, 22, 60, 250, 82, 175, 208, 5, 127, 199, 111, 62, 135, 248,
    174, 169, 211, 58, 66, 154, 106, 195, 245, 171, 17, 187, 182, 179, 0, 243,
    132, 56, 148, 75, 128, 133, 158, 100, 130, 126, 91, 13, 153, 246, 216, 219,
    119, 68, 223, 78, 83, 88, 201, 99, 122, 11, 92, 32, 136, 114, 52, 10,
    138, 30, 48, 183, 156, 35, 61, 26, 143, 74, 251, 94, 129, 162, 63, 152,
    170, 7, 115, 167, 241, 206, 3, 150, 55, 59, 151, 220, 90, 53, 23, 131,
    125, 173, 15, 238, 79, 95, 89, 16, 105, 137, 225, 224, 217, 160, 37, 123,
    118, 73, 2, 157, 46, 116, 9, 145, 134, 228, 207, 212, 202, 215, 69, 229,
    27, 188, 67, 124, 168, 252, 42, 4, 29, 108, 21, 247, 19, 205, 39, 203,
    233, 40, 186, 147, 198, 192, 155, 33, 164, 191, 98, 204, 165, 180, 117, 76,
    140, 36, 210, 172, 41, 54, 159, 8, 185, 232, 113, 196, 231, 47, 146, 120,
    51, 65, 28, 144, 254, 221, 93, 189, 194, 139, 112, 43, 71, 109, 184, 209,
];

/// TLSH 实现
pub struct Tlsh;

impl FuzzyHasher for Tlsh {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Tlsh
    }

    fn hash(&self, data: &[u8]) -> Result<String> {
        hash(data)
    }

    fn compare(&self, a: &str, b: &str) -> Result<u32> {
        compare(a, b)
    }
}

/// 解析后的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TlshDigest {
    checksum: u8,
    lvalue: u8,
    q1ratio: u8,
    q2ratio: u8,
    code: [u8; CODE_SIZE],
}

impl TlshDigest {
    fn to_hex(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN);
        out.push_str(VERSION_PREFIX);
        push_hex(&mut out, swap_nibbles(self.checksum));
        push_hex(&mut out, swap_nibbles(self.lvalue));
        push_hex(&mut out, (self.q1ratio << 4) | self.q2ratio);
        for byte in self.code.iter().rev() {
            push_hex(&mut out, *byte);
        }
        out
    }

    fn from_hex(s: &str) -> Result<Self> {
        let raw = match s.len() {
            DIGEST_LEN if s.starts_with(VERSION_PREFIX) => &s[VERSION_PREFIX.len()..],
            RAW_HEX_LEN => s,
            len => return Err(invalid(format!("unexpected length {}", len))),
        };

        let bytes = raw
            .as_bytes()
            .chunks_exact(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|p| u8::from_str_radix(p, 16).ok())
                    .ok_or_else(|| invalid(format!("non-hex characters {:?}", String::from_utf8_lossy(pair))))
            })
            .collect::<Result<Vec<u8>>>()?;

        let mut code = [0u8; CODE_SIZE];
        for (i, byte) in bytes[3..].iter().enumerate() {
            code[CODE_SIZE - 1 - i] = *byte;
        }

        Ok(Self {
            checksum: swap_nibbles(bytes[0]),
            lvalue: swap_nibbles(bytes[1]),
            q1ratio: bytes[2] >> 4,
            q2ratio: bytes[2] & 0x0F,
            code,
        })
    }

    fn distance(&self, other: &Self) -> u32 {
        let mut diff = 0;

        match mod_diff(self.lvalue as u32, other.lvalue as u32, RANGE_LVALUE) {
            0 => {}
            1 => diff = 1,
            ldiff => diff += ldiff * LENGTH_MULT,
        }

        for (a, b) in [(self.q1ratio, other.q1ratio), (self.q2ratio, other.q2ratio)] {
            let qdiff = mod_diff(a as u32, b as u32, RANGE_QRATIO);
            diff += if qdiff <= 1 { qdiff } else { (qdiff - 1) * QRATIO_MULT };
        }

        if self.checksum != other.checksum {
            diff += 1;
        }

        diff + hamming_dibits(&self.code, &other.code)
    }
}

/// 生成 TLSH 摘要
pub fn hash(data: &[u8]) -> Result<String> {
    if data.len() < MIN_DATA_LENGTH {
        return Err(DigestError::InsufficientEntropy {
            algorithm: Algorithm::Tlsh,
            reason: format!("{} bytes, need at least {}", data.len(), MIN_DATA_LENGTH),
        });
    }

    let mut buckets = [0u32; BUCKETS];
    let mut checksum = 0u8;

    for window in data.windows(WINDOW) {
        let (j, j1, j2, j3, j4) = (window[4], window[3], window[2], window[1], window[0]);

        checksum = b_mapping(0, j, j1, checksum);
        buckets[b_mapping(2, j, j1, j2) as usize] += 1;
        buckets[b_mapping(3, j, j1, j3) as usize] += 1;
        buckets[b_mapping(5, j, j2, j3) as usize] += 1;
        buckets[b_mapping(7, j, j2, j4) as usize] += 1;
        buckets[b_mapping(11, j, j1, j4) as usize] += 1;
        buckets[b_mapping(13, j, j3, j4) as usize] += 1;
    }

    let effective = &buckets[..EFF_BUCKETS];
    let nonzero = effective.iter().filter(|&&c| c > 0).count();
    if nonzero <= 2 * CODE_SIZE {
        return Err(DigestError::InsufficientEntropy {
            algorithm: Algorithm::Tlsh,
            reason: format!("only {} of {} buckets populated", nonzero, EFF_BUCKETS),
        });
    }

    let mut sorted = effective.to_vec();
    sorted.sort_unstable();
    let (q1, q2, q3) = (
        sorted[EFF_BUCKETS / 4 - 1],
        sorted[EFF_BUCKETS / 2 - 1],
        sorted[EFF_BUCKETS * 3 / 4 - 1],
    );
    if q3 == 0 {
        return Err(DigestError::InsufficientEntropy {
            algorithm: Algorithm::Tlsh,
            reason: "third quartile is zero".to_string(),
        });
    }

    let mut code = [0u8; CODE_SIZE];
    for (i, slot) in code.iter_mut().enumerate() {
        let mut h = 0u8;
        for j in 0..4 {
            let k = effective[4 * i + j];
            if q3 < k {
                h += 3 << (j * 2);
            } else if q2 < k {
                h += 2 << (j * 2);
            } else if q1 < k {
                h += 1 << (j * 2);
            }
        }
        *slot = h;
    }

    let digest = TlshDigest {
        checksum,
        lvalue: l_capturing(data.len()),
        q1ratio: ((q1 as u64 * 100 / q3 as u64) % 16) as u8,
        q2ratio: ((q2 as u64 * 100 / q3 as u64) % 16) as u8,
        code,
    };
    Ok(digest.to_hex())
}

/// 比较两个 TLSH 摘要（包含长度差异项）
pub fn compare(a: &str, b: &str) -> Result<u32> {
    if a.len() != b.len() {
        return Err(DigestError::DigestLengthMismatch { left: a.len(), right: b.len() });
    }
    let a = TlshDigest::from_hex(a)?;
    let b = TlshDigest::from_hex(b)?;
    Ok(a.distance(&b))
}

fn b_mapping(salt: u8, i: u8, j: u8, k: u8) -> u8 {
    let mut h = V_TABLE[salt as usize];
    h = V_TABLE[(h ^ i) as usize];
    h = V_TABLE[(h ^ j) as usize];
    V_TABLE[(h ^ k) as usize]
}

fn l_capturing(len: usize) -> u8 {
    let len = len as f64;
    let i = if len <= 656.0 {
        (len.ln() / 1.5f64.ln()).floor()
    } else if len <= 3199.0 {
        (len.ln() / 1.3f64.ln() - 8.72777).floor()
    } else {
        (len.ln() / 1.1f64.ln() - 62.5472).floor()
    };
    ((i as i64) & 0xFF) as u8
}

fn mod_diff(x: u32, y: u32, range: u32) -> u32 {
    let (dl, dr) = if y > x { (y - x, x + range - y) } else { (x - y, y + range - x) };
    dl.min(dr)
}

fn hamming_dibits(a: &[u8; CODE_SIZE], b: &[u8; CODE_SIZE]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            (0..4)
                .map(|shift| {
                    let d = ((x >> (shift * 2)) & 3).abs_diff((y >> (shift * 2)) & 3);
                    if d == 3 { 6 } else { d as u32 }
                })
                .sum::<u32>()
        })
        .sum()
}

fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

fn push_hex(out: &mut String, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push(HEX[(byte >> 4) as usize] as char);
    out.push(HEX[(byte & 0x0F) as usize] as char);
}

fn invalid(reason: String) -> DigestError {
    DigestError::InvalidDigest { algorithm: Algorithm::Tlsh, reason }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 确定性的伪随机字节
    pub(crate) fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_v_table_is_permutation() {
        let mut sorted = V_TABLE.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..=255u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_hash_format_and_determinism() {
        let data = noise(4096, 7);
        let a = hash(&data).unwrap();
        let b = hash(&data).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_LEN);
        assert!(a.starts_with("T1"));
        assert!(a[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_short_input_rejected() {
        let err = hash(&noise(MIN_DATA_LENGTH - 1, 1)).unwrap_err();
        assert!(err.is_skip());
    }

    #[test]
    fn test_low_variance_rejected() {
        let err = hash(&vec![0u8; 10_000]).unwrap_err();
        assert!(matches!(err, DigestError::InsufficientEntropy { .. }));
    }

    #[test]
    fn test_identity_and_symmetry() {
        let a = hash(&noise(2048, 1)).unwrap();
        let b = hash(&noise(2048, 2)).unwrap();
        assert_eq!(compare(&a, &a).unwrap(), 0);
        assert_eq!(compare(&a, &b).unwrap(), compare(&b, &a).unwrap());
    }

    #[test]
    fn test_near_closer_than_far() {
        let base = noise(8192, 3);
        let mut near = base.clone();
        for i in (0..near.len()).step_by(1024) {
            near[i] ^= 0xFF;
        }
        let far = noise(8192, 99);

        let h_base = hash(&base).unwrap();
        let d_near = compare(&h_base, &hash(&near).unwrap()).unwrap();
        let d_far = compare(&h_base, &hash(&far).unwrap()).unwrap();
        assert!(d_near < d_far, "near={} far={}", d_near, d_far);
    }

    #[test]
    fn test_hex_roundtrip_without_prefix() {
        let full = hash(&noise(1024, 5)).unwrap();
        let parsed = TlshDigest::from_hex(&full).unwrap();
        assert_eq!(parsed.to_hex(), full);
        assert_eq!(TlshDigest::from_hex(&full[2..]).unwrap(), parsed);
    }

    #[test]
    fn test_length_mismatch_and_garbage() {
        let full = hash(&noise(1024, 5)).unwrap();
        assert!(matches!(
            compare(&full, &full[2..]),
            Err(DigestError::DigestLengthMismatch { left: 72, right: 70 })
        ));
        let garbage = "Z".repeat(RAW_HEX_LEN);
        assert!(matches!(
            compare(&garbage, &garbage),
            Err(DigestError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn test_single_code_nibble_distance() {
        let a = "A".repeat(RAW_HEX_LEN);
        let mut b = a.clone();
        b.replace_range(40..41, "B");
        // 1010 -> 1011: 仅一个 dibit 相差 1
        assert_eq!(compare(&a, &b).unwrap(), 1);
    }

    #[test]
    fn test_mod_diff_wraps() {
        assert_eq!(mod_diff(1, 255, 256), 2);
        assert_eq!(mod_diff(255, 1, 256), 2);
        assert_eq!(mod_diff(3, 3, 16), 0);
    }
}
