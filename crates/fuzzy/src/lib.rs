//! fuzzy - 固件文件的局部敏感摘要
//!
//! 对任意字节流生成定长 TLSH 摘要（或 LZJD 签名）；APK 与 ELF 额外生成成员 / 节级别的子摘要。

mod algorithm;
mod apk;
mod config;
mod corpus;
mod digest;
mod elf;
mod error;
mod generator;
mod keys;
pub mod lzjd;
pub mod tlsh;

pub use algorithm::{Algorithm, FuzzyHasher};
pub use config::DigestConfig;
pub use corpus::{digest_corpus, CorpusDigests, SkippedFile};
pub use digest::{compare, ContainerKind, Digest, SubDigest, HEADER_SECTION};
pub use error::{DigestError, Result};
pub use generator::{DigestGenerator, SourceFile};
pub use keys::{is_storage_safe, restore_key, sanitize_key};
