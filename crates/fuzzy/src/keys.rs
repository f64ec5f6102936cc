//! 子摘要键名清洗
//!
//! 文档存储的键不能以 `$` 开头、不能包含 `.`（ELF 节名 `.text` 等都会触发）。
//! 用全角字符替换；输入里原本就有的占位符与转义符前面加转义符，保证可逆且不同键不会撞在一起。

const DOT: char = '.';
const DOT_PLACEHOLDER: char = '\u{FF0E}';
const DOLLAR: char = '$';
const DOLLAR_PLACEHOLDER: char = '\u{FF04}';
const ESCAPE: char = '\u{FF3C}';

/// 清洗单个键
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        match c {
            DOLLAR if i == 0 => out.push(DOLLAR_PLACEHOLDER),
            DOT => out.push(DOT_PLACEHOLDER),
            DOT_PLACEHOLDER | ESCAPE => {
                out.push(ESCAPE);
                out.push(c);
            }
            DOLLAR_PLACEHOLDER if i == 0 => {
                out.push(ESCAPE);
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

/// 还原被清洗的键
pub fn restore_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().enumerate();
    while let Some((i, c)) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => out.push(ESCAPE),
            },
            DOLLAR_PLACEHOLDER if i == 0 => out.push(DOLLAR),
            DOT_PLACEHOLDER => out.push(DOT),
            other => out.push(other),
        }
    }
    out
}

/// 键是否已可直接写入文档存储
pub fn is_storage_safe(key: &str) -> bool {
    !key.starts_with(DOLLAR) && !key.contains(DOT)
}
