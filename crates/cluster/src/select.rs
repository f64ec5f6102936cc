//! 成员选择：文件名正则 + 固件白名单

use std::collections::BTreeSet;

use fuzzy::Digest;
use regex::Regex;

use crate::db::{DigestRecord, SkippedRecord};

/// 成员选择条件；两项都为空时选中全部
#[derive(Debug, Clone, Default)]
pub struct MemberSelector {
    filename_regex: Option<Regex>,
    firmware_ids: BTreeSet<String>,
}

impl MemberSelector {
    pub fn new<I, S>(filename_regex: Option<&str>, firmware_ids: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            filename_regex: filename_regex.map(Regex::new).transpose()?,
            firmware_ids: firmware_ids.into_iter().map(Into::into).collect(),
        })
    }

    /// 记录到结果中的正则原文
    pub fn regex_filter(&self) -> Option<&str> {
        self.filename_regex.as_ref().map(|r| r.as_str())
    }

    pub fn matches(&self, digest: &Digest, firmware_id: Option<&str>) -> bool {
        self.matches_file(digest.filename(), firmware_id)
    }

    /// 摘要失败的文件是否本应进入成员集
    pub fn matches_skipped(&self, skipped: &SkippedRecord) -> bool {
        self.matches_file(&skipped.filename, skipped.firmware_id.as_deref())
    }

    fn matches_file(&self, filename: &str, firmware_id: Option<&str>) -> bool {
        if let Some(re) = &self.filename_regex {
            if !re.is_match(filename) {
                return false;
            }
        }
        if !self.firmware_ids.is_empty() {
            return firmware_id.is_some_and(|id| self.firmware_ids.contains(id));
        }
        true
    }

    pub fn select<'a, I>(&self, records: I) -> Vec<Digest>
    where
        I: IntoIterator<Item = &'a DigestRecord>,
    {
        records
            .into_iter()
            .filter(|r| self.matches(&r.digest, r.firmware_id.as_deref()))
            .map(|r| r.digest.clone())
            .collect()
    }
}
