//! Collection filter of one stream
//! 单个流的集合过滤器

use std::collections::HashSet;

use serde::Deserialize;
use vb_base::{Cid, Item, Op, SysEvent};
use vb_bucket::Manifest;

use crate::{Error, Result};

#[derive(Deserialize)]
struct FilterJson {
  /// Hex collection ids
  /// 十六进制集合 ID
  #[serde(default)]
  collections: Option<Vec<String>>,
}

/// `None` passes every collection
/// `None` 表示放行所有集合
#[derive(Debug, Clone, Default)]
pub struct Filter {
  cids: Option<HashSet<Cid>>,
}

impl Filter {
  #[inline]
  pub fn passthrough() -> Self {
    Self::default()
  }

  /// Parse `{"collections":["8","9"]}`, every id must be live in `manifest`
  /// 解析 `{"collections":["8","9"]}`，每个 ID 必须在 `manifest` 中存活
  pub fn new(json: Option<&str>, manifest: &Manifest) -> Result<Self> {
    let Some(json) = json.filter(|j| !j.trim().is_empty()) else {
      return Ok(Self::passthrough());
    };
    let parsed: FilterJson =
      sonic_rs::from_str(json).map_err(|e| Error::Einval(format!("filter: {e}")))?;
    let Some(list) = parsed.collections else {
      return Ok(Self::passthrough());
    };
    if list.is_empty() {
      return Err(Error::Einval("filter: empty collection list".into()));
    }
    let mut cids = HashSet::with_capacity(list.len());
    for s in &list {
      let cid = u32::from_str_radix(s.trim_start_matches("0x"), 16)
        .map(Cid)
        .map_err(|_| Error::Einval(format!("filter: bad collection id {s}")))?;
      if !manifest.exists(cid) {
        return Err(Error::UnknownCollection(cid));
      }
      cids.insert(cid);
    }
    Ok(Self { cids: Some(cids) })
  }

  #[inline]
  pub fn is_passthrough(&self) -> bool {
    self.cids.is_none()
  }

  /// Every filtered collection has been dropped
  /// 所有过滤的集合均已删除
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.cids.as_ref().is_some_and(HashSet::is_empty)
  }

  #[inline]
  pub fn contains(&self, cid: Cid) -> bool {
    self.cids.as_ref().is_none_or(|c| c.contains(&cid))
  }

  /// Whether the entry goes out; a drop event of a filtered collection shrinks the filter
  /// 条目是否发送；已过滤集合的删除事件会收缩过滤器
  pub fn check(&mut self, item: &Item) -> bool {
    let Some(cids) = self.cids.as_mut() else {
      return true;
    };
    if item.op == Op::SystemEvent(SysEvent::CollectionDrop) {
      return cids.remove(&item.cid);
    }
    cids.contains(&item.cid)
  }
}
