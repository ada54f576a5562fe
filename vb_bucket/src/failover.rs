//! Failover history of a vbucket
//! vbucket 故障转移历史

use std::collections::VecDeque;

/// Entries kept before the oldest is dropped
/// 保留条目上限
pub const MAX_ENTRIES: usize = 25;

/// Branch of history: uuid created at seqno
/// 历史分支：在 seqno 处创建的 uuid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverEntry {
  pub uuid: u64,
  pub seqno: u64,
}

/// Newest-first failover log
/// 新到旧的故障转移日志
#[derive(Debug, Clone)]
pub struct FailoverTable {
  entries: VecDeque<FailoverEntry>,
}

fn gen_uuid() -> u64 {
  fastrand::u64(1..)
}

impl FailoverTable {
  /// Fresh table with one branch at `seqno`
  /// 在 `seqno` 处新建单分支表
  pub fn new(seqno: u64) -> Self {
    let mut entries = VecDeque::with_capacity(MAX_ENTRIES);
    entries.push_front(FailoverEntry {
      uuid: gen_uuid(),
      seqno,
    });
    Self { entries }
  }

  /// Restore from newest-first entries; empty input yields a fresh table
  /// 从新到旧条目恢复；空输入生成新表
  pub fn from_entries(entries: impl IntoIterator<Item = FailoverEntry>) -> Self {
    let entries: VecDeque<_> = entries.into_iter().take(MAX_ENTRIES).collect();
    if entries.is_empty() {
      return Self::new(0);
    }
    Self { entries }
  }

  /// Start a new branch at `high_seqno`, forgetting branches beyond it
  /// 在 `high_seqno` 开启新分支，丢弃其后的分支
  pub fn create_entry(&mut self, high_seqno: u64) -> FailoverEntry {
    self.entries.retain(|e| e.seqno <= high_seqno);
    let mut uuid = gen_uuid();
    while self.entries.iter().any(|e| e.uuid == uuid) {
      uuid = gen_uuid();
    }
    let entry = FailoverEntry {
      uuid,
      seqno: high_seqno,
    };
    self.entries.push_front(entry);
    self.entries.truncate(MAX_ENTRIES);
    entry
  }

  /// Newest branch
  /// 最新分支
  #[inline]
  pub fn latest(&self) -> FailoverEntry {
    self.entries.front().copied().unwrap_or(FailoverEntry { uuid: 0, seqno: 0 })
  }

  #[inline]
  pub fn entries(&self) -> impl Iterator<Item = &FailoverEntry> {
    self.entries.iter()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Drop branches created after `seqno` (rollback), keeping at least one
  /// 丢弃 `seqno` 之后创建的分支（回滚），至少保留一个
  pub fn prune_above(&mut self, seqno: u64) {
    let last = self.entries.back().copied();
    self.entries.retain(|e| e.seqno <= seqno);
    if self.entries.is_empty()
      && let Some(e) = last
    {
      self.entries.push_back(FailoverEntry { uuid: e.uuid, seqno: 0 });
    }
  }

  /// Rollback point for a client resuming at `start` on branch `uuid`, or None
  /// 客户端在分支 `uuid` 的 `start` 处恢复时的回滚点，无需回滚返回 None
  pub fn needs_rollback(
    &self,
    start: u64,
    cur_seqno: u64,
    uuid: u64,
    snap_start: u64,
    snap_end: u64,
    purge_seqno: u64,
  ) -> Option<u64> {
    if start == 0 {
      return None;
    }

    let (mut snap_start, mut snap_end) = (snap_start, snap_end);
    if snap_start == start {
      snap_end = start;
    } else if snap_end == start {
      snap_start = start;
    }

    if start < purge_seqno {
      return Some(0);
    }

    let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) else {
      return Some(0);
    };
    let upper = if pos == 0 {
      cur_seqno
    } else {
      self.entries[pos - 1].seqno
    };

    if snap_end <= upper {
      return None;
    }
    Some(snap_start.min(upper))
  }
}
