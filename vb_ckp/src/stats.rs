//! Checkpoint manager result and stat types
//! 检查点管理器结果与统计类型

use vb_base::{CkpType, Name, QueuedItem, Range};

use crate::CkpState;

/// Batch pulled through a cursor
/// 通过游标拉取的批次
#[derive(Debug, Default)]
pub struct CursorItems {
  pub items: Vec<QueuedItem>,
  /// Snapshot range of every checkpoint the batch touched, in order
  /// 批次经过的每个检查点的快照范围（按序）
  pub ranges: Vec<Range>,
  pub typ: CkpType,
  pub more: bool,
}

impl CursorItems {
  /// Non-meta entries in the batch
  /// 批次中的非元条目数
  #[inline]
  pub fn num_items(&self) -> usize {
    self.items.iter().filter(|i| !i.is_meta()).count()
  }
}

/// Outcome of checkpoint reclamation
/// 检查点回收结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
  /// Non-meta entries freed
  /// 释放的非元条目数
  pub items: usize,
  pub checkpoints: usize,
  /// A new open checkpoint was created by the memory check
  /// 内存检查创建了新的打开检查点
  pub new_open: bool,
}

/// Outcome of item expelling
/// 条目驱逐结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Expelled {
  pub items: usize,
  pub mem: usize,
}

/// Snapshot view used by stream requests and persistence
/// 流请求与持久化使用的快照视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
  pub last_seqno: u64,
  pub range: Range,
}

/// Per-checkpoint detail
/// 单检查点详情
#[derive(Debug, Clone)]
pub struct CkpInfo {
  pub id: u64,
  pub state: CkpState,
  pub typ: CkpType,
  pub snap: Range,
  pub low_seqno: u64,
  pub high_seqno: u64,
  pub num_items: usize,
  pub num_meta: usize,
  pub cursors: usize,
}

/// Manager counters for monitoring
/// 监控用管理器计数
#[derive(Debug, Clone, Default)]
pub struct CkpStats {
  pub open_ckp_id: u64,
  pub num_checkpoints: usize,
  pub num_checkpoint_items: usize,
  pub num_open_items: usize,
  pub mem: usize,
  pub last_seqno: u64,
  pub persisted_ckp_id: u64,
  pub total_deduplicated: u64,
  pub total_expelled: u64,
  pub total_removed: u64,
  /// (cursor, seqno of the entry it sits on)
  /// （游标，所在条目的序号）
  pub cursors: Vec<(Name, u64)>,
}
