//! Queued log entry
//! 队列日志条目

use std::sync::Arc;

use bytes::Bytes;

use crate::{Op, SysEvent, Vbid};

/// Key type (cheap clone, shared with the item store)
/// 键类型（廉价克隆，与存储共享）
pub type Key = Bytes;

/// Shared log entry: copy increments, last drop frees
/// 共享日志条目：克隆加引用，最后释放时销毁
pub type QueuedItem = Arc<Item>;

/// Fixed per-entry bookkeeping charged to memory stats
/// 每条目计入内存统计的固定开销
const ITEM_OVERHEAD: usize = std::mem::size_of::<Item>() + 16;

/// Collection id
/// 集合 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Cid(pub u32);

impl Cid {
  pub const DEFAULT: Cid = Cid(0);
  /// Owner of meta entries
  /// 元条目所属
  pub const SYSTEM: Cid = Cid(1);
}

/// One mutation or metadata marker in the log
/// 日志中的一个变更或元数据标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
  pub key: Key,
  pub val: Bytes,
  pub cid: Cid,
  pub op: Op,
  pub vbid: Vbid,
  pub seqno: u64,
  pub rev_seqno: u64,
  pub cas: u64,
  pub flags: u32,
  pub exptime: u32,
  /// Id of the checkpoint the entry was queued into
  /// 条目所在检查点 ID
  pub ckp_id: u64,
}

impl Item {
  fn new(vbid: Vbid, cid: Cid, key: Key, val: Bytes, op: Op) -> Self {
    Self {
      key,
      val,
      cid,
      op,
      vbid,
      seqno: 0,
      rev_seqno: 1,
      cas: 0,
      flags: 0,
      exptime: 0,
      ckp_id: 0,
    }
  }

  #[inline]
  pub fn mutation(vbid: Vbid, cid: Cid, key: impl Into<Key>, val: impl Into<Bytes>) -> Self {
    Self::new(vbid, cid, key.into(), val.into(), Op::Mutation)
  }

  #[inline]
  pub fn deletion(vbid: Vbid, cid: Cid, key: impl Into<Key>) -> Self {
    Self::new(vbid, cid, key.into(), Bytes::new(), Op::Deletion)
  }

  /// Collection lifecycle event, keyed per collection so repeated events never dedup silently
  /// 集合生命周期事件，按集合作键
  pub fn system_event(vbid: Vbid, cid: Cid, event: SysEvent, name: impl Into<Bytes>) -> Self {
    let key = Bytes::from(format!("_collection:{:x}", cid.0));
    Self::new(vbid, cid, key, name.into(), Op::SystemEvent(event))
  }

  /// Checkpoint meta entry
  /// 检查点元条目
  pub fn meta(vbid: Vbid, op: Op, seqno: u64, ckp_id: u64) -> Self {
    let mut item = Self::new(
      vbid,
      Cid::SYSTEM,
      Bytes::from_static(op.as_str().as_bytes()),
      Bytes::new(),
      op,
    );
    item.seqno = seqno;
    item.ckp_id = ckp_id;
    item
  }

  #[inline]
  pub fn with_seqno(mut self, seqno: u64) -> Self {
    self.seqno = seqno;
    self
  }

  #[inline]
  pub fn with_cas(mut self, cas: u64) -> Self {
    self.cas = cas;
    self
  }

  #[inline]
  pub const fn is_meta(&self) -> bool {
    self.op.is_meta()
  }

  #[inline]
  pub const fn is_deleted(&self) -> bool {
    matches!(self.op, Op::Deletion | Op::SystemEvent(SysEvent::CollectionDrop))
  }

  /// Approximate memory footprint
  /// 近似内存占用
  #[inline]
  pub fn size(&self) -> usize {
    ITEM_OVERHEAD + self.key.len() + self.val.len()
  }
}
