//! Checkpoint: ordered run of log entries for one vbucket
//! 检查点：单个 vbucket 的有序日志条目

use std::{
  collections::{BTreeMap, HashMap},
  ops::Bound::{Excluded, Unbounded},
  sync::Arc,
};

use vb_base::{Cid, CkpType, Item, Key, Op, QueuedItem, Range, Vbid};

/// Slot of the dummy head
/// 哑头槽位
pub const HEAD_SLOT: u64 = 0;
/// Slot of the checkpoint_start entry
/// checkpoint_start 条目槽位
pub const START_SLOT: u64 = 1;

/// Checkpoint state, OPEN -> CLOSED exactly once
/// 检查点状态，仅一次 OPEN -> CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CkpState {
  Open,
  Closed,
}

/// Result of appending to a checkpoint
/// 追加到检查点的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  /// Key not present before
  /// 之前不存在的键
  NewItem,
  /// Older entry of the same key superseded
  /// 同键旧条目被替换
  ExistingItem,
  /// Same key present and may not be deduplicated, caller must rotate
  /// 同键存在且不可去重，调用方需轮转
  DuplicateItem,
}

/// Ordered run of log entries bounded by a snapshot range
/// 受快照范围约束的有序日志条目
pub struct Checkpoint {
  id: u64,
  vbid: Vbid,
  state: CkpState,
  typ: CkpType,
  snap: Range,
  /// slot -> entry, slots strictly increase in append order
  /// 槽位 -> 条目，按追加顺序严格递增
  items: BTreeMap<u64, QueuedItem>,
  next_slot: u64,
  key_index: HashMap<(Cid, Key), u64>,
  num_items: usize,
  num_meta: usize,
  cursors: usize,
  mem: usize,
  /// Highest expelled seqno, 0 if nothing expelled
  /// 最高已驱逐序号，0 表示未驱逐
  expel_seqno: u64,
  created: coarsetime::Instant,
}

impl Checkpoint {
  /// Create open checkpoint holding the dummy head and checkpoint_start
  /// 创建包含哑头与 checkpoint_start 的打开检查点
  pub fn new(id: u64, vbid: Vbid, snap: Range, typ: CkpType, last_seqno: u64) -> Self {
    let mut ckp = Self {
      id,
      vbid,
      state: CkpState::Open,
      typ,
      snap,
      items: BTreeMap::new(),
      next_slot: HEAD_SLOT,
      key_index: HashMap::new(),
      num_items: 0,
      num_meta: 0,
      cursors: 0,
      mem: 0,
      expel_seqno: 0,
      created: coarsetime::Instant::now(),
    };
    ckp.append(Arc::new(Item::meta(vbid, Op::Empty, last_seqno, id)));
    ckp.append(Arc::new(Item::meta(vbid, Op::CkpStart, last_seqno + 1, id)));
    ckp
  }

  fn append(&mut self, item: QueuedItem) -> u64 {
    let slot = self.next_slot;
    self.next_slot += 1;
    if item.is_meta() {
      self.num_meta += 1;
    } else {
      self.num_items += 1;
    }
    self.mem += item.size();
    self.items.insert(slot, item);
    slot
  }

  fn take(&mut self, slot: u64) -> Option<QueuedItem> {
    let item = self.items.remove(&slot)?;
    if item.is_meta() {
      self.num_meta -= 1;
    } else {
      self.num_items -= 1;
    }
    self.mem -= item.size();
    Some(item)
  }

  /// Append an entry, deduplicating against the same key in this checkpoint
  /// 追加条目，与本检查点内同键条目去重
  pub fn queue_dirty(&mut self, item: QueuedItem) -> QueueStatus {
    assert!(
      self.is_open(),
      "{} queue_dirty on closed checkpoint {}",
      self.vbid,
      self.id
    );

    if item.is_meta() || self.typ == CkpType::Disk {
      self.append(item);
      return QueueStatus::NewItem;
    }

    let k = (item.cid, item.key.clone());
    let mut status = QueueStatus::NewItem;
    if let Some(&old_slot) = self.key_index.get(&k)
      && let Some(old) = self.items.get(&old_slot)
    {
      if old.op.is_system_event() || item.op.is_system_event() {
        return QueueStatus::DuplicateItem;
      }
      self.take(old_slot);
      status = QueueStatus::ExistingItem;
    }
    let slot = self.append(item);
    self.key_index.insert(k, slot);
    status
  }

  /// Close by appending checkpoint_end
  /// 追加 checkpoint_end 关闭
  pub fn close(&mut self, seqno: u64) {
    if self.is_open() {
      self.append(Arc::new(Item::meta(self.vbid, Op::CkpEnd, seqno, self.id)));
      self.state = CkpState::Closed;
    }
  }

  /// Remove entries strictly before `upto`, keeping the head pair and seqno-sharing runs intact
  /// 移除 `upto` 之前的条目，保留头部与共享序号的条目
  pub fn expel(&mut self, upto: u64) -> Vec<QueuedItem> {
    let mut slots: Vec<u64> = self
      .items
      .range((Excluded(START_SLOT), Excluded(upto)))
      .map(|(&s, _)| s)
      .collect();

    let boundary = self
      .items
      .range(upto..)
      .next()
      .map(|(_, it)| it.seqno);
    if let Some(seqno) = boundary {
      while let Some(&last) = slots.last() {
        if self.items.get(&last).is_some_and(|it| it.seqno == seqno) {
          slots.pop();
        } else {
          break;
        }
      }
    }

    let mut expelled = Vec::with_capacity(slots.len());
    for slot in slots {
      if let Some(item) = self.take(slot) {
        let k = (item.cid, item.key.clone());
        if self.key_index.get(&k) == Some(&slot) {
          self.key_index.remove(&k);
        }
        self.expel_seqno = self.expel_seqno.max(item.seqno);
        expelled.push(item);
      }
    }
    expelled
  }

  /// Next entry after `slot`
  /// `slot` 之后的下一条目
  #[inline]
  pub fn next_after(&self, slot: u64) -> Option<(u64, &QueuedItem)> {
    self
      .items
      .range((Excluded(slot), Unbounded))
      .next()
      .map(|(&s, it)| (s, it))
  }

  /// Entry at or before `slot`
  /// `slot` 处或之前的条目
  #[inline]
  pub fn at_or_before(&self, slot: u64) -> Option<&QueuedItem> {
    self.items.range(..=slot).next_back().map(|(_, it)| it)
  }

  /// Position for a reader that holds everything up to `seqno`: (slot, next seqno)
  /// 已持有 `seqno` 及之前数据的读者位置：（槽位，下一序号）
  pub fn seek(&self, seqno: u64) -> (u64, u64) {
    let mut pos = HEAD_SLOT;
    for (&slot, item) in self.items.range(START_SLOT..) {
      if seqno >= item.seqno {
        pos = slot;
      } else {
        return (pos, item.seqno);
      }
    }
    (pos, self.high_seqno() + 1)
  }

  /// Non-meta entries after `slot`
  /// `slot` 之后的非元条目数
  pub fn items_after(&self, slot: u64) -> usize {
    self
      .items
      .range((Excluded(slot), Unbounded))
      .filter(|(_, it)| !it.is_meta())
      .count()
  }

  #[inline]
  pub fn iter(&self) -> impl Iterator<Item = &QueuedItem> {
    self.items.values()
  }

  #[inline]
  pub fn id(&self) -> u64 {
    self.id
  }

  #[inline]
  pub fn state(&self) -> CkpState {
    self.state
  }

  #[inline]
  pub fn is_open(&self) -> bool {
    self.state == CkpState::Open
  }

  #[inline]
  pub fn typ(&self) -> CkpType {
    self.typ
  }

  #[inline]
  pub fn set_typ(&mut self, typ: CkpType) {
    self.typ = typ;
  }

  #[inline]
  pub fn snap(&self) -> Range {
    self.snap
  }

  #[inline]
  pub fn set_snap(&mut self, snap: Range) {
    self.snap = snap;
  }

  #[inline]
  pub fn set_snap_end(&mut self, end: u64) {
    self.snap.end = end;
  }

  /// Seqno of checkpoint_start
  /// checkpoint_start 的序号
  #[inline]
  pub fn low_seqno(&self) -> u64 {
    self.items.get(&START_SLOT).map_or(0, |it| it.seqno)
  }

  /// Seqno of the last entry
  /// 最后条目的序号
  #[inline]
  pub fn high_seqno(&self) -> u64 {
    self.items.values().next_back().map_or(0, |it| it.seqno)
  }

  /// First seqno still served from memory
  /// 内存中仍可提供的首个序号
  #[inline]
  pub fn min_cursor_seqno(&self) -> u64 {
    if self.expel_seqno > 0 {
      self.low_seqno().max(self.expel_seqno + 1)
    } else {
      self.low_seqno()
    }
  }

  /// Seqno of the newest non-meta entry
  /// 最新非元条目的序号
  pub fn last_item_seqno(&self) -> Option<u64> {
    self
      .items
      .values()
      .rev()
      .find(|it| !it.is_meta())
      .map(|it| it.seqno)
  }

  /// Slot of the newest entry that is not checkpoint_end
  /// 最新的非 checkpoint_end 条目槽位
  pub fn last_data_slot(&self) -> u64 {
    self
      .items
      .iter()
      .rev()
      .find(|(_, it)| it.op != Op::CkpEnd)
      .map_or(HEAD_SLOT, |(&s, _)| s)
  }

  #[inline]
  pub fn num_items(&self) -> usize {
    self.num_items
  }

  #[inline]
  pub fn num_meta(&self) -> usize {
    self.num_meta
  }

  #[inline]
  pub fn mem(&self) -> usize {
    self.mem
  }

  #[inline]
  pub fn expel_seqno(&self) -> u64 {
    self.expel_seqno
  }

  #[inline]
  pub fn cursors(&self) -> usize {
    self.cursors
  }

  #[inline]
  pub fn inc_cursors(&mut self) {
    self.cursors += 1;
  }

  /// Underflow means cursor bookkeeping is already corrupt
  /// 下溢表示游标记账已损坏
  pub fn dec_cursors(&mut self) {
    self.cursors = self.cursors.checked_sub(1).unwrap_or_else(|| {
      panic!(
        "{} checkpoint {} cursor count underflow",
        self.vbid, self.id
      )
    });
  }

  /// Seconds since creation
  /// 创建以来的秒数
  #[inline]
  pub fn age_secs(&self) -> u64 {
    self.created.elapsed().as_secs()
  }
}
