//! Per-vbucket checkpoint manager
//! 每 vbucket 检查点管理器

mod cursor;
mod reclaim;

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use log::{debug, error};
use parking_lot::Mutex;
use vb_base::{CkpType, Hlc, Item, Name, Op, QueuedItem, Range, VbState, Vbid};

use crate::{
  Checkpoint, CkpInfo, CkpStats, Cursor, Error, ParsedConf, QueueStatus, Result, SnapshotInfo,
  conf::MIN_CHECKPOINT_ITEMS,
  cursor::{CursorPos, PERSISTENCE_CURSOR},
};

/// Entry as stored in the open checkpoint
/// 存入打开检查点的条目
#[derive(Debug, Clone)]
pub struct Queued {
  pub item: QueuedItem,
  pub new: bool,
}

/// State guarded by the queue lock
/// 队列锁保护的状态
pub(crate) struct Inner {
  /// Oldest first, never empty, back is open
  /// 从旧到新，永不为空，末尾为打开检查点
  pub list: VecDeque<Checkpoint>,
  pub cursors: HashMap<Name, CursorPos>,
  pub last_seqno: u64,
  pub persisted_ckp_id: u64,
  pub state: VbState,
  pub deduped: u64,
  pub expelled: u64,
  pub removed: u64,
}

impl Inner {
  /// List index of a checkpoint id (ids are contiguous)
  /// 检查点 ID 对应的列表下标（ID 连续）
  #[inline]
  pub fn idx(&self, ckp_id: u64) -> Option<usize> {
    let front = self.list.front()?.id();
    let i = ckp_id.checked_sub(front)? as usize;
    (i < self.list.len()).then_some(i)
  }

  #[inline]
  pub fn open(&self) -> &Checkpoint {
    &self.list[self.list.len() - 1]
  }

  #[inline]
  pub fn open_mut(&mut self) -> &mut Checkpoint {
    let n = self.list.len() - 1;
    &mut self.list[n]
  }

  #[inline]
  pub fn mem(&self) -> usize {
    self.list.iter().map(Checkpoint::mem).sum()
  }

  /// Look up a cursor record, rejecting stale handles
  /// 查找游标记录，拒绝过期句柄
  pub fn pos(&self, vbid: Vbid, cursor: &Arc<Cursor>) -> Result<CursorPos> {
    match self.cursors.get(&cursor.name) {
      Some(p) if Arc::ptr_eq(&p.handle, cursor) => Ok(p.clone()),
      _ => Err(Error::CursorNotFound {
        vbid,
        name: cursor.name.clone(),
      }),
    }
  }

  /// Move a cursor, keeping checkpoint reference counts in step
  /// 移动游标，同步检查点引用计数
  pub fn move_cursor(&mut self, name: &Name, ckp_id: u64, slot: u64) {
    let Some(old) = self.cursors.get(name).map(|p| p.ckp_id) else {
      return;
    };
    if old != ckp_id {
      if let Some(i) = self.idx(old) {
        self.list[i].dec_cursors();
      }
      if let Some(i) = self.idx(ckp_id) {
        self.list[i].inc_cursors();
      }
    }
    if let Some(p) = self.cursors.get_mut(name) {
      p.ckp_id = ckp_id;
      p.slot = slot;
    }
  }
}

/// Checkpoint manager: ordered checkpoint list, cursor registry and seqno counter of one vbucket
/// 检查点管理器：单 vbucket 的有序检查点列表、游标注册表与序号计数器
pub struct CkpMgr {
  vbid: Vbid,
  conf: ParsedConf,
  hlc: Hlc,
  mem: AtomicUsize,
  pub(crate) inner: Mutex<Inner>,
}

impl CkpMgr {
  /// Create with one open checkpoint (id 1) after `last_seqno`
  /// 创建管理器，含一个位于 `last_seqno` 之后的打开检查点（ID 1）
  pub fn new(vbid: Vbid, state: VbState, last_seqno: u64, conf: ParsedConf) -> Self {
    let mut list = VecDeque::new();
    list.push_back(Checkpoint::new(
      1,
      vbid,
      Range::new(last_seqno, last_seqno),
      CkpType::Memory,
      last_seqno,
    ));
    let inner = Inner {
      list,
      cursors: HashMap::new(),
      last_seqno,
      persisted_ckp_id: 0,
      state,
      deduped: 0,
      expelled: 0,
      removed: 0,
    };
    let mgr = Self {
      vbid,
      conf,
      hlc: Hlc::new(),
      mem: AtomicUsize::new(0),
      inner: Mutex::new(inner),
    };
    if conf.persistence {
      let mut g = mgr.inner.lock();
      let handle = Cursor::new(Name::from(PERSISTENCE_CURSOR));
      g.list[0].inc_cursors();
      g.cursors.insert(
        handle.name.clone(),
        CursorPos {
          handle,
          ckp_id: 1,
          slot: crate::checkpoint::HEAD_SLOT,
        },
      );
    }
    mgr.sync_mem(&mgr.inner.lock());
    mgr
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.vbid
  }

  #[inline]
  pub fn conf(&self) -> &ParsedConf {
    &self.conf
  }

  #[inline]
  pub fn hlc(&self) -> &Hlc {
    &self.hlc
  }

  #[inline]
  pub(crate) fn sync_mem(&self, g: &Inner) {
    self.mem.store(g.mem(), Ordering::Relaxed);
  }

  /// Queue a mutation; `new` is false when it superseded an entry of the same key
  /// 入队变更；替换同键条目时 `new` 为 false
  pub fn queue_dirty(&self, item: Item, gen_seqno: bool, gen_cas: bool) -> Result<Queued> {
    let mut item = item;
    let mut g = self.inner.lock();

    if g.state == VbState::Active && self.may_rotate(&g) {
      self.check_open(&mut g, false, true);
    }

    if gen_seqno {
      item.seqno = g.last_seqno + 1;
      let seqno = item.seqno;
      let open = g.open_mut();
      if open.snap().end < seqno {
        open.set_snap_end(seqno);
      }
    } else {
      let snap = g.open().snap();
      if !snap.contains(item.seqno) {
        let e = Error::SeqnoOutOfSnapshot {
          vbid: self.vbid,
          seqno: item.seqno,
          start: snap.start,
          end: snap.end,
        };
        error!("{e}");
        return Err(e);
      }
    }

    if gen_cas {
      item.cas = self.hlc.next();
    } else {
      self.hlc.observe(item.cas);
    }
    item.vbid = self.vbid;
    item.ckp_id = g.open().id();
    let seqno = item.seqno;
    let mut qi: QueuedItem = Arc::new(item);

    let mut status = g.open_mut().queue_dirty(Arc::clone(&qi));
    if status == QueueStatus::DuplicateItem {
      if g.state != VbState::Active {
        return Err(Error::DupOnNonActive { vbid: self.vbid });
      }
      self.rotate(&mut g);
      let mut item = Arc::unwrap_or_clone(qi);
      item.ckp_id = g.open().id();
      qi = Arc::new(item);
      status = g.open_mut().queue_dirty(Arc::clone(&qi));
      if status != QueueStatus::NewItem {
        let e = Error::DupAfterRotate {
          vbid: self.vbid,
          ckp_id: g.open().id(),
        };
        error!("{e}");
        return Err(e);
      }
    }

    g.last_seqno = seqno;
    if status == QueueStatus::ExistingItem {
      g.deduped += 1;
    }
    self.sync_mem(&g);
    Ok(Queued {
      item: qi,
      new: status == QueueStatus::NewItem,
    })
  }

  /// Append a set_vbucket_state marker to the open checkpoint
  /// 向打开检查点追加 set_vbucket_state 标记
  pub fn queue_set_vb_state(&self) {
    let mut g = self.inner.lock();
    let seqno = g.last_seqno + 1;
    let id = g.open().id();
    let item = Item::meta(self.vbid, Op::SetVbState, seqno, id);
    g.open_mut().queue_dirty(Arc::new(item));
    self.sync_mem(&g);
  }

  /// Rotation is bounded by the list length unless the oldest checkpoint is unreferenced
  /// 轮转受列表长度约束，除非最旧检查点无引用
  #[inline]
  fn may_rotate(&self, g: &Inner) -> bool {
    g.list.len() < self.conf.max_checkpoints || g.list.front().is_some_and(|c| c.cursors() == 0)
  }

  /// Rotate when forced, when the open checkpoint is full, or when its period elapsed
  /// 强制、已满或超时时轮转
  pub(crate) fn check_open(&self, g: &mut Inner, force: bool, time_bound: bool) -> bool {
    let open = g.open();
    let n = open.num_items();
    let rotate = force
      || (self.conf.item_num_based && n >= self.conf.max_items)
      || (n > 0 && time_bound && open.age_secs() >= self.conf.period);
    if rotate {
      self.rotate(g);
    }
    rotate
  }

  /// Memory pressure closes the open checkpoint once every cursor is inside it
  /// 内存压力下，所有游标都在打开检查点内时关闭它
  pub(crate) fn mem_force(&self, g: &Inner) -> bool {
    if g.mem() <= self.conf.mem_high_wat {
      return false;
    }
    let open = g.open();
    open.num_items() >= MIN_CHECKPOINT_ITEMS
      && g.cursors.values().all(|p| p.ckp_id == open.id())
  }

  /// Close the open checkpoint and open the next one
  /// 关闭打开检查点并打开下一个
  pub(crate) fn rotate(&self, g: &mut Inner) {
    let last = g.last_seqno;
    let old = g.open_mut();
    let old_id = old.id();
    let old_end = old.snap().end;
    let done_slot = old.last_data_slot();
    old.close(last + 1);

    let id = old_id + 1;
    let start = last + 1;
    g.list.push_back(Checkpoint::new(
      id,
      self.vbid,
      Range::new(start, old_end.max(start)),
      CkpType::Memory,
      last,
    ));

    let caught_up: Vec<Name> = g
      .cursors
      .iter()
      .filter(|(_, p)| p.ckp_id == old_id && p.slot >= done_slot)
      .map(|(n, _)| n.clone())
      .collect();
    for name in &caught_up {
      g.move_cursor(name, id, crate::checkpoint::HEAD_SLOT);
    }
    debug!(
      "{} checkpoint {old_id} closed, open {id}, {} cursors moved",
      self.vbid,
      caught_up.len()
    );
  }

  /// Close the open checkpoint if forced or non-empty, returns the open id
  /// 强制或非空时关闭打开检查点，返回打开检查点 ID
  pub fn create_new_checkpoint(&self, force: bool) -> u64 {
    let mut g = self.inner.lock();
    if force || g.open().num_items() > 0 {
      self.rotate(&mut g);
      self.sync_mem(&g);
    }
    g.open().id()
  }

  /// Start a replica snapshot, reusing an empty open checkpoint
  /// 开始副本快照，复用空的打开检查点
  pub fn create_snapshot(&self, start: u64, end: u64, typ: CkpType) {
    let mut g = self.inner.lock();
    if g.open().num_items() > 0 {
      self.rotate(&mut g);
    }
    let open = g.open_mut();
    open.set_snap(Range::new(start, end));
    open.set_typ(typ);
    self.sync_mem(&g);
  }

  /// Overwrite the open checkpoint's snapshot range and type
  /// 覆盖打开检查点的快照范围与类型
  pub fn update_current_snapshot(&self, start: u64, end: u64, typ: CkpType) {
    let mut g = self.inner.lock();
    let open = g.open_mut();
    open.set_snap(Range::new(start, end));
    open.set_typ(typ);
  }

  /// Drop every checkpoint and restart after `seqno`; cursors move to the new head
  /// 丢弃所有检查点并从 `seqno` 之后重新开始；游标移至新头部
  pub fn clear(&self, state: VbState, seqno: u64) {
    let drained: Vec<Checkpoint> = {
      let mut g = self.inner.lock();
      let id = g.open().id() + 1;
      let drained = g.list.drain(..).collect();
      let mut ckp = Checkpoint::new(id, self.vbid, Range::new(seqno, seqno), CkpType::Memory, seqno);
      for p in g.cursors.values_mut() {
        p.ckp_id = id;
        p.slot = crate::checkpoint::HEAD_SLOT;
        ckp.inc_cursors();
      }
      g.list.push_back(ckp);
      g.last_seqno = seqno;
      g.persisted_ckp_id = id - 1;
      g.state = state;
      self.sync_mem(&g);
      drained
    };
    debug!(
      "{} cleared {} checkpoints, restart after {seqno}",
      self.vbid,
      drained.len()
    );
    drop(drained);
  }

  #[inline]
  pub fn set_state(&self, state: VbState) {
    self.inner.lock().state = state;
  }

  #[inline]
  pub fn state(&self) -> VbState {
    self.inner.lock().state
  }

  #[inline]
  pub fn last_seqno(&self) -> u64 {
    self.inner.lock().last_seqno
  }

  #[inline]
  pub fn open_ckp_id(&self) -> u64 {
    self.inner.lock().open().id()
  }

  #[inline]
  pub fn num_checkpoints(&self) -> usize {
    self.inner.lock().list.len()
  }

  /// Non-meta entries across all checkpoints
  /// 所有检查点的非元条目数
  #[inline]
  pub fn num_items(&self) -> usize {
    self.inner.lock().list.iter().map(Checkpoint::num_items).sum()
  }

  #[inline]
  pub fn num_open_items(&self) -> usize {
    self.inner.lock().open().num_items()
  }

  #[inline]
  pub fn mem_usage(&self) -> usize {
    self.mem.load(Ordering::Relaxed)
  }

  #[inline]
  pub fn persisted_ckp_id(&self) -> u64 {
    self.inner.lock().persisted_ckp_id
  }

  /// Last seqno and the open snapshot range (collapsed to it when the open checkpoint is empty)
  /// 最后序号与打开快照范围（打开检查点为空时收缩为该序号）
  pub fn snapshot_info(&self) -> SnapshotInfo {
    let g = self.inner.lock();
    let open = g.open();
    let range = if open.num_items() == 0 {
      Range::new(g.last_seqno, g.last_seqno)
    } else {
      let snap = open.snap();
      Range::new(snap.start, snap.end.max(g.last_seqno))
    };
    SnapshotInfo {
      last_seqno: g.last_seqno,
      range,
    }
  }

  pub fn stats(&self) -> CkpStats {
    let g = self.inner.lock();
    let mut cursors: Vec<(Name, u64)> = g
      .cursors
      .iter()
      .map(|(name, p)| {
        let seqno = g
          .idx(p.ckp_id)
          .and_then(|i| g.list[i].at_or_before(p.slot))
          .map_or(0, |it| it.seqno);
        (name.clone(), seqno)
      })
      .collect();
    cursors.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    CkpStats {
      open_ckp_id: g.open().id(),
      num_checkpoints: g.list.len(),
      num_checkpoint_items: g.list.iter().map(Checkpoint::num_items).sum(),
      num_open_items: g.open().num_items(),
      mem: g.mem(),
      last_seqno: g.last_seqno,
      persisted_ckp_id: g.persisted_ckp_id,
      total_deduplicated: g.deduped,
      total_expelled: g.expelled,
      total_removed: g.removed,
      cursors,
    }
  }

  /// Checkpoint list details, oldest first
  /// 检查点列表详情，从旧到新
  pub fn ckp_info(&self) -> Vec<CkpInfo> {
    let g = self.inner.lock();
    g.list
      .iter()
      .map(|c| CkpInfo {
        id: c.id(),
        state: c.state(),
        typ: c.typ(),
        snap: c.snap(),
        low_seqno: c.low_seqno(),
        high_seqno: c.high_seqno(),
        num_items: c.num_items(),
        num_meta: c.num_meta(),
        cursors: c.cursors(),
      })
      .collect()
  }

  /// Entries of one checkpoint in order
  /// 单个检查点的有序条目
  pub fn ckp_items(&self, ckp_id: u64) -> Vec<QueuedItem> {
    let g = self.inner.lock();
    g.idx(ckp_id)
      .map(|i| g.list[i].iter().cloned().collect())
      .unwrap_or_default()
  }
}
