//! Producer side stream of one vbucket
//! 单个 vbucket 的生产者侧流

use std::{
  collections::VecDeque,
  sync::{Arc, Weak},
};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use vb_base::{CkpType, Name, Op, QueuedItem, Range, VbState, Vbid};
use vb_bucket::{Disk, VBucket};
use vb_ckp::{Cursor, CursorItems};

use super::StreamReady;
use crate::{
  BackfillMgr, DiskBackfill, EndReason, Error, Filter, Resp, Result, StreamReq, flags, marker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActiveState {
  Pending,
  Backfilling,
  InMemory,
  TakeoverSend,
  TakeoverWait,
  Dead,
}

impl ActiveState {
  pub const fn as_str(&self) -> &'static str {
    match self {
      ActiveState::Pending => "pending",
      ActiveState::Backfilling => "backfilling",
      ActiveState::InMemory => "in-memory",
      ActiveState::TakeoverSend => "takeover-send",
      ActiveState::TakeoverWait => "takeover-wait",
      ActiveState::Dead => "dead",
    }
  }
}

/// Stream counters
/// 流计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveStats {
  pub state: ActiveState,
  pub last_read: u64,
  pub last_sent: u64,
  pub ready: usize,
  pub backfill_items: u64,
  pub memory_items: u64,
  pub has_cursor: bool,
}

struct Inner {
  state: ActiveState,
  ready: VecDeque<Resp>,
  cursor: Option<Arc<Cursor>>,
  filter: Filter,
  /// Highest seqno read into the ready queue
  /// 已读入就绪队列的最高序号
  last_read: u64,
  last_sent: u64,
  first_marker_sent: bool,
  backfill_done: bool,
  backfill_end: u64,
  /// State announced by the next takeover message
  /// 下一条接管消息宣布的状态
  takeover_next: VbState,
  backfill_items: u64,
  memory_items: u64,
}

/// Collected from one checkpoint of a cursor batch
/// 游标批次中一个检查点的条目
struct Group {
  items: Vec<QueuedItem>,
  range: Option<Range>,
  chk: bool,
}

pub struct ActiveStream {
  name: Name,
  req: StreamReq,
  vb: Arc<VBucket>,
  disk: Arc<dyn Disk>,
  backfills: Arc<BackfillMgr>,
  ready_cb: Weak<dyn StreamReady>,
  item_limit: usize,
  inner: Mutex<Inner>,
}

impl ActiveStream {
  /// `req.end` must already be resolved (LATEST applied)
  /// `req.end` 需已解析（已应用 LATEST）
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    name: Name,
    req: StreamReq,
    vb: Arc<VBucket>,
    disk: Arc<dyn Disk>,
    backfills: Arc<BackfillMgr>,
    ready_cb: Weak<dyn StreamReady>,
    filter: Filter,
    item_limit: usize,
  ) -> Arc<Self> {
    Arc::new(Self {
      name,
      req,
      vb,
      disk,
      backfills,
      ready_cb,
      item_limit,
      inner: Mutex::new(Inner {
        state: ActiveState::Pending,
        ready: VecDeque::new(),
        cursor: None,
        filter,
        last_read: req.start,
        last_sent: req.start,
        first_marker_sent: false,
        backfill_done: false,
        backfill_end: 0,
        takeover_next: VbState::Pending,
        backfill_items: 0,
        memory_items: 0,
      }),
    })
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.req.vbid
  }

  #[inline]
  pub fn opaque(&self) -> u32 {
    self.req.opaque
  }

  #[inline]
  pub fn req(&self) -> &StreamReq {
    &self.req
  }

  #[inline]
  pub fn cursor_name(&self) -> &Name {
    &self.name
  }

  #[inline]
  pub fn state(&self) -> ActiveState {
    self.inner.lock().state
  }

  #[inline]
  pub fn is_live(&self) -> bool {
    self.state() != ActiveState::Dead
  }

  #[inline]
  fn is_takeover(&self) -> bool {
    self.req.has(flags::TAKEOVER)
  }

  /// A takeover in flight demotes its own vbucket
  /// 进行中的接管会降级自身 vbucket
  pub fn is_takeover_in_flight(&self) -> bool {
    matches!(
      self.state(),
      ActiveState::TakeoverSend | ActiveState::TakeoverWait
    )
  }

  pub fn stats(&self) -> ActiveStats {
    let g = self.inner.lock();
    ActiveStats {
      state: g.state,
      last_read: g.last_read,
      last_sent: g.last_sent,
      ready: g.ready.len(),
      backfill_items: g.backfill_items,
      memory_items: g.memory_items,
      has_cursor: g.cursor.is_some(),
    }
  }

  fn notify_ready(&self) {
    if let Some(cb) = self.ready_cb.upgrade() {
      cb.stream_ready(self.vbid());
    }
  }

  /// Register the cursor and decide between backfill and memory
  /// 注册游标并决定回填或内存读取
  pub fn activate(self: &Arc<Self>) -> Result<()> {
    {
      let mut g = self.inner.lock();
      if g.state != ActiveState::Pending {
        return Ok(());
      }
      if self.req.has(flags::DISKONLY) {
        self.schedule_backfill(&mut g, self.req.start + 1, self.req.end);
      } else {
        let reg = self
          .vb
          .ckp()
          .register_cursor(self.name.clone(), self.req.start)?;
        g.cursor = Some(reg.cursor);
        if reg.try_backfill {
          let to = (reg.seqno - 1).min(self.req.end);
          self.schedule_backfill(&mut g, self.req.start + 1, to);
        } else {
          self.to_memory(&mut g);
        }
      }
      debug!(
        "{} {} stream {} from {} to {}",
        self.name,
        self.vbid(),
        g.state.as_str(),
        self.req.start,
        self.req.end
      );
    }
    self.notify_ready();
    Ok(())
  }

  fn schedule_backfill(self: &Arc<Self>, g: &mut MutexGuard<'_, Inner>, from: u64, to: u64) {
    g.state = ActiveState::Backfilling;
    g.backfill_done = false;
    g.backfill_end = to;
    self.backfills.schedule(DiskBackfill::new(
      self,
      Arc::clone(&self.disk),
      from,
      to,
    ));
  }

  fn to_memory(&self, g: &mut Inner) {
    g.state = if self.is_takeover() {
      ActiveState::TakeoverSend
    } else {
      ActiveState::InMemory
    };
  }

  /// Queue the marker of a disk snapshot
  /// 入队磁盘快照标记
  pub fn mark_disk_snapshot(&self, start: u64, end: u64) {
    let mut g = self.inner.lock();
    if g.state == ActiveState::Dead {
      return;
    }
    let mut start = start;
    if !g.first_marker_sent {
      start = start.min(self.req.snap_start);
      g.first_marker_sent = true;
    }
    g.ready.push_back(Resp::Marker {
      opaque: self.opaque(),
      vbid: self.vbid(),
      start,
      end,
      flags: marker::DISK | marker::CHK,
    });
    drop(g);
    self.notify_ready();
  }

  /// Take one entry read from disk; false when the stream is gone
  /// 接收一条磁盘条目；流已结束时返回 false
  pub fn backfill_received(&self, item: QueuedItem) -> bool {
    let mut g = self.inner.lock();
    if g.state == ActiveState::Dead {
      return false;
    }
    let size = item.size();
    g.last_read = g.last_read.max(item.seqno);
    let keep = g.filter.check(&item);
    let mut wake = false;
    match Resp::from_item(self.opaque(), item) {
      Some(r) if keep => {
        wake = g.ready.is_empty();
        g.ready.push_back(r);
        g.backfill_items += 1;
        if g.filter.is_empty() {
          self.end_stream(&mut g, EndReason::FilterEmpty, true);
        }
      }
      _ => self.backfills.bytes_sent(size),
    }
    drop(g);
    if wake {
      self.notify_ready();
    }
    true
  }

  /// Disk delivered everything up to `end`
  /// 磁盘已交付 `end` 及之前的全部数据
  pub fn complete_backfill(&self, end: u64) {
    let mut g = self.inner.lock();
    if g.state == ActiveState::Dead {
      return;
    }
    g.backfill_done = true;
    g.last_read = g.last_read.max(end.min(g.backfill_end));
    debug!(
      "{} {} backfill done at {}, {} items",
      self.name,
      self.vbid(),
      g.last_read,
      g.backfill_items
    );
    drop(g);
    self.notify_ready();
  }

  /// Next message to send, None when nothing is ready
  /// 下一条待发消息，无数据时返回 None
  pub fn next(self: &Arc<Self>) -> Option<Resp> {
    let mut g = self.inner.lock();
    loop {
      let state = g.state;
      match state {
        ActiveState::Pending => return None,
        ActiveState::Backfilling => {
          if let Some(r) = g.ready.pop_front() {
            if let Some(it) = r.item() {
              self.backfills.bytes_sent(it.size());
            }
            return Some(self.sent(&mut g, r));
          }
          if !g.backfill_done {
            return None;
          }
          if self.req.has(flags::DISKONLY) || g.last_read >= self.req.end {
            self.end_stream(&mut g, EndReason::Ok, true);
            continue;
          }
          self.resume(&mut g);
          if g.state == ActiveState::Backfilling {
            return None;
          }
        }
        ActiveState::InMemory | ActiveState::TakeoverSend => {
          let more = g.ready.is_empty() && self.fetch(&mut g);
          if let Some(r) = g.ready.pop_front() {
            return Some(self.sent(&mut g, r));
          }
          if g.state != state || more {
            continue;
          }
          if state == ActiveState::InMemory {
            if g.last_read < self.req.end {
              return None;
            }
            self.end_stream(&mut g, EndReason::Ok, true);
          } else {
            if !self.caught_up(&g) {
              return None;
            }
            let next = g.takeover_next;
            g.ready.push_back(Resp::SetVbState {
              opaque: self.opaque(),
              vbid: self.vbid(),
              state: next,
            });
            g.state = ActiveState::TakeoverWait;
            info!(
              "{} {} takeover sends {} at {}",
              self.name,
              self.vbid(),
              next.as_str(),
              g.last_read
            );
          }
        }
        ActiveState::TakeoverWait | ActiveState::Dead => {
          let r = g.ready.pop_front()?;
          return Some(self.sent(&mut g, r));
        }
      }
    }
  }

  fn sent(&self, g: &mut Inner, r: Resp) -> Resp {
    if let Some(seqno) = r.seqno() {
      g.last_sent = seqno;
    }
    r
  }

  fn caught_up(&self, g: &Inner) -> bool {
    g.cursor.as_ref().is_some_and(|c| {
      self
        .vb
        .ckp()
        .num_items_for_cursor(c)
        .is_ok_and(|n| n == 0)
    })
  }

  /// Go back to memory, re-registering a dropped cursor at the last read seqno
  /// 回到内存读取，被丢弃的游标在最后读取序号处重新注册
  fn resume(self: &Arc<Self>, g: &mut MutexGuard<'_, Inner>) {
    if g.cursor.is_none() {
      match self.vb.ckp().register_cursor(self.name.clone(), g.last_read) {
        Ok(reg) => {
          g.cursor = Some(reg.cursor);
          if reg.try_backfill {
            let from = g.last_read + 1;
            let to = (reg.seqno - 1).min(self.req.end);
            info!(
              "{} {} cursor re-registered, backfill [{from}, {to}]",
              self.name,
              self.vbid()
            );
            self.schedule_backfill(g, from, to);
            return;
          }
        }
        Err(e) => {
          warn!("{} {} re-register failed: {e}", self.name, self.vbid());
          self.end_stream(g, EndReason::StateChanged, true);
          return;
        }
      }
    }
    self.to_memory(g);
  }

  /// Pull from the cursor, true if it reported more
  /// 从游标拉取，游标报告仍有数据时返回 true
  fn fetch(self: &Arc<Self>, g: &mut MutexGuard<'_, Inner>) -> bool {
    let Some(cursor) = g.cursor.clone() else {
      self.resume(g);
      return false;
    };
    match self.vb.ckp().items_for_cursor(&cursor, self.item_limit) {
      Ok(batch) => {
        let more = batch.more;
        self.process(g, batch);
        more
      }
      Err(e) => {
        warn!("{} {} cursor lost: {e}", self.name, self.vbid());
        g.cursor = None;
        false
      }
    }
  }

  /// Turn a cursor batch into markers and data messages, one snapshot per checkpoint
  /// 将游标批次转为标记与数据消息，每个检查点一个快照
  fn process(&self, g: &mut Inner, batch: CursorItems) {
    let CursorItems {
      items, ranges, typ, ..
    } = batch;
    let mut ri = 0;
    let mut seen = false;
    let mut passed = false;
    let mut group = Group {
      items: Vec::new(),
      range: ranges.first().copied(),
      chk: false,
    };
    for item in items {
      if item.op == Op::CkpStart {
        if seen {
          self.snapshot(g, &mut group, typ);
          ri += 1;
          group.range = ranges.get(ri).copied();
        }
        group.chk = true;
        seen = true;
        continue;
      }
      seen = true;
      if item.is_meta() || item.seqno <= g.last_read {
        continue;
      }
      if item.seqno > self.req.end {
        passed = true;
        continue;
      }
      group.items.push(item);
    }
    self.snapshot(g, &mut group, typ);
    // seqnos up to end that are not in the log were deduplicated into later ones
    if passed && g.last_read < self.req.end {
      g.last_read = self.req.end;
    }
  }

  fn snapshot(&self, g: &mut Inner, group: &mut Group, typ: CkpType) {
    let chk = std::mem::take(&mut group.chk);
    let Some(last) = group.items.last().map(|i| i.seqno) else {
      return;
    };
    let mut start = g.last_read + 1;
    if !g.first_marker_sent {
      start = start.min(self.req.snap_start);
    }
    let mut end = last;
    let mut flags = marker::MEMORY;
    if typ == CkpType::Disk {
      flags = marker::DISK;
      if let Some(r) = group.range {
        end = end.max(r.end);
      }
    }
    if chk {
      flags |= marker::CHK;
    }
    let end = end.min(self.req.end);

    let mut out = Vec::with_capacity(group.items.len());
    for it in group.items.drain(..) {
      g.last_read = it.seqno;
      g.memory_items += 1;
      if g.filter.check(&it)
        && let Some(r) = Resp::from_item(self.opaque(), it)
      {
        out.push(r);
      }
    }
    if !out.is_empty() {
      g.first_marker_sent = true;
      g.ready.push_back(Resp::Marker {
        opaque: self.opaque(),
        vbid: self.vbid(),
        start,
        end,
        flags,
      });
      g.ready.extend(out);
    }
    if g.filter.is_empty() {
      self.end_stream(g, EndReason::FilterEmpty, true);
    }
  }

  fn end_stream(&self, g: &mut Inner, reason: EndReason, send: bool) -> bool {
    if g.state == ActiveState::Dead {
      return false;
    }
    if g.state == ActiveState::Backfilling {
      let buffered: usize = g
        .ready
        .iter()
        .filter_map(|r| r.item().map(|i| i.size()))
        .sum();
      self.backfills.bytes_sent(buffered);
    }
    if reason != EndReason::FilterEmpty {
      g.ready.clear();
    }
    if let Some(c) = g.cursor.take() {
      self.vb.ckp().remove_cursor(&c);
    }
    g.state = ActiveState::Dead;
    if send {
      g.ready.push_back(Resp::StreamEnd {
        opaque: self.opaque(),
        vbid: self.vbid(),
        reason,
      });
    }
    info!(
      "{} {} stream end: {}, last sent {}",
      self.name,
      self.vbid(),
      reason.as_str(),
      g.last_sent
    );
    send
  }

  /// Idempotent; returns true if a stream end message was queued
  /// 幂等；若入队了流结束消息则返回 true
  pub fn set_dead(&self, reason: EndReason, send: bool) -> bool {
    let queued = self.end_stream(&mut self.inner.lock(), reason, send);
    if queued {
      self.notify_ready();
    }
    queued
  }

  /// Peer acknowledged the takeover state message
  /// 对端确认接管状态消息
  pub fn set_vb_state_ack(&self) -> Result<()> {
    let demote = {
      let mut g = self.inner.lock();
      if g.state != ActiveState::TakeoverWait {
        return Err(Error::Disconnect(format!(
          "{} unexpected set_vbucket_state ack in {}",
          self.vbid(),
          g.state.as_str()
        )));
      }
      if g.takeover_next == VbState::Pending {
        g.takeover_next = VbState::Active;
        g.state = ActiveState::TakeoverSend;
        true
      } else {
        self.end_stream(&mut g, EndReason::Ok, true);
        false
      }
    };
    if demote {
      self.vb.set_state(VbState::Dead);
    }
    self.notify_ready();
    Ok(())
  }

  /// Drop the cursor so its checkpoints can be freed, disk catches up later
  /// 丢弃游标以释放检查点，之后由磁盘追赶
  pub fn handle_slow_stream(&self) -> bool {
    let mut g = self.inner.lock();
    if !matches!(g.state, ActiveState::InMemory | ActiveState::Backfilling) {
      return false;
    }
    let Some(c) = g.cursor.take() else {
      return false;
    };
    self.vb.ckp().remove_cursor(&c);
    info!(
      "{} {} cursor dropped at {}",
      self.name,
      self.vbid(),
      g.last_read
    );
    true
  }
}
