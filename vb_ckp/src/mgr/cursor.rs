use std::sync::Arc;

use log::debug;
use vb_base::{CkpType, Name};

use super::{CkpMgr, Inner};
use crate::{
  Cursor, CursorItems, CursorReg, Error, Result,
  checkpoint::HEAD_SLOT,
  cursor::{CursorPos, PERSISTENCE_CURSOR},
};

impl CkpMgr {
  /// Register (or re-register) a named cursor for a reader holding everything up to `start`
  /// 为已持有 `start` 及之前数据的读者注册（或重新注册）命名游标
  pub fn register_cursor(&self, name: impl Into<Name>, start: u64) -> Result<CursorReg> {
    let name = name.into();
    let mut g = self.inner.lock();
    if start > g.last_seqno {
      return Err(Error::SeqnoAfterHigh {
        vbid: self.vbid,
        start,
        high: g.last_seqno,
      });
    }
    remove_locked(&mut g, &name);

    let mut found = None;
    for c in &g.list {
      let st = c.min_cursor_seqno();
      if start < st {
        found = Some((c.id(), HEAD_SLOT, st, start + 1 < st));
        break;
      }
      if start <= c.high_seqno() {
        let (slot, next) = c.seek(start);
        found = Some((c.id(), slot, next, false));
        break;
      }
    }
    // start <= last_seqno < open.high_seqno() + 1 keeps this unreachable
    let (ckp_id, slot, seqno, try_backfill) = found.unwrap_or_else(|| {
      let open = g.open();
      (open.id(), open.last_data_slot(), g.last_seqno + 1, false)
    });

    let handle = Cursor::new(name.clone());
    if let Some(i) = g.idx(ckp_id) {
      g.list[i].inc_cursors();
    }
    g.cursors.insert(
      name,
      CursorPos {
        handle: Arc::clone(&handle),
        ckp_id,
        slot,
      },
    );
    debug!(
      "{} cursor {} registered at {start}, ckp {ckp_id}, next {seqno}, backfill {try_backfill}",
      self.vbid, handle.name
    );
    Ok(CursorReg {
      cursor: handle,
      seqno,
      try_backfill,
    })
  }

  /// Remove a cursor; stale handles are ignored
  /// 移除游标；忽略过期句柄
  pub fn remove_cursor(&self, cursor: &Arc<Cursor>) -> bool {
    let mut g = self.inner.lock();
    if g.pos(self.vbid, cursor).is_err() {
      return false;
    }
    remove_locked(&mut g, &cursor.name)
  }

  /// Current handle of the persistence cursor
  /// 持久化游标当前句柄
  pub fn persistence_cursor(&self) -> Option<Arc<Cursor>> {
    self
      .inner
      .lock()
      .cursors
      .get(PERSISTENCE_CURSOR)
      .map(|p| Arc::clone(&p.handle))
  }

  pub fn num_cursors(&self) -> usize {
    self.inner.lock().cursors.len()
  }

  /// Pull entries through a cursor, crossing closed checkpoints, stopping at the item
  /// limit (checked at checkpoint boundaries) or a change of checkpoint type
  /// 通过游标拉取条目，跨越已关闭检查点，在条目上限（于检查点边界检查）或类型变化处停止
  pub fn items_for_cursor(&self, cursor: &Arc<Cursor>, limit: usize) -> Result<CursorItems> {
    let mut g = self.inner.lock();
    let pos = g.pos(self.vbid, cursor)?;
    let (mut ckp_id, mut slot) = (pos.ckp_id, pos.slot);
    let mut out = CursorItems::default();
    let mut cur: Option<u64> = None;
    let mut n = 0usize;

    while let Some(i) = g.idx(ckp_id) {
      let ckp = &g.list[i];
      if let Some((s, item)) = ckp.next_after(slot) {
        if cur != Some(ckp_id) {
          if cur.is_none() {
            out.typ = ckp.typ();
          }
          out.ranges.push(ckp.snap());
          cur = Some(ckp_id);
        }
        if !item.is_meta() {
          n += 1;
        }
        out.items.push(Arc::clone(item));
        slot = s;
        continue;
      }

      if ckp.is_open() || i + 1 >= g.list.len() {
        break;
      }
      let next = &g.list[i + 1];
      let typ_change = cur.is_some() && next.typ() != out.typ;
      ckp_id = next.id();
      slot = HEAD_SLOT;
      if typ_change || n >= limit {
        out.more = true;
        break;
      }
    }

    g.move_cursor(&cursor.name, ckp_id, slot);
    Ok(out)
  }

  /// Pull through the persistence cursor
  /// 通过持久化游标拉取
  pub fn items_for_persistence(&self, limit: usize) -> Result<CursorItems> {
    match self.persistence_cursor() {
      Some(c) => self.items_for_cursor(&c, limit),
      None => Err(Error::CursorNotFound {
        vbid: self.vbid,
        name: Name::from(PERSISTENCE_CURSOR),
      }),
    }
  }

  /// Record that everything the persistence cursor returned is on disk
  /// 记录持久化游标返回的数据均已落盘
  pub fn items_persisted(&self) {
    let mut g = self.inner.lock();
    let Some(p) = g.cursors.get(PERSISTENCE_CURSOR).cloned() else {
      return;
    };
    let Some(i) = g.idx(p.ckp_id) else {
      return;
    };
    let ckp = &g.list[i];
    let id = if !ckp.is_open() && ckp.next_after(p.slot).is_none() {
      p.ckp_id
    } else {
      p.ckp_id - 1
    };
    g.persisted_ckp_id = g.persisted_ckp_id.max(id);
  }

  /// Non-meta entries the cursor has not consumed yet
  /// 游标尚未消费的非元条目数
  pub fn num_items_for_cursor(&self, cursor: &Arc<Cursor>) -> Result<usize> {
    let g = self.inner.lock();
    let pos = g.pos(self.vbid, cursor)?;
    let Some(i) = g.idx(pos.ckp_id) else {
      return Ok(0);
    };
    let mut n = g.list[i].items_after(pos.slot);
    for c in g.list.iter().skip(i + 1) {
      n += c.num_items();
    }
    Ok(n)
  }

  /// Seqno of the entry the cursor sits on
  /// 游标所在条目的序号
  pub fn cursor_seqno(&self, cursor: &Arc<Cursor>) -> Result<u64> {
    let g = self.inner.lock();
    let pos = g.pos(self.vbid, cursor)?;
    Ok(
      g.idx(pos.ckp_id)
        .and_then(|i| g.list[i].at_or_before(pos.slot))
        .map_or(0, |it| it.seqno),
    )
  }

  /// Type of the checkpoint the cursor sits in
  /// 游标所在检查点类型
  pub fn cursor_ckp_type(&self, cursor: &Arc<Cursor>) -> Result<CkpType> {
    let g = self.inner.lock();
    let pos = g.pos(self.vbid, cursor)?;
    Ok(g.idx(pos.ckp_id).map_or(CkpType::Memory, |i| g.list[i].typ()))
  }
}

/// Drop a cursor record and its checkpoint reference
/// 删除游标记录及其检查点引用
pub(super) fn remove_locked(g: &mut Inner, name: &Name) -> bool {
  let Some(p) = g.cursors.remove(name) else {
    return false;
  };
  if let Some(i) = g.idx(p.ckp_id) {
    g.list[i].dec_cursors();
  }
  true
}
