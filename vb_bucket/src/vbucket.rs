//! Vbucket: one partition of the keyspace
//! Vbucket：键空间的一个分区

use std::sync::{
  Arc, Weak,
  atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use log::info;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use vb_base::{Cid, Item, Key, Name, Op, QueuedItem, SysEvent, VbState, Vbid};
use vb_ckp::CkpMgr;

use crate::{Error, FailoverEntry, FailoverTable, ItemStore, Manifest, Result};

/// Receives "seqno available" events from vbuckets
/// 接收 vbucket 的"序号可用"事件
pub trait Notify: Send + Sync {
  fn notify_seqno(&self, vbid: Vbid, seqno: u64);

  /// State transition of a vbucket, ignored by default
  /// vbucket 状态变化，默认忽略
  fn notify_state(&self, _vbid: Vbid, _state: VbState) {}
}

pub(crate) type NotifyRef = Option<Weak<dyn Notify>>;

/// Partition state, checkpoint log, failover history and collections
/// 分区状态、检查点日志、故障转移历史与集合
pub struct VBucket {
  vbid: Vbid,
  state: RwLock<VbState>,
  ckp: CkpMgr,
  failover: Mutex<FailoverTable>,
  manifest: RwLock<Manifest>,
  store: Arc<dyn ItemStore>,
  persisted_seqno: AtomicU64,
  notify: RwLock<NotifyRef>,
}

impl VBucket {
  pub fn new(
    vbid: Vbid,
    state: VbState,
    last_seqno: u64,
    conf: vb_ckp::ParsedConf,
    store: Arc<dyn ItemStore>,
    failover: FailoverTable,
  ) -> Self {
    Self {
      vbid,
      state: RwLock::new(state),
      ckp: CkpMgr::new(vbid, state, last_seqno, conf),
      failover: Mutex::new(failover),
      manifest: RwLock::new(Manifest::default()),
      store,
      persisted_seqno: AtomicU64::new(last_seqno),
      notify: RwLock::new(None),
    }
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.vbid
  }

  #[inline]
  pub fn state(&self) -> VbState {
    *self.state.read()
  }

  #[inline]
  pub fn ckp(&self) -> &CkpMgr {
    &self.ckp
  }

  #[inline]
  pub fn high_seqno(&self) -> u64 {
    self.ckp.last_seqno()
  }

  #[inline]
  pub fn persisted_seqno(&self) -> u64 {
    self.persisted_seqno.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn set_persisted_seqno(&self, seqno: u64) {
    self.persisted_seqno.fetch_max(seqno, Ordering::AcqRel);
  }

  pub fn failover_latest(&self) -> FailoverEntry {
    self.failover.lock().latest()
  }

  pub fn failover_entries(&self) -> Vec<FailoverEntry> {
    self.failover.lock().entries().copied().collect()
  }

  /// Rollback point for a stream request, see `FailoverTable::needs_rollback`
  /// 流请求的回滚点，见 `FailoverTable::needs_rollback`
  pub fn needs_rollback(
    &self,
    start: u64,
    uuid: u64,
    snap_start: u64,
    snap_end: u64,
    purge_seqno: u64,
  ) -> Option<u64> {
    self.failover.lock().needs_rollback(
      start,
      self.high_seqno(),
      uuid,
      snap_start,
      snap_end,
      purge_seqno,
    )
  }

  /// Shared read of the manifest; a collection create or drop in progress yields TmpFail
  /// 清单共享读取；集合创建或删除进行中时返回 TmpFail
  pub fn manifest(&self) -> Result<RwLockReadGuard<'_, Manifest>> {
    self.manifest.try_read().ok_or(Error::TmpFail)
  }

  pub(crate) fn set_notify(&self, notify: NotifyRef) {
    *self.notify.write() = notify;
  }

  #[inline]
  fn listener(&self) -> Option<Arc<dyn Notify>> {
    self.notify.read().as_ref().and_then(Weak::upgrade)
  }

  fn notify(&self, seqno: u64) {
    if let Some(n) = self.listener() {
      n.notify_seqno(self.vbid, seqno);
    }
  }

  fn want(&self, want: VbState) -> Result<()> {
    let state = self.state();
    if state != want {
      return Err(Error::WrongState {
        vbid: self.vbid,
        state,
        want,
      });
    }
    Ok(())
  }

  /// Front-end write path shared by set and delete
  /// set 与 delete 共用的前端写路径
  fn write(&self, item: Item, deleted: bool) -> Result<QueuedItem> {
    if self.state() != VbState::Active {
      return Err(Error::NotMyVbucket(self.vbid));
    }
    let (cid, key) = (item.cid, item.key.clone());
    let q = {
      let m = self.manifest.read();
      if !m.exists(cid) {
        return Err(Error::UnknownCollection(cid));
      }
      if self.store.locked(self.vbid, cid, &key).is_some() {
        return Err(Error::Locked);
      }
      let q = self.ckp.queue_dirty(item, true, true)?;
      self.store.store(q.item.clone());
      m.on_mutation(cid, q.item.seqno, q.new, deleted);
      q
    };
    self.notify(q.item.seqno);
    Ok(q.item)
  }

  pub fn set(&self, cid: Cid, key: impl Into<Key>, val: impl Into<Bytes>) -> Result<QueuedItem> {
    self.write(Item::mutation(self.vbid, cid, key, val), false)
  }

  pub fn delete(&self, cid: Cid, key: impl Into<Key>) -> Result<QueuedItem> {
    let key = key.into();
    if self.store.get(self.vbid, cid, &key).is_none() {
      return Err(Error::KeyNotFound);
    }
    self.write(Item::deletion(self.vbid, cid, key), true)
  }

  pub fn get(&self, cid: Cid, key: &Key) -> Result<QueuedItem> {
    if self.state() != VbState::Active {
      return Err(Error::NotMyVbucket(self.vbid));
    }
    self.store.get(self.vbid, cid, key).ok_or(Error::KeyNotFound)
  }

  pub fn lock(&self, cid: Cid, key: &Key) -> Result<u64> {
    let cas = self.ckp.hlc().next();
    self.store.lock(self.vbid, cid, key, cas)?;
    Ok(cas)
  }

  pub fn unlock(&self, cid: Cid, key: &Key, cas: u64) -> Result<()> {
    self.store.unlock(self.vbid, cid, key, cas)
  }

  pub fn create_collection(&self, cid: Cid, name: impl Into<Name>) -> Result<QueuedItem> {
    self.want(VbState::Active)?;
    let name = name.into();
    let mut m = self.manifest.write();
    if m.exists(cid) {
      return Err(Error::CollectionExists(cid));
    }
    let item = Item::system_event(
      self.vbid,
      cid,
      SysEvent::CollectionCreate,
      Bytes::copy_from_slice(name.as_bytes()),
    );
    let q = self.ckp.queue_dirty(item, true, true)?;
    m.create(cid, name, q.item.seqno)?;
    drop(m);
    self.notify(q.item.seqno);
    Ok(q.item)
  }

  pub fn drop_collection(&self, cid: Cid) -> Result<QueuedItem> {
    self.want(VbState::Active)?;
    let mut m = self.manifest.write();
    let Some(c) = m.get(cid) else {
      return Err(Error::UnknownCollection(cid));
    };
    let item = Item::system_event(
      self.vbid,
      cid,
      SysEvent::CollectionDrop,
      Bytes::copy_from_slice(c.name.as_bytes()),
    );
    let q = self.ckp.queue_dirty(item, true, true)?;
    m.drop_collection(cid)?;
    drop(m);
    self.notify(q.item.seqno);
    Ok(q.item)
  }

  /// Replica write path: seqno and cas come from the active node
  /// 副本写路径：序号与 cas 来自主节点
  pub fn apply_replica(&self, item: Item) -> Result<QueuedItem> {
    let state = self.state();
    if state == VbState::Active || state == VbState::Dead {
      return Err(Error::NotMyVbucket(self.vbid));
    }
    let q = match item.op {
      Op::SystemEvent(ev) => {
        let mut m = self.manifest.write();
        let q = self.ckp.queue_dirty(item, false, false)?;
        let it = &q.item;
        if ev == SysEvent::CollectionCreate {
          if !m.exists(it.cid) {
            let name = Name::from(String::from_utf8_lossy(&it.val).into_owned());
            m.create(it.cid, name, it.seqno)?;
          }
        } else {
          m.drop_collection(it.cid).ok();
        }
        q
      }
      _ => {
        let m = self.manifest.read();
        let q = self.ckp.queue_dirty(item, false, false)?;
        let it = &q.item;
        self.store.store(it.clone());
        m.on_mutation(it.cid, it.seqno, q.new, it.is_deleted());
        q
      }
    };
    self.notify(q.item.seqno);
    Ok(q.item)
  }

  /// Change state; promotion to active starts a new failover branch
  /// 修改状态；提升为主节点时开启新的故障转移分支
  pub fn set_state(&self, state: VbState) {
    let old = {
      let mut s = self.state.write();
      std::mem::replace(&mut *s, state)
    };
    if old == state {
      return;
    }
    self.ckp.set_state(state);
    self.ckp.queue_set_vb_state();
    if state == VbState::Active {
      let high = self.high_seqno();
      let e = self.failover.lock().create_entry(high);
      self.ckp.create_new_checkpoint(false);
      info!(
        "{} {} -> active, failover {:x}@{}",
        self.vbid,
        old.as_str(),
        e.uuid,
        e.seqno
      );
    } else {
      info!("{} {} -> {}", self.vbid, old.as_str(), state.as_str());
    }
    if let Some(n) = self.listener() {
      n.notify_state(self.vbid, state);
      n.notify_seqno(self.vbid, self.high_seqno());
    }
  }

  /// Reset the log after the disk rolled back to `seqno`
  /// 磁盘回滚到 `seqno` 后重置日志
  pub(crate) fn reset_to(&self, seqno: u64) {
    self.ckp.clear(self.state(), seqno);
    self.failover.lock().prune_above(seqno);
    self.persisted_seqno.store(seqno, Ordering::Release);
  }
}
