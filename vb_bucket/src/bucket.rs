//! Bucket: explicit context owning every vbucket of one engine instance
//! 桶：持有引擎实例全部 vbucket 的显式上下文

use std::sync::{Arc, Weak};

use log::info;
use parking_lot::RwLock;
use vb_base::{VbState, Vbid};

use crate::{
  Disk, Error, FailoverTable, Flushed, Flusher, ItemStore, ParsedConf, Result, VBucket,
  vbucket::{Notify, NotifyRef},
};

pub struct Bucket {
  conf: ParsedConf,
  vbs: RwLock<Vec<Option<Arc<VBucket>>>>,
  store: Arc<dyn ItemStore>,
  disk: Arc<dyn Disk>,
  flusher: Flusher,
  notify: RwLock<NotifyRef>,
}

impl Bucket {
  pub fn new(conf: ParsedConf, store: Arc<dyn ItemStore>, disk: Arc<dyn Disk>) -> Self {
    Self {
      vbs: RwLock::new(vec![None; conf.max_vbuckets as usize]),
      flusher: Flusher::new(Arc::clone(&disk), conf.flush_batch),
      conf,
      store,
      disk,
      notify: RwLock::new(None),
    }
  }

  #[inline]
  pub fn conf(&self) -> &ParsedConf {
    &self.conf
  }

  #[inline]
  pub fn disk(&self) -> &Arc<dyn Disk> {
    &self.disk
  }

  #[inline]
  pub fn store(&self) -> &Arc<dyn ItemStore> {
    &self.store
  }

  #[inline]
  pub fn flusher(&self) -> &Flusher {
    &self.flusher
  }

  /// Route seqno notifications of every vbucket to `notify`
  /// 将所有 vbucket 的序号通知路由到 `notify`
  pub fn set_notify(&self, notify: Weak<dyn Notify>) {
    *self.notify.write() = Some(notify.clone());
    for vb in self.vbuckets() {
      vb.set_notify(Some(notify.clone()));
    }
  }

  /// Create a vbucket resuming after what the disk already holds
  /// 创建 vbucket，从磁盘已有数据之后继续
  pub fn create_vb(&self, vbid: Vbid, state: VbState) -> Result<Arc<VBucket>> {
    let mut vbs = self.vbs.write();
    let slot = vbs.get_mut(vbid.idx()).ok_or(Error::NotMyVbucket(vbid))?;
    if slot.is_some() {
      return Err(Error::VbExists(vbid));
    }
    let high = self.disk.high_seqno(vbid);
    let vb = Arc::new(VBucket::new(
      vbid,
      state,
      high,
      self.conf.ckp,
      Arc::clone(&self.store),
      FailoverTable::new(high),
    ));
    vb.set_notify(self.notify.read().clone());
    *slot = Some(Arc::clone(&vb));
    info!("{vbid} created {} at {high}", state.as_str());
    Ok(vb)
  }

  pub fn get(&self, vbid: Vbid) -> Result<Arc<VBucket>> {
    self
      .vbs
      .read()
      .get(vbid.idx())
      .and_then(Clone::clone)
      .ok_or(Error::NotMyVbucket(vbid))
  }

  /// Mark dead and forget the vbucket
  /// 标记为 dead 并移除 vbucket
  pub fn delete_vb(&self, vbid: Vbid) -> Result<()> {
    let vb = self
      .vbs
      .write()
      .get_mut(vbid.idx())
      .and_then(Option::take)
      .ok_or(Error::NotMyVbucket(vbid))?;
    vb.set_state(VbState::Dead);
    self.flusher.forget(vbid);
    Ok(())
  }

  pub fn vbuckets(&self) -> Vec<Arc<VBucket>> {
    self.vbs.read().iter().flatten().cloned().collect()
  }

  pub fn set_vb_state(&self, vbid: Vbid, state: VbState) -> Result<()> {
    self.get(vbid)?.set_state(state);
    Ok(())
  }

  pub fn flush(&self, vbid: Vbid) -> Result<Flushed> {
    let vb = self.get(vbid)?;
    self.flusher.flush_vb(&vb)
  }

  /// Flush every vbucket once, returns items written
  /// 每个 vbucket 刷写一次，返回写入条目数
  pub fn flush_all(&self) -> Result<usize> {
    let mut n = 0;
    for vb in self.vbuckets() {
      n += self.flusher.flush_vb(&vb)?.items;
    }
    Ok(n)
  }

  /// Roll a vbucket back to at most `seqno`, returns the seqno actually reached
  /// 将 vbucket 回滚到不超过 `seqno`，返回实际到达的序号
  pub fn rollback(&self, vbid: Vbid, seqno: u64) -> Result<u64> {
    let vb = self.get(vbid)?;
    let high = self.disk.rollback(vbid, seqno);
    self.flusher.forget(vbid);
    self.store.truncate_above(vbid, high);
    for it in self.disk.scan(vbid, 0, high, usize::MAX) {
      if !it.op.is_system_event() && self.store.get(vbid, it.cid, &it.key).is_none() {
        self.store.store(it);
      }
    }
    vb.reset_to(high);
    info!("{vbid} rolled back to {high} (asked {seqno})");
    Ok(high)
  }

  /// Checkpoint memory across all vbuckets
  /// 所有 vbucket 的检查点内存
  pub fn ckp_mem_usage(&self) -> usize {
    self.vbuckets().iter().map(|vb| vb.ckp().mem_usage()).sum()
  }
}
