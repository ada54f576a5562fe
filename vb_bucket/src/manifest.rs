//! Per-vbucket collections manifest
//! 每 vbucket 集合清单

use std::{
  collections::HashMap,
  sync::atomic::{AtomicU64, Ordering},
};

use vb_base::{Cid, Name};

use crate::{Error, Result};

/// One live collection; counters are updated under a shared manifest read
/// 一个存活集合；计数器在清单共享读锁下更新
#[derive(Debug)]
pub struct Collection {
  pub name: Name,
  /// Seqno of the create event
  /// 创建事件序号
  pub start_seqno: u64,
  items: AtomicU64,
  high_seqno: AtomicU64,
}

impl Collection {
  fn new(name: Name, seqno: u64) -> Self {
    Self {
      name,
      start_seqno: seqno,
      items: AtomicU64::new(0),
      high_seqno: AtomicU64::new(seqno),
    }
  }

  #[inline]
  pub fn items(&self) -> u64 {
    self.items.load(Ordering::Relaxed)
  }

  #[inline]
  pub fn high_seqno(&self) -> u64 {
    self.high_seqno.load(Ordering::Relaxed)
  }
}

/// Collections known to a vbucket; single-owner map behind the vbucket's lock
/// vbucket 已知集合；位于 vbucket 锁之后的单所有者映射
#[derive(Debug)]
pub struct Manifest {
  uid: u64,
  map: HashMap<Cid, Collection>,
}

impl Default for Manifest {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(Cid::DEFAULT, Collection::new(Name::from("_default"), 0));
    Self { uid: 0, map }
  }
}

impl Manifest {
  #[inline]
  pub fn uid(&self) -> u64 {
    self.uid
  }

  #[inline]
  pub fn exists(&self, cid: Cid) -> bool {
    self.map.contains_key(&cid)
  }

  #[inline]
  pub fn get(&self, cid: Cid) -> Option<&Collection> {
    self.map.get(&cid)
  }

  /// Live collection ids, sorted
  /// 存活集合 ID（已排序）
  pub fn cids(&self) -> Vec<Cid> {
    let mut v: Vec<Cid> = self.map.keys().copied().collect();
    v.sort();
    v
  }

  pub fn create(&mut self, cid: Cid, name: Name, seqno: u64) -> Result<()> {
    if self.map.contains_key(&cid) {
      return Err(Error::CollectionExists(cid));
    }
    self.map.insert(cid, Collection::new(name, seqno));
    self.uid += 1;
    Ok(())
  }

  pub fn drop_collection(&mut self, cid: Cid) -> Result<Collection> {
    let c = self.map.remove(&cid).ok_or(Error::UnknownCollection(cid))?;
    self.uid += 1;
    Ok(c)
  }

  /// Account a queued mutation
  /// 记录一次入队变更
  pub fn on_mutation(&self, cid: Cid, seqno: u64, new: bool, deleted: bool) {
    let Some(c) = self.map.get(&cid) else {
      return;
    };
    c.high_seqno.fetch_max(seqno, Ordering::Relaxed);
    if deleted {
      let _ = c
        .items
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    } else if new {
      c.items.fetch_add(1, Ordering::Relaxed);
    }
  }
}
