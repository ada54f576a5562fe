//! Key-value item store the vbucket writes through
//! vbucket 写入的键值存储

use std::collections::HashMap;

use parking_lot::RwLock;
use vb_base::{Cid, Key, QueuedItem, Vbid};

use crate::{Error, Result};

/// Linearizable-per-key store keyed by (vbucket, collection, key)
/// 按（vbucket，集合，键）寻址、单键线性一致的存储
pub trait ItemStore: Send + Sync {
  fn get(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<QueuedItem>;

  /// Store the latest version, releasing any lock
  /// 存储最新版本并释放锁
  fn store(&self, item: QueuedItem);

  /// Cas holding the key lock
  /// 持有键锁的 cas
  fn locked(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<u64>;

  fn remove(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<QueuedItem>;

  /// Lock a key for `cas`
  /// 以 `cas` 锁定键
  fn lock(&self, vbid: Vbid, cid: Cid, key: &Key, cas: u64) -> Result<()>;

  fn unlock(&self, vbid: Vbid, cid: Cid, key: &Key, cas: u64) -> Result<()>;

  /// Drop every entry of a vbucket above `seqno`
  /// 删除 vbucket 中 `seqno` 之上的条目
  fn truncate_above(&self, vbid: Vbid, seqno: u64);
}

struct Slot {
  item: QueuedItem,
  locked: Option<u64>,
}

type StoreKey = (Vbid, Cid, Key);

/// In-memory store
/// 内存存储
#[derive(Default)]
pub struct MemStore {
  map: RwLock<HashMap<StoreKey, Slot>>,
}

impl MemStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.map.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.read().is_empty()
  }
}

impl ItemStore for MemStore {
  fn get(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<QueuedItem> {
    self
      .map
      .read()
      .get(&(vbid, cid, key.clone()))
      .filter(|s| !s.item.is_deleted())
      .map(|s| s.item.clone())
  }

  fn store(&self, item: QueuedItem) {
    let k = (item.vbid, item.cid, item.key.clone());
    self.map.write().insert(k, Slot { item, locked: None });
  }

  fn locked(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<u64> {
    self
      .map
      .read()
      .get(&(vbid, cid, key.clone()))
      .and_then(|s| s.locked)
  }

  fn remove(&self, vbid: Vbid, cid: Cid, key: &Key) -> Option<QueuedItem> {
    self
      .map
      .write()
      .remove(&(vbid, cid, key.clone()))
      .map(|s| s.item)
  }

  fn lock(&self, vbid: Vbid, cid: Cid, key: &Key, cas: u64) -> Result<()> {
    let mut map = self.map.write();
    match map.get_mut(&(vbid, cid, key.clone())) {
      Some(s) if s.locked.is_none() => {
        s.locked = Some(cas);
        Ok(())
      }
      Some(_) => Err(Error::Locked),
      None => Err(Error::KeyNotFound),
    }
  }

  fn unlock(&self, vbid: Vbid, cid: Cid, key: &Key, cas: u64) -> Result<()> {
    let mut map = self.map.write();
    match map.get_mut(&(vbid, cid, key.clone())) {
      Some(s) if s.locked == Some(cas) => {
        s.locked = None;
        Ok(())
      }
      Some(_) => Err(Error::Locked),
      None => Err(Error::KeyNotFound),
    }
  }

  fn truncate_above(&self, vbid: Vbid, seqno: u64) {
    self
      .map
      .write()
      .retain(|(v, _, _), s| *v != vbid || s.item.seqno <= seqno);
  }
}
