//! Persistence sink and by-seqno reader
//! 持久化接收端与按序号读取

use std::{
  collections::{BTreeMap, HashMap},
  sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use vb_base::{Cid, Key, QueuedItem, Vbid};

/// Durable store the flusher writes to and backfills read from
/// 刷盘写入、回填读取的持久存储
pub trait Disk: Send + Sync {
  /// Persist an ordered batch, one success flag per item
  /// 持久化有序批次，每条目一个成功标志
  fn flush(&self, vbid: Vbid, items: &[QueuedItem]) -> Vec<bool>;

  /// Latest version of every key with seqno in [from, to], ordered, at most `max`
  /// [from, to] 内每个键的最新版本，有序，最多 `max` 条
  fn scan(&self, vbid: Vbid, from: u64, to: u64, max: usize) -> Vec<QueuedItem>;

  fn high_seqno(&self, vbid: Vbid) -> u64;

  /// Tombstones at or below this seqno are gone
  /// 此序号及以下的墓碑已清除
  fn purge_seqno(&self, vbid: Vbid) -> u64;

  /// Discard everything above `seqno`, returns the new high seqno
  /// 丢弃 `seqno` 之上的数据，返回新的最高序号
  fn rollback(&self, vbid: Vbid, seqno: u64) -> u64;
}

#[derive(Default)]
struct VbFile {
  by_seqno: BTreeMap<u64, QueuedItem>,
  by_key: HashMap<(Cid, Key), u64>,
  purge: u64,
}

/// In-memory disk
/// 内存磁盘
#[derive(Default)]
pub struct MemDisk {
  files: Mutex<HashMap<Vbid, VbFile>>,
  fail: AtomicUsize,
}

impl MemDisk {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject the next `n` items handed to flush
  /// 拒绝接下来的 `n` 个刷盘条目
  pub fn fail_next(&self, n: usize) {
    self.fail.store(n, Ordering::Relaxed);
  }

  /// Drop tombstones at or below `upto`
  /// 清除 `upto` 及以下的墓碑
  pub fn purge(&self, vbid: Vbid, upto: u64) {
    let mut files = self.files.lock();
    let f = files.entry(vbid).or_default();
    let dead: Vec<u64> = f
      .by_seqno
      .range(..=upto)
      .filter(|(_, it)| it.is_deleted())
      .map(|(&s, _)| s)
      .collect();
    for s in dead {
      if let Some(it) = f.by_seqno.remove(&s) {
        f.by_key.remove(&(it.cid, it.key.clone()));
      }
    }
    f.purge = f.purge.max(upto);
  }

  pub fn num_items(&self, vbid: Vbid) -> usize {
    self
      .files
      .lock()
      .get(&vbid)
      .map_or(0, |f| f.by_seqno.values().filter(|i| !i.is_deleted()).count())
  }

  fn take_fail(&self) -> bool {
    self
      .fail
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
      .is_ok()
  }
}

impl Disk for MemDisk {
  fn flush(&self, vbid: Vbid, items: &[QueuedItem]) -> Vec<bool> {
    let mut files = self.files.lock();
    let f = files.entry(vbid).or_default();
    items
      .iter()
      .map(|it| {
        if self.take_fail() {
          return false;
        }
        let k = (it.cid, it.key.clone());
        if let Some(&old) = f.by_key.get(&k) {
          if old >= it.seqno {
            return true;
          }
          f.by_seqno.remove(&old);
        }
        f.by_key.insert(k, it.seqno);
        f.by_seqno.insert(it.seqno, it.clone());
        true
      })
      .collect()
  }

  fn scan(&self, vbid: Vbid, from: u64, to: u64, max: usize) -> Vec<QueuedItem> {
    if from > to {
      return Vec::new();
    }
    self.files.lock().get(&vbid).map_or_else(Vec::new, |f| {
      f.by_seqno
        .range(from..=to)
        .take(max)
        .map(|(_, it)| it.clone())
        .collect()
    })
  }

  fn high_seqno(&self, vbid: Vbid) -> u64 {
    self
      .files
      .lock()
      .get(&vbid)
      .and_then(|f| f.by_seqno.keys().next_back().copied())
      .unwrap_or(0)
  }

  fn purge_seqno(&self, vbid: Vbid) -> u64 {
    self.files.lock().get(&vbid).map_or(0, |f| f.purge)
  }

  fn rollback(&self, vbid: Vbid, seqno: u64) -> u64 {
    let mut files = self.files.lock();
    let f = files.entry(vbid).or_default();
    let gone = f.by_seqno.split_off(&(seqno + 1));
    for it in gone.values() {
      f.by_key.remove(&(it.cid, it.key.clone()));
    }
    f.by_seqno.keys().next_back().copied().unwrap_or(0)
  }
}
