//! Flusher: drains the persistence cursor into the disk
//! 刷盘器：将持久化游标的数据写入磁盘

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use log::warn;
use parking_lot::Mutex;
use vb_base::{QueuedItem, Vbid};

use crate::{Disk, Result, VBucket};

/// One flush run
/// 一次刷盘结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flushed {
  pub items: usize,
  pub rejected: usize,
  /// Highest seqno durable without gaps after this run
  /// 本次刷盘后无空洞的最高持久序号
  pub seqno: u64,
}

/// Keep the newest entry of every key, order preserved
/// 保留每个键的最新条目，顺序不变
fn newest_per_key(items: Vec<QueuedItem>) -> Vec<QueuedItem> {
  let mut seen = HashSet::with_capacity(items.len());
  let mut out: Vec<QueuedItem> = items
    .into_iter()
    .rev()
    .filter(|it| seen.insert((it.cid, it.key.clone())))
    .collect();
  out.reverse();
  out.sort_by_key(|it| it.seqno);
  out
}

/// Items the disk refused plus the highest seqno fetched alongside them
/// 磁盘拒绝的条目及同批拉取的最高序号
#[derive(Default)]
struct Redirty {
  items: Vec<QueuedItem>,
  fetched: u64,
}

pub struct Flusher {
  disk: Arc<dyn Disk>,
  batch: usize,
  /// Retried first next run
  /// 下次优先重试
  reject: Mutex<HashMap<Vbid, Redirty>>,
}

impl Flusher {
  pub fn new(disk: Arc<dyn Disk>, batch: usize) -> Self {
    Self {
      disk,
      batch,
      reject: Mutex::new(HashMap::new()),
    }
  }

  /// Pending redirtied items of a vbucket
  /// vbucket 待重试条目数
  pub fn num_rejected(&self, vbid: Vbid) -> usize {
    self.reject.lock().get(&vbid).map_or(0, |r| r.items.len())
  }

  pub(crate) fn forget(&self, vbid: Vbid) {
    self.reject.lock().remove(&vbid);
  }

  /// Flush one batch of a vbucket
  /// 刷写 vbucket 的一个批次
  pub fn flush_vb(&self, vb: &VBucket) -> Result<Flushed> {
    let vbid = vb.vbid();
    let batch = vb.ckp().items_for_persistence(self.batch)?;
    let Redirty {
      mut items,
      mut fetched,
    } = self.reject.lock().remove(&vbid).unwrap_or_default();
    for it in batch.items {
      if !it.is_meta() {
        fetched = fetched.max(it.seqno);
        items.push(it);
      }
    }
    if items.is_empty() {
      vb.ckp().items_persisted();
      return Ok(Flushed::default());
    }

    let items = newest_per_key(items);
    let ok = self.disk.flush(vbid, &items);
    let mut out = Flushed::default();
    let mut rejected = Vec::new();
    for (i, it) in items.into_iter().enumerate() {
      if ok.get(i).copied().unwrap_or(false) {
        out.items += 1;
      } else {
        rejected.push(it);
      }
    }

    out.rejected = rejected.len();
    out.seqno = match rejected.iter().map(|it| it.seqno).min() {
      Some(min) => min - 1,
      None => fetched,
    };
    if !rejected.is_empty() {
      warn!("{vbid} flush rejected {} items, redirty", rejected.len());
      self.reject.lock().insert(
        vbid,
        Redirty {
          items: rejected,
          fetched,
        },
      );
    }
    vb.ckp().items_persisted();
    vb.set_persisted_seqno(out.seqno);
    Ok(out)
  }
}
