//! Checkpoint remover: periodic memory reclamation across a bucket
//! 检查点回收任务：周期性回收桶内检查点内存

use log::{debug, info};
use vb_bucket::Bucket;

use crate::ConnMap;

/// Checkpoints reclaimed per vbucket per run
/// 每次运行每个 vbucket 回收的检查点上限
const REMOVE_LIMIT: usize = 64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoverRun {
  pub removed: usize,
  pub expelled: usize,
  pub dropped: usize,
}

pub struct CkpRemover;

impl CkpRemover {
  /// One pass: remove unreferenced checkpoints, expel above the expel mark,
  /// then drop slow cursors while above the high mark until under the low mark
  /// 一轮：移除无引用检查点，超过驱逐线则驱逐，超过高水位则丢弃慢游标直到低于低水位
  pub fn run(bucket: &Bucket, conns: &ConnMap) -> RemoverRun {
    let conf = bucket.conf();
    let mut r = RemoverRun::default();
    for vb in bucket.vbuckets() {
      r.removed += vb.ckp().remove_closed_unref_checkpoints(REMOVE_LIMIT).items;
    }

    if bucket.ckp_mem_usage() > conf.quota_pct(conf.expel_wat) {
      for vb in bucket.vbuckets() {
        r.expelled += vb.ckp().expel_unreferenced_items().items;
      }
    }

    let high = conf.quota_pct(conf.cursor_drop_high_wat);
    let low = conf.quota_pct(conf.cursor_drop_low_wat);
    let mem = bucket.ckp_mem_usage();
    if mem > high {
      info!("checkpoint memory {mem} over {high}, dropping cursors");
      'vbs: for vb in bucket.vbuckets() {
        for c in vb.ckp().cursors_to_drop() {
          if bucket.ckp_mem_usage() <= low {
            break 'vbs;
          }
          if conns.handle_slow_stream(vb.vbid(), &c.name) {
            r.dropped += 1;
            r.removed += vb.ckp().remove_closed_unref_checkpoints(REMOVE_LIMIT).items;
          }
        }
      }
    }
    if r != RemoverRun::default() {
      debug!(
        "remover: {} removed, {} expelled, {} cursors dropped",
        r.removed, r.expelled, r.dropped
      );
    }
    r
  }
}
