//! Disk backfill: Create -> Scan -> Complete -> Done
//! 磁盘回填：创建 -> 扫描 -> 完成 -> 结束

use std::sync::{Arc, Weak};

use log::{debug, warn};
use vb_base::Vbid;
use vb_bucket::Disk;

use super::{BackfillMgr, Read, Run};
use crate::{EndReason, stream::ActiveStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Create,
  Scan,
  Complete,
  Done,
}

/// Reads `[start, end]` of one vbucket from disk into its stream
/// 将一个 vbucket 的 `[start, end]` 从磁盘读入其流
pub struct DiskBackfill {
  stream: Weak<ActiveStream>,
  disk: Arc<dyn Disk>,
  vbid: Vbid,
  start: u64,
  end: u64,
  /// Next seqno to read, a refused item is read again
  /// 下一个读取序号，被拒条目会重读
  next: u64,
  phase: Phase,
}

impl DiskBackfill {
  pub fn new(stream: &Arc<ActiveStream>, disk: Arc<dyn Disk>, start: u64, end: u64) -> Self {
    Self {
      stream: Arc::downgrade(stream),
      disk,
      vbid: stream.vbid(),
      start,
      end,
      next: start,
      phase: Phase::Create,
    }
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.vbid
  }

  #[inline]
  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub(crate) fn run(&mut self, mgr: &BackfillMgr) -> Run {
    let Some(stream) = self.stream.upgrade().filter(|s| s.is_live()) else {
      debug!("{} backfill cancelled in {:?}", self.vbid, self.phase);
      self.phase = Phase::Done;
      return Run::Done;
    };
    match self.phase {
      Phase::Create => self.create(&stream),
      Phase::Scan => self.scan(&stream, mgr),
      Phase::Complete => {
        stream.complete_backfill(self.end);
        self.phase = Phase::Done;
        Run::Done
      }
      Phase::Done => Run::Done,
    }
  }

  fn create(&mut self, stream: &ActiveStream) -> Run {
    let purge = self.disk.purge_seqno(self.vbid);
    // Tombstones the reader never saw are gone
    if self.start > 1 && self.start <= purge {
      warn!(
        "{} backfill from {} behind purge seqno {purge}",
        self.vbid, self.start
      );
      stream.set_dead(EndReason::Rollback, true);
      self.phase = Phase::Done;
      return Run::Done;
    }
    self.end = self.end.min(self.disk.high_seqno(self.vbid));
    if self.start > self.end {
      self.phase = Phase::Complete;
      return Run::More;
    }
    debug!("{} backfill [{}, {}]", self.vbid, self.start, self.end);
    stream.mark_disk_snapshot(self.start, self.end);
    self.phase = Phase::Scan;
    Run::More
  }

  fn scan(&mut self, stream: &ActiveStream, mgr: &BackfillMgr) -> Run {
    let items = self
      .disk
      .scan(self.vbid, self.next, self.end, mgr.scan_items());
    for it in items {
      let size = it.size();
      match mgr.bytes_check_and_read(size) {
        Read::Ok => {}
        Read::ScanDone => return Run::More,
        Read::Full => return Run::Snooze,
      }
      let seqno = it.seqno;
      if !stream.backfill_received(it) {
        mgr.bytes_sent(size);
        self.phase = Phase::Done;
        return Run::Done;
      }
      self.next = seqno + 1;
    }
    if self.next > self.end || self.disk.scan(self.vbid, self.next, self.end, 1).is_empty() {
      self.phase = Phase::Complete;
    }
    Run::More
  }
}
