//! Per-connection backfill scheduling with a shared read budget
//! 每连接回填调度与共享读取预算

mod disk;

use std::collections::VecDeque;

use log::debug;
use parking_lot::Mutex;
use vb_base::Name;

pub use disk::{DiskBackfill, Phase};

use crate::ParsedConf;

/// Outcome of one backfill run
/// 单次回填运行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
  /// Nothing scheduled
  /// 无回填
  Idle,
  /// Ran, call again
  /// 已运行，需再次调用
  Busy,
  /// Shared buffer full, waits for sent bytes
  /// 共享缓冲已满，等待发送释放
  Blocked,
}

/// Answer of the budget check
/// 预算检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Read {
  Ok,
  /// Per-run scan budget spent, yield
  /// 单次扫描预算用尽，让出
  ScanDone,
  Full,
}

/// Outcome of one step of a single backfill
/// 单个回填一步的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Run {
  More,
  Snooze,
  Done,
}

#[derive(Debug, Default)]
struct Buffer {
  read: usize,
  max: usize,
  /// Size of the read refused when the buffer filled
  /// 缓冲填满时被拒绝的读取大小
  next_read: usize,
  full: bool,
  scan_bytes: usize,
  scan_items: usize,
}

#[derive(Default)]
struct Queues {
  active: VecDeque<DiskBackfill>,
  snoozing: VecDeque<DiskBackfill>,
  pending: VecDeque<DiskBackfill>,
}

impl Queues {
  #[inline]
  fn running(&self) -> usize {
    self.active.len() + self.snoozing.len()
  }

  #[inline]
  fn len(&self) -> usize {
    self.running() + self.pending.len()
  }
}

/// Backfill byte accounting snapshot
/// 回填字节统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStats {
  pub active: usize,
  pub snoozing: usize,
  pub pending: usize,
  pub bytes_read: usize,
  pub full: bool,
}

pub struct BackfillMgr {
  name: Name,
  scan_bytes: usize,
  scan_items: usize,
  max_backfills: usize,
  buffer: Mutex<Buffer>,
  queues: Mutex<Queues>,
}

impl BackfillMgr {
  pub fn new(name: Name, conf: &ParsedConf) -> Self {
    Self {
      name,
      scan_bytes: conf.scan_bytes,
      scan_items: conf.scan_items,
      max_backfills: conf.max_backfills,
      buffer: Mutex::new(Buffer {
        max: conf.backfill_bytes,
        ..Default::default()
      }),
      queues: Mutex::new(Queues::default()),
    }
  }

  #[inline]
  pub(crate) fn scan_items(&self) -> usize {
    self.scan_items
  }

  pub fn schedule(&self, bf: DiskBackfill) {
    let mut q = self.queues.lock();
    if q.running() < self.max_backfills {
      q.active.push_back(bf);
    } else {
      debug!("{} backfill {} pending", self.name, bf.vbid());
      q.pending.push_back(bf);
    }
  }

  #[inline]
  pub fn num_backfills(&self) -> usize {
    self.queues.lock().len()
  }

  pub fn stats(&self) -> BackfillStats {
    let (active, snoozing, pending) = {
      let q = self.queues.lock();
      (q.active.len(), q.snoozing.len(), q.pending.len())
    };
    let b = self.buffer.lock();
    BackfillStats {
      active,
      snoozing,
      pending,
      bytes_read: b.read,
      full: b.full,
    }
  }

  /// Charge `bytes` read from disk against the scan and shared budgets
  /// 将从磁盘读取的 `bytes` 计入扫描与共享预算
  pub(crate) fn bytes_check_and_read(&self, bytes: usize) -> Read {
    let mut b = self.buffer.lock();
    if b.scan_items >= self.scan_items || (b.scan_bytes > 0 && b.scan_bytes + bytes > self.scan_bytes) {
      return Read::ScanDone;
    }
    if b.full {
      return Read::Full;
    }
    if b.read == 0 || b.read + bytes <= b.max {
      b.read += bytes;
      b.scan_bytes += bytes;
      b.scan_items += 1;
      return Read::Ok;
    }
    b.full = true;
    b.next_read = bytes;
    Read::Full
  }

  /// Release bytes the stream handed on; resumes once 3/4 drained and the refused read fits,
  /// or once fully drained
  /// 释放流已交出的字节；排空到 3/4 且被拒读取可容纳时恢复，完全排空时也恢复
  pub(crate) fn bytes_sent(&self, bytes: usize) {
    let unfilled = {
      let mut b = self.buffer.lock();
      b.read = b.read.saturating_sub(bytes);
      let fits = b.max.saturating_sub(b.read) >= b.next_read && b.read < b.max / 4 * 3;
      if b.full && (b.read == 0 || fits) {
        b.full = false;
        b.next_read = 0;
        true
      } else {
        false
      }
    };
    if unfilled {
      let mut q = self.queues.lock();
      let snoozing = std::mem::take(&mut q.snoozing);
      q.active.extend(snoozing);
    }
  }

  /// Run one step of the next backfill
  /// 运行下一个回填的一步
  pub fn run(&self) -> Progress {
    {
      let mut b = self.buffer.lock();
      if b.full {
        return Progress::Blocked;
      }
      b.scan_bytes = 0;
      b.scan_items = 0;
    }

    let bf = {
      let mut q = self.queues.lock();
      if q.active.is_empty() {
        let snoozing = std::mem::take(&mut q.snoozing);
        q.active.extend(snoozing);
      }
      q.active.pop_front()
    };
    let Some(mut bf) = bf else {
      return Progress::Idle;
    };

    let run = bf.run(self);
    let mut q = self.queues.lock();
    match run {
      Run::More => q.active.push_back(bf),
      Run::Snooze => q.snoozing.push_back(bf),
      Run::Done => {
        if let Some(p) = q.pending.pop_front() {
          q.active.push_back(p);
        }
      }
    }
    if q.len() == 0 {
      Progress::Idle
    } else {
      Progress::Busy
    }
  }

  /// Run until idle or blocked
  /// 运行直到空闲或阻塞
  pub fn run_all(&self) -> Progress {
    loop {
      match self.run() {
        Progress::Busy => {}
        p => return p,
      }
    }
  }
}
