//! Snapshot range 快照范围

/// Inclusive seqno interval [start, end]
/// 闭区间 [start, end]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
  pub start: u64,
  pub end: u64,
}

impl Range {
  #[inline]
  pub const fn new(start: u64, end: u64) -> Self {
    Self { start, end }
  }

  #[inline]
  pub const fn contains(&self, seqno: u64) -> bool {
    self.start <= seqno && seqno <= self.end
  }
}
