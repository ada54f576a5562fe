//! Hybrid logical clock for cas generation
//! 用于生成 cas 的混合逻辑时钟

use std::sync::atomic::{AtomicU64, Ordering};

/// Low bits reserved for the logical counter
/// 低位保留给逻辑计数
const LOGICAL_MASK: u64 = 0xFFFF;

/// Hybrid logical clock: wall time in the high bits, strictly increasing
/// 混合逻辑时钟：高位为墙钟时间，严格递增
#[derive(Debug, Default)]
pub struct Hlc {
  max: AtomicU64,
}

impl Hlc {
  #[inline]
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  fn wall() -> u64 {
    coarsetime::Clock::now_since_epoch().as_nanos() & !LOGICAL_MASK
  }

  /// Next cas, greater than every cas seen before
  /// 下一个 cas，大于之前所有值
  pub fn next(&self) -> u64 {
    let now = Self::wall();
    let prev = self
      .max
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |max| {
        Some(if now > max { now } else { max + 1 })
      })
      .unwrap_or_else(|v| v);
    if now > prev { now } else { prev + 1 }
  }

  /// Fold a cas produced elsewhere (replica path)
  /// 合并外部产生的 cas（副本路径）
  #[inline]
  pub fn observe(&self, cas: u64) {
    self.max.fetch_max(cas, Ordering::AcqRel);
  }

  #[inline]
  pub fn max(&self) -> u64 {
    self.max.load(Ordering::Acquire)
  }
}
