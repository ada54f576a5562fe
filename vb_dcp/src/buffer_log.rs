//! Flow control: bytes sent but not yet acknowledged
//! 流控：已发送未确认的字节

/// Flow control state
/// 流控状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
  Disabled,
  SpaceAvailable,
  Full,
}

#[derive(Debug, Clone, Default)]
pub struct BufferLog {
  /// 0 disables
  max: usize,
  sent: usize,
}

impl BufferLog {
  #[inline]
  pub fn new(max: usize) -> Self {
    Self { max, sent: 0 }
  }

  pub fn state(&self) -> LogState {
    if self.max == 0 {
      LogState::Disabled
    } else if self.sent >= self.max {
      LogState::Full
    } else {
      LogState::SpaceAvailable
    }
  }

  #[inline]
  pub fn is_full(&self) -> bool {
    self.state() == LogState::Full
  }

  /// Resize the window; shrinking below the outstanding bytes pauses until acked
  /// 调整窗口；缩小到未确认字节以下时暂停直到确认
  #[inline]
  pub fn set_max(&mut self, max: usize) {
    self.max = max;
  }

  #[inline]
  pub fn max(&self) -> usize {
    self.max
  }

  #[inline]
  pub fn outstanding(&self) -> usize {
    self.sent
  }

  /// Record sent bytes; the message that crosses the limit still goes out
  /// 记录发送字节；越过上限的那条消息仍会发出
  #[inline]
  pub fn insert(&mut self, bytes: usize) {
    if self.max != 0 {
      self.sent += bytes;
    }
  }

  /// Record acknowledged bytes, returns true if this unpaused the log
  /// 记录确认字节，若因此解除暂停返回 true
  pub fn ack(&mut self, bytes: usize) -> bool {
    let was_full = self.is_full();
    self.sent = self.sent.saturating_sub(bytes);
    was_full && !self.is_full()
  }
}
