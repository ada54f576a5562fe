//! Queue operation kinds 队列操作类型

/// Collection system event
/// 集合系统事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysEvent {
  CollectionCreate,
  CollectionDrop,
}

/// Operation carried by a log entry
/// 日志条目携带的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Mutation,
  Deletion,
  SystemEvent(SysEvent),
  /// Opens a checkpoint
  /// 检查点开始
  CkpStart,
  /// Closes a checkpoint
  /// 检查点结束
  CkpEnd,
  /// Dummy head of every checkpoint
  /// 每个检查点的哑头
  Empty,
  SetVbState,
}

impl Op {
  /// Meta entries share a seqno and are never replicated
  /// 元条目共享序号且不复制
  #[inline]
  pub const fn is_meta(&self) -> bool {
    matches!(self, Op::CkpStart | Op::CkpEnd | Op::Empty | Op::SetVbState)
  }

  #[inline]
  pub const fn is_system_event(&self) -> bool {
    matches!(self, Op::SystemEvent(_))
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Op::Mutation => "mutation",
      Op::Deletion => "deletion",
      Op::SystemEvent(SysEvent::CollectionCreate) => "system_event(create)",
      Op::SystemEvent(SysEvent::CollectionDrop) => "system_event(drop)",
      Op::CkpStart => "checkpoint_start",
      Op::CkpEnd => "checkpoint_end",
      Op::Empty => "empty",
      Op::SetVbState => "set_vbucket_state",
    }
  }
}
