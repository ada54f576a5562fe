//! Vbucket / checkpoint states
//! Vbucket 与检查点状态

/// Vbucket state
/// vbucket 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VbState {
  Active = 1,
  Replica = 2,
  Pending = 3,
  Dead = 4,
}

impl VbState {
  pub const fn as_str(&self) -> &'static str {
    match self {
      VbState::Active => "active",
      VbState::Replica => "replica",
      VbState::Pending => "pending",
      VbState::Dead => "dead",
    }
  }

  #[inline]
  pub const fn from_u8(v: u8) -> Option<Self> {
    Some(match v {
      1 => VbState::Active,
      2 => VbState::Replica,
      3 => VbState::Pending,
      4 => VbState::Dead,
      _ => return None,
    })
  }
}

/// Origin of a checkpoint's snapshot
/// 检查点快照来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CkpType {
  #[default]
  Memory,
  Disk,
}
