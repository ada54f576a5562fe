//! Partition id 分区 ID

use std::fmt;

/// 16-bit vbucket (partition) id
/// 16 位 vbucket（分区）ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Vbid(pub u16);

impl Vbid {
  #[inline]
  pub const fn new(id: u16) -> Self {
    Self(id)
  }

  #[inline]
  pub const fn idx(&self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for Vbid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "vb:{}", self.0)
  }
}
