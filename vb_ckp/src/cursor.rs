//! Checkpoint cursor handles
//! 检查点游标句柄

use std::sync::Arc;

use vb_base::Name;

/// Name of the cursor driving the disk flusher
/// 驱动刷盘的游标名
pub const PERSISTENCE_CURSOR: &str = "persistence";

/// Named reader position, owned jointly by the manager and one consumer
/// 命名读位置，由管理器与单个消费者共同持有
#[derive(Debug)]
pub struct Cursor {
  pub name: Name,
}

impl Cursor {
  #[inline]
  pub fn new(name: Name) -> Arc<Self> {
    Arc::new(Self { name })
  }

  #[inline]
  pub fn is_persistence(&self) -> bool {
    self.name.as_str() == PERSISTENCE_CURSOR
  }
}

/// Registration result
/// 注册结果
#[derive(Debug, Clone)]
pub struct CursorReg {
  pub cursor: Arc<Cursor>,
  /// First seqno the cursor will return
  /// 游标将返回的首个序号
  pub seqno: u64,
  /// Older data must come from disk first
  /// 旧数据需先从磁盘读取
  pub try_backfill: bool,
}

/// Manager-side cursor record
/// 管理器侧游标记录
#[derive(Debug, Clone)]
pub(crate) struct CursorPos {
  pub handle: Arc<Cursor>,
  pub ckp_id: u64,
  pub slot: u64,
}
