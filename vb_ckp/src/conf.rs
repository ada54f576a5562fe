//! Checkpoint manager configuration
//! 检查点管理器配置

/// Default configuration values
/// 默认配置值
pub mod default {
  pub const MAX_ITEMS: usize = 10_000;
  /// Seconds
  /// 秒
  pub const PERIOD: u64 = 5;
  pub const MAX_CHECKPOINTS: usize = 10;
  pub const ITEM_NUM_BASED: bool = true;
  pub const PERSISTENCE: bool = true;
  pub const MEM_HIGH_WAT: usize = usize::MAX;
}

/// Open checkpoint needs this many items before memory pressure may close it
/// 内存压力关闭检查点前打开检查点的最少条目数
pub const MIN_CHECKPOINT_ITEMS: usize = 10;

/// Checkpoint manager configuration
/// 检查点管理器配置
#[derive(Debug, Clone, Copy)]
pub enum Conf {
  /// Items per checkpoint before rotation
  /// 轮转前每检查点条目数
  MaxItems(usize),
  /// Seconds an open checkpoint may stay open
  /// 打开检查点最长存活秒数
  Period(u64),
  /// Checkpoint list length bound for rotation
  /// 轮转的检查点列表长度上限
  MaxCheckpoints(usize),
  /// Rotate on item count
  /// 按条目数轮转
  ItemNumBased(bool),
  /// Register the persistence cursor
  /// 注册持久化游标
  Persistence(bool),
  /// Checkpoint memory that forces rotation (bytes)
  /// 强制轮转的检查点内存（字节）
  MemHighWat(usize),
}

/// Parsed configuration
/// 解析后的配置
#[derive(Debug, Clone, Copy)]
pub struct ParsedConf {
  pub max_items: usize,
  pub period: u64,
  pub max_checkpoints: usize,
  pub item_num_based: bool,
  pub persistence: bool,
  pub mem_high_wat: usize,
}

impl Default for ParsedConf {
  fn default() -> Self {
    Self {
      max_items: default::MAX_ITEMS,
      period: default::PERIOD,
      max_checkpoints: default::MAX_CHECKPOINTS,
      item_num_based: default::ITEM_NUM_BASED,
      persistence: default::PERSISTENCE,
      mem_high_wat: default::MEM_HIGH_WAT,
    }
  }
}

impl ParsedConf {
  pub fn new(conf: &[Conf]) -> Self {
    let mut c = Self::default();
    for item in conf {
      match *item {
        Conf::MaxItems(v) => c.max_items = v.max(1),
        Conf::Period(v) => c.period = v,
        Conf::MaxCheckpoints(v) => c.max_checkpoints = v.max(2),
        Conf::ItemNumBased(v) => c.item_num_based = v,
        Conf::Persistence(v) => c.persistence = v,
        Conf::MemHighWat(v) => c.mem_high_wat = v,
      }
    }
    c
  }
}
