//! DCP connection configuration
//! DCP 连接配置

/// Default configuration values
/// 默认配置值
pub mod default {
  /// Flow control window (bytes), 0 disables
  /// 流控窗口（字节），0 表示关闭
  pub const BUFFER_SIZE: usize = 10 * 1024 * 1024;
  /// Seconds between noops
  /// noop 间隔（秒）
  pub const NOOP_INTERVAL: u64 = 20;
  /// Seconds without peer traffic before disconnect, 0 disables
  /// 无对端消息多少秒后断开，0 表示关闭
  pub const IDLE_TIMEOUT: u64 = 360;
  pub const NOTIFIER: bool = false;
  /// Shared backfill buffer per connection (bytes)
  /// 每连接共享回填缓冲（字节）
  pub const BACKFILL_BYTES: usize = 20 * 1024 * 1024;
  /// Per-run scan budget
  /// 单次扫描预算
  pub const SCAN_BYTES: usize = 4 * 1024 * 1024;
  pub const SCAN_ITEMS: usize = 4096;
  /// Active + snoozing backfills, the rest wait in pending
  /// 活跃与休眠回填上限，其余进入等待队列
  pub const MAX_BACKFILLS: usize = 4096;
  /// Items per checkpoint fetch
  /// 每次检查点拉取的条目数
  pub const ITEM_LIMIT: usize = 1000;
}

/// Connection configuration
/// 连接配置
#[derive(Debug, Clone, Copy)]
pub enum Conf {
  BufferSize(usize),
  NoopInterval(u64),
  IdleTimeout(u64),
  /// Streams only report "seqno available"
  /// 流只通知"序号可用"
  Notifier(bool),
  BackfillBytes(usize),
  ScanBytes(usize),
  ScanItems(usize),
  MaxBackfills(usize),
  ItemLimit(usize),
}

/// Parsed configuration
/// 解析后的配置
#[derive(Debug, Clone, Copy)]
pub struct ParsedConf {
  pub buffer_size: usize,
  pub noop_interval: u64,
  pub idle_timeout: u64,
  pub notifier: bool,
  pub backfill_bytes: usize,
  pub scan_bytes: usize,
  pub scan_items: usize,
  pub max_backfills: usize,
  pub item_limit: usize,
}

impl ParsedConf {
  pub fn new(conf: &[Conf]) -> Self {
    let mut c = Self {
      buffer_size: default::BUFFER_SIZE,
      noop_interval: default::NOOP_INTERVAL,
      idle_timeout: default::IDLE_TIMEOUT,
      notifier: default::NOTIFIER,
      backfill_bytes: default::BACKFILL_BYTES,
      scan_bytes: default::SCAN_BYTES,
      scan_items: default::SCAN_ITEMS,
      max_backfills: default::MAX_BACKFILLS,
      item_limit: default::ITEM_LIMIT,
    };
    for item in conf {
      match *item {
        Conf::BufferSize(v) => c.buffer_size = v,
        Conf::NoopInterval(v) => c.noop_interval = v.max(1),
        Conf::IdleTimeout(v) => c.idle_timeout = v,
        Conf::Notifier(v) => c.notifier = v,
        Conf::BackfillBytes(v) => c.backfill_bytes = v.max(1),
        Conf::ScanBytes(v) => c.scan_bytes = v.max(1),
        Conf::ScanItems(v) => c.scan_items = v.max(1),
        Conf::MaxBackfills(v) => c.max_backfills = v.max(1),
        Conf::ItemLimit(v) => c.item_limit = v.max(1),
      }
    }
    c
  }
}

impl Default for ParsedConf {
  fn default() -> Self {
    Self::new(&[])
  }
}
