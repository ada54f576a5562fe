//! Bucket configuration
//! 桶配置

/// Default configuration values
/// 默认配置值
pub mod default {
  pub const MAX_VBUCKETS: u16 = 1024;
  /// Items per flusher pull
  /// 每次刷盘拉取的条目数
  pub const FLUSH_BATCH: usize = 10_000;
  /// Checkpoint memory quota (bytes)
  /// 检查点内存配额（字节）
  pub const CKP_MEM_QUOTA: usize = 64 * 1024 * 1024;
  /// Percent of quota, expel above
  /// 配额百分比，超过则驱逐
  pub const EXPEL_WAT: u8 = 50;
  pub const CURSOR_DROP_LOW_WAT: u8 = 80;
  pub const CURSOR_DROP_HIGH_WAT: u8 = 90;
}

/// Bucket configuration
/// 桶配置
#[derive(Debug, Clone, Copy)]
pub enum Conf {
  MaxVbuckets(u16),
  /// Checkpoint manager knob applied to every vbucket
  /// 应用于每个 vbucket 的检查点配置
  Ckp(vb_ckp::Conf),
  FlushBatch(usize),
  CkpMemQuota(usize),
  /// Percent of quota
  /// 配额百分比
  ExpelWat(u8),
  CursorDropLowWat(u8),
  CursorDropHighWat(u8),
}

/// Parsed configuration
/// 解析后的配置
#[derive(Debug, Clone, Copy)]
pub struct ParsedConf {
  pub max_vbuckets: u16,
  pub ckp: vb_ckp::ParsedConf,
  pub flush_batch: usize,
  pub ckp_mem_quota: usize,
  pub expel_wat: u8,
  pub cursor_drop_low_wat: u8,
  pub cursor_drop_high_wat: u8,
}

impl ParsedConf {
  pub fn new(conf: &[Conf]) -> Self {
    let mut ckp = Vec::new();
    let mut c = Self {
      max_vbuckets: default::MAX_VBUCKETS,
      ckp: vb_ckp::ParsedConf::default(),
      flush_batch: default::FLUSH_BATCH,
      ckp_mem_quota: default::CKP_MEM_QUOTA,
      expel_wat: default::EXPEL_WAT,
      cursor_drop_low_wat: default::CURSOR_DROP_LOW_WAT,
      cursor_drop_high_wat: default::CURSOR_DROP_HIGH_WAT,
    };
    for item in conf {
      match *item {
        Conf::MaxVbuckets(v) => c.max_vbuckets = v.max(1),
        Conf::Ckp(v) => ckp.push(v),
        Conf::FlushBatch(v) => c.flush_batch = v.max(1),
        Conf::CkpMemQuota(v) => c.ckp_mem_quota = v,
        Conf::ExpelWat(v) => c.expel_wat = v.min(100),
        Conf::CursorDropLowWat(v) => c.cursor_drop_low_wat = v.min(100),
        Conf::CursorDropHighWat(v) => c.cursor_drop_high_wat = v.min(100),
      }
    }
    c.ckp = vb_ckp::ParsedConf::new(&ckp);
    if c.cursor_drop_low_wat > c.cursor_drop_high_wat {
      c.cursor_drop_low_wat = c.cursor_drop_high_wat;
    }
    c
  }

  /// Percent of the checkpoint quota in bytes
  /// 检查点配额百分比对应的字节数
  #[inline]
  pub fn quota_pct(&self, pct: u8) -> usize {
    self.ckp_mem_quota / 100 * pct as usize
  }
}

impl Default for ParsedConf {
  fn default() -> Self {
    Self::new(&[])
  }
}
