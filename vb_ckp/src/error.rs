//! Error types for checkpoint operations
//! 检查点操作的错误类型

use thiserror::Error;
use vb_base::{Name, Vbid};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{vbid} start seqno {start} > high seqno {high}")]
  SeqnoAfterHigh { vbid: Vbid, start: u64, high: u64 },

  #[error("{vbid} seqno {seqno} outside snapshot [{start}, {end}]")]
  SeqnoOutOfSnapshot {
    vbid: Vbid,
    seqno: u64,
    start: u64,
    end: u64,
  },

  #[error("{vbid} duplicate item rejected again by new checkpoint {ckp_id}")]
  DupAfterRotate { vbid: Vbid, ckp_id: u64 },

  #[error("{vbid} undeduplicable item on non-active vbucket")]
  DupOnNonActive { vbid: Vbid },

  #[error("{vbid} cursor {name} not found")]
  CursorNotFound { vbid: Vbid, name: Name },
}

pub type Result<T> = std::result::Result<T, Error>;
