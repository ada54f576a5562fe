//! DCP error types, one variant per wire status
//! DCP 错误类型，每个变体对应一个协议状态

use thiserror::Error;
use vb_base::{Cid, Vbid};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} not my vbucket")]
  NotMyVbucket(Vbid),

  #[error("rollback to {0}")]
  Rollback(u64),

  #[error("{0} stream already exists")]
  KeyExists(Vbid),

  #[error("{vbid} bad range: {msg}")]
  Erange { vbid: Vbid, msg: &'static str },

  #[error("{0} no stream")]
  KeyNotFound(Vbid),

  #[error("unknown collection {0:?}")]
  UnknownCollection(Cid),

  #[error("invalid argument: {0}")]
  Einval(String),

  #[error("temporary failure")]
  TmpFail,

  #[error("disconnect: {0}")]
  Disconnect(String),
}

impl From<vb_bucket::Error> for Error {
  fn from(e: vb_bucket::Error) -> Self {
    use vb_bucket::Error as E;
    match e {
      E::NotMyVbucket(vbid) | E::WrongState { vbid, .. } => Error::NotMyVbucket(vbid),
      E::UnknownCollection(cid) => Error::UnknownCollection(cid),
      E::TmpFail | E::Locked => Error::TmpFail,
      E::Ckp(e) => e.into(),
      e => Error::Disconnect(e.to_string()),
    }
  }
}

impl From<vb_ckp::Error> for Error {
  fn from(e: vb_ckp::Error) -> Self {
    use vb_ckp::Error as E;
    match e {
      E::SeqnoAfterHigh { vbid, .. } => Error::Erange {
        vbid,
        msg: "start after high seqno",
      },
      E::SeqnoOutOfSnapshot { vbid, .. } => Error::Erange {
        vbid,
        msg: "seqno outside snapshot",
      },
      e => Error::Disconnect(e.to_string()),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
