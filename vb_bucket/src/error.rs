//! Error types for vbucket operations
//! vbucket 操作的错误类型

use thiserror::Error;
use vb_base::{Cid, VbState, Vbid};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} not my vbucket")]
  NotMyVbucket(Vbid),

  #[error("{0} already exists")]
  VbExists(Vbid),

  #[error("{vbid} is {}, operation needs {}", state.as_str(), want.as_str())]
  WrongState {
    vbid: Vbid,
    state: VbState,
    want: VbState,
  },

  #[error("unknown collection {0:?}")]
  UnknownCollection(Cid),

  #[error("collection {0:?} already exists")]
  CollectionExists(Cid),

  #[error("key not found")]
  KeyNotFound,

  #[error("key locked")]
  Locked,

  #[error("manifest update in progress")]
  TmpFail,

  #[error("{vbid} disk: {msg}")]
  Disk { vbid: Vbid, msg: String },

  #[error(transparent)]
  Ckp(#[from] vb_ckp::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
