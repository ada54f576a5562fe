#![cfg_attr(docsrs, feature(doc_cfg))]

//! DCP: change streams over vbucket checkpoint logs
//! DCP：基于 vbucket 检查点日志的变更流

pub mod backfill;
mod buffer_log;
pub mod conf;
mod conn_map;
mod consumer;
pub mod error;
mod filter;
mod producer;
mod ready;
mod remover;
pub mod resp;
mod sink;
pub mod stream;

pub use backfill::{BackfillMgr, BackfillStats, DiskBackfill, Phase, Progress};
pub use buffer_log::{BufferLog, LogState};
pub use conf::{Conf, ParsedConf};
pub use conn_map::ConnMap;
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use filter::Filter;
pub use producer::{Clock, Producer, ProducerStats, Step, coarse_clock};
pub use ready::ReadyQueue;
pub use remover::{CkpRemover, RemoverRun};
pub use resp::{Ack, EndReason, Resp, StreamReq, flags, marker};
pub use sink::{SendErr, Sink};
pub use stream::{
  ActiveState, ActiveStats, ActiveStream, NotifierStream, PassiveState, PassiveStream, Stream,
  StreamReady,
};
