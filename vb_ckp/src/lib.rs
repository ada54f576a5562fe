#![cfg_attr(docsrs, feature(doc_cfg))]

//! Per-vbucket checkpoint log with shared reader cursors
//! 每 vbucket 检查点日志与共享读游标

mod checkpoint;
pub mod conf;
mod cursor;
pub mod error;
mod mgr;
mod stats;

pub use checkpoint::{Checkpoint, CkpState, QueueStatus};
pub use conf::{Conf, ParsedConf};
pub use cursor::{Cursor, CursorReg, PERSISTENCE_CURSOR};
pub use error::{Error, Result};
pub use mgr::{CkpMgr, Queued};
pub use stats::{CkpInfo, CkpStats, CursorItems, Expelled, Removed, SnapshotInfo};
