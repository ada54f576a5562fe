#![cfg_attr(docsrs, feature(doc_cfg))]

//! Shared vocabulary for vbucket checkpointing and DCP streaming
//! vbucket 检查点与 DCP 流共享类型

mod hlc;
mod item;
mod op;
mod range;
mod state;
mod vbid;

pub use hlc::Hlc;
pub use item::{Cid, Item, Key, QueuedItem};
pub use op::{Op, SysEvent};
pub use range::Range;
pub use state::{CkpType, VbState};
pub use vbid::Vbid;

/// Cheap clonable name (cursors, connections)
/// 廉价可克隆名称（游标、连接）
pub type Name = hipstr::HipStr<'static>;
