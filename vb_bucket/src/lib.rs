#![cfg_attr(docsrs, feature(doc_cfg))]

//! Vbuckets, failover history, flusher and the bucket context
//! vbucket、故障转移历史、刷盘器与桶上下文

mod bucket;
pub mod conf;
mod disk;
pub mod error;
mod failover;
mod flusher;
mod manifest;
mod store;
mod vbucket;

pub use bucket::Bucket;
pub use conf::{Conf, ParsedConf};
pub use disk::{Disk, MemDisk};
pub use error::{Error, Result};
pub use failover::{FailoverEntry, FailoverTable, MAX_ENTRIES};
pub use flusher::{Flushed, Flusher};
pub use manifest::{Collection, Manifest};
pub use store::{ItemStore, MemStore};
pub use vbucket::{Notify, VBucket};
