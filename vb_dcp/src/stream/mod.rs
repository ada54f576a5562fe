//! Streams: one per vbucket per connection
//! 流：每连接每 vbucket 一个

mod active;
mod notifier;
mod passive;

use std::sync::Arc;

pub use active::{ActiveState, ActiveStats, ActiveStream};
pub use notifier::NotifierStream;
pub use passive::{PassiveState, PassiveStream};
use vb_base::Vbid;

use crate::{EndReason, Resp};

/// Told when a stream has something to send
/// 流有数据可发时得到通知
pub trait StreamReady: Send + Sync {
  fn stream_ready(&self, vbid: Vbid);
}

#[derive(Clone)]
pub enum Stream {
  Active(Arc<ActiveStream>),
  Notifier(Arc<NotifierStream>),
  Passive(Arc<PassiveStream>),
}

impl Stream {
  pub fn vbid(&self) -> Vbid {
    match self {
      Stream::Active(s) => s.vbid(),
      Stream::Notifier(s) => s.vbid(),
      Stream::Passive(s) => s.vbid(),
    }
  }

  pub fn opaque(&self) -> u32 {
    match self {
      Stream::Active(s) => s.opaque(),
      Stream::Notifier(s) => s.opaque(),
      Stream::Passive(s) => s.opaque(),
    }
  }

  pub fn is_live(&self) -> bool {
    match self {
      Stream::Active(s) => s.is_live(),
      Stream::Notifier(s) => s.is_live(),
      Stream::Passive(s) => s.is_live(),
    }
  }

  pub fn next(&self) -> Option<Resp> {
    match self {
      Stream::Active(s) => s.next(),
      Stream::Notifier(s) => s.next(),
      Stream::Passive(s) => s.next(),
    }
  }

  /// Idempotent; true if a stream end message was queued
  /// 幂等；若入队了流结束消息返回 true
  pub fn set_dead(&self, reason: EndReason, send: bool) -> bool {
    match self {
      Stream::Active(s) => s.set_dead(reason, send),
      Stream::Notifier(s) => s.set_dead(reason, send),
      Stream::Passive(s) => s.set_dead(reason) && send,
    }
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Stream::Active(_) => "active",
      Stream::Notifier(_) => "notifier",
      Stream::Passive(_) => "passive",
    }
  }

  #[inline]
  pub fn as_active(&self) -> Option<&Arc<ActiveStream>> {
    match self {
      Stream::Active(s) => Some(s),
      _ => None,
    }
  }

  #[inline]
  pub fn as_passive(&self) -> Option<&Arc<PassiveStream>> {
    match self {
      Stream::Passive(s) => Some(s),
      _ => None,
    }
  }
}
