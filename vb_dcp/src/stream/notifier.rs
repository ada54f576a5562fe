//! Stream that only reports "data after start is available"
//! 仅通知"起始序号之后有数据"的流

use std::collections::VecDeque;

use parking_lot::Mutex;
use vb_base::Vbid;

use crate::{EndReason, Resp};

struct Inner {
  dead: bool,
  ready: VecDeque<Resp>,
}

pub struct NotifierStream {
  vbid: Vbid,
  opaque: u32,
  start: u64,
  inner: Mutex<Inner>,
}

impl NotifierStream {
  /// Ends at once when `high` is already past `start`
  /// `high` 已超过 `start` 时立即结束
  pub fn new(vbid: Vbid, opaque: u32, start: u64, high: u64) -> Self {
    let s = Self {
      vbid,
      opaque,
      start,
      inner: Mutex::new(Inner {
        dead: false,
        ready: VecDeque::new(),
      }),
    };
    if high > start {
      s.set_dead(EndReason::Ok, true);
    }
    s
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.vbid
  }

  #[inline]
  pub fn opaque(&self) -> u32 {
    self.opaque
  }

  #[inline]
  pub fn is_live(&self) -> bool {
    !self.inner.lock().dead
  }

  /// True if this notification ended the stream
  /// 若此通知结束了流返回 true
  pub fn notify_seqno(&self, seqno: u64) -> bool {
    seqno > self.start && self.set_dead(EndReason::Ok, true)
  }

  pub fn set_dead(&self, reason: EndReason, send: bool) -> bool {
    let mut g = self.inner.lock();
    if g.dead {
      return false;
    }
    g.dead = true;
    if send {
      g.ready.push_back(Resp::StreamEnd {
        opaque: self.opaque,
        vbid: self.vbid,
        reason,
      });
    }
    send
  }

  pub fn next(&self) -> Option<Resp> {
    self.inner.lock().ready.pop_front()
  }
}
