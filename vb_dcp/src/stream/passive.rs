//! Consumer side stream applying a remote vbucket's log
//! 应用远端 vbucket 日志的消费者侧流

use std::{collections::VecDeque, sync::Arc};

use log::{debug, info};
use parking_lot::Mutex;
use vb_base::{CkpType, Item, Range, VbState, Vbid};
use vb_bucket::VBucket;

use crate::{Ack, EndReason, Error, Resp, Result, StreamReq, marker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassiveState {
  Pending,
  Reading,
  Dead,
}

struct Snap {
  range: Range,
  flags: u32,
  acked: bool,
}

struct Inner {
  state: PassiveState,
  ready: VecDeque<Resp>,
  snap: Option<Snap>,
  last_seqno: u64,
  items: u64,
}

pub struct PassiveStream {
  vbid: Vbid,
  opaque: u32,
  flags: u32,
  vb: Arc<VBucket>,
  inner: Mutex<Inner>,
}

impl PassiveStream {
  /// Queue a request resuming after what the vbucket holds
  /// 入队从 vbucket 已有数据之后继续的请求
  pub fn new(vb: Arc<VBucket>, opaque: u32, flags: u32) -> Self {
    let vbid = vb.vbid();
    let high = vb.high_seqno();
    let snap = vb.ckp().snapshot_info().range;
    let req = StreamReq {
      flags,
      opaque,
      vbid,
      start: high,
      end: u64::MAX,
      uuid: vb.failover_latest().uuid,
      snap_start: snap.start.min(high),
      snap_end: snap.end.max(high),
    };
    debug!("{vbid} passive stream request {req:?}");
    Self {
      vbid,
      opaque,
      flags,
      vb,
      inner: Mutex::new(Inner {
        state: PassiveState::Pending,
        ready: VecDeque::from([Resp::StreamReq(req)]),
        snap: None,
        last_seqno: high,
        items: 0,
      }),
    }
  }

  #[inline]
  pub fn vbid(&self) -> Vbid {
    self.vbid
  }

  #[inline]
  pub fn opaque(&self) -> u32 {
    self.opaque
  }

  /// Stream request flags
  /// 流请求标志
  #[inline]
  pub fn flags(&self) -> u32 {
    self.flags
  }

  #[inline]
  pub fn state(&self) -> PassiveState {
    self.inner.lock().state
  }

  #[inline]
  pub fn is_live(&self) -> bool {
    self.state() != PassiveState::Dead
  }

  #[inline]
  pub fn last_seqno(&self) -> u64 {
    self.inner.lock().last_seqno
  }

  #[inline]
  pub fn num_items(&self) -> u64 {
    self.inner.lock().items
  }

  /// The producer accepted the request
  /// 生产者接受了请求
  pub fn accept(&self) {
    let mut g = self.inner.lock();
    if g.state == PassiveState::Pending {
      g.state = PassiveState::Reading;
    }
  }

  fn reading(&self, g: &Inner) -> Result<()> {
    if g.state != PassiveState::Reading {
      return Err(Error::Einval(format!("{} stream not reading", self.vbid)));
    }
    Ok(())
  }

  pub fn marker(&self, start: u64, end: u64, flags: u32) -> Result<()> {
    let mut g = self.inner.lock();
    self.reading(&g)?;
    if start > end {
      return Err(Error::Erange {
        vbid: self.vbid,
        msg: "marker start after end",
      });
    }
    let typ = if flags & marker::DISK != 0 {
      CkpType::Disk
    } else {
      CkpType::Memory
    };
    self.vb.ckp().create_snapshot(start, end, typ);
    g.snap = Some(Snap {
      range: Range::new(start, end),
      flags,
      acked: false,
    });
    Ok(())
  }

  /// Apply one replicated entry
  /// 应用一条复制条目
  pub fn item(&self, item: Item) -> Result<()> {
    let mut g = self.inner.lock();
    self.reading(&g)?;
    let seqno = item.seqno;
    let range = g.snap.as_ref().map(|s| s.range);
    if !range.is_some_and(|r| r.contains(seqno)) || seqno <= g.last_seqno {
      return Err(Error::Erange {
        vbid: self.vbid,
        msg: "seqno outside snapshot",
      });
    }
    self.vb.apply_replica(item)?;
    g.last_seqno = seqno;
    g.items += 1;
    let ack = match g.snap.as_mut() {
      Some(s) if s.flags & marker::ACK != 0 && !s.acked && seqno >= s.range.end => {
        s.acked = true;
        true
      }
      _ => false,
    };
    if ack {
      g.ready.push_back(Resp::Ack(Ack::Marker {
        opaque: self.opaque,
        vbid: self.vbid,
      }));
    }
    Ok(())
  }

  /// Takeover state change sent by the producer
  /// 生产者发来的接管状态变更
  pub fn set_vb_state(&self, state: VbState) -> Result<()> {
    self.reading(&self.inner.lock())?;
    self.vb.set_state(state);
    Ok(())
  }

  pub fn set_dead(&self, reason: EndReason) -> bool {
    let mut g = self.inner.lock();
    if g.state == PassiveState::Dead {
      return false;
    }
    g.state = PassiveState::Dead;
    info!(
      "{} passive stream end: {}, last {}",
      self.vbid,
      reason.as_str(),
      g.last_seqno
    );
    true
  }

  pub fn next(&self) -> Option<Resp> {
    self.inner.lock().ready.pop_front()
  }
}
