//! DCP consumer: passive streams fed by a remote producer
//! DCP 消费者：由远端生产者驱动的被动流

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
};

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use vb_base::{Item, Name, VbState, Vbid};
use vb_bucket::Bucket;

use crate::{
  Ack, EndReason, Error, ParsedConf, PassiveStream, ReadyQueue, Resp, Result,
};

pub struct Consumer {
  name: Name,
  bucket: Arc<Bucket>,
  conf: ParsedConf,
  streams: RwLock<HashMap<Vbid, Arc<PassiveStream>>>,
  ready: Mutex<ReadyQueue>,
  /// Replies to the producer, sent before stream traffic
  /// 发往生产者的回复，先于流消息发送
  out: Mutex<VecDeque<Resp>>,
  /// Bytes processed since the last buffer ack
  /// 上次缓冲确认后已处理的字节
  freed: Mutex<usize>,
  opaque: AtomicU32,
}

impl Consumer {
  pub fn new(name: impl Into<Name>, bucket: Arc<Bucket>, conf: ParsedConf) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      bucket,
      conf,
      streams: RwLock::new(HashMap::new()),
      ready: Mutex::new(ReadyQueue::default()),
      out: Mutex::new(VecDeque::new()),
      freed: Mutex::new(0),
      opaque: AtomicU32::new(0),
    })
  }

  #[inline]
  pub fn name(&self) -> &Name {
    &self.name
  }

  pub fn stream(&self, vbid: Vbid) -> Option<Arc<PassiveStream>> {
    self.streams.read().get(&vbid).cloned()
  }

  pub fn num_streams(&self) -> usize {
    self.streams.read().values().filter(|s| s.is_live()).count()
  }

  fn open(&self, vbid: Vbid, flags: u32) -> Result<u32> {
    let vb = self.bucket.get(vbid)?;
    if matches!(vb.state(), VbState::Active | VbState::Dead) {
      return Err(Error::NotMyVbucket(vbid));
    }
    let opaque = self.opaque.fetch_add(1, Ordering::Relaxed) + 1;
    let s = Arc::new(PassiveStream::new(vb, opaque, flags));
    {
      let mut m = self.streams.write();
      if m.get(&vbid).is_some_and(|s| s.is_live()) {
        return Err(Error::KeyExists(vbid));
      }
      m.insert(vbid, s);
    }
    self.ready.lock().push(vbid);
    Ok(opaque)
  }

  /// Open a passive stream, its request is the next message for that vbucket
  /// 打开被动流，其请求即该 vbucket 的下一条消息
  pub fn add_stream(&self, vbid: Vbid, flags: u32) -> Result<u32> {
    let opaque = self.open(vbid, flags)?;
    info!("{} {vbid} add stream, opaque {opaque}", self.name);
    Ok(opaque)
  }

  /// Producer answered a stream request; a rollback truncates and asks again
  /// 生产者应答流请求；回滚时截断并重新请求
  pub fn stream_response(&self, vbid: Vbid, res: Result<()>) -> Result<()> {
    let Some(s) = self.stream(vbid) else {
      return Err(Error::KeyNotFound(vbid));
    };
    match res {
      Ok(()) => {
        s.accept();
        Ok(())
      }
      Err(Error::Rollback(seqno)) => {
        s.set_dead(EndReason::Rollback);
        let flags = s.flags();
        let reached = self.bucket.rollback(vbid, seqno)?;
        info!("{} {vbid} rolled back to {reached}, re-requesting", self.name);
        self.open(vbid, flags).map(|_| ())
      }
      Err(e) => {
        warn!("{} {vbid} stream request failed: {e}", self.name);
        s.set_dead(EndReason::Closed);
        Err(e)
      }
    }
  }

  fn passive(&self, vbid: Vbid) -> Result<Arc<PassiveStream>> {
    self
      .stream(vbid)
      .filter(|s| s.is_live())
      .ok_or(Error::KeyNotFound(vbid))
  }

  fn reply(&self, resp: Resp) {
    self.out.lock().push_back(resp);
  }

  /// Handle one message from the producer
  /// 处理生产者发来的一条消息
  pub fn message(&self, resp: Resp) -> Result<()> {
    let size = resp.size();
    match resp {
      Resp::Marker {
        vbid,
        start,
        end,
        flags,
        ..
      } => self.passive(vbid)?.marker(start, end, flags)?,
      Resp::Mutation { item, .. } | Resp::Deletion { item, .. } | Resp::SystemEvent { item, .. } => {
        let s = self.passive(item.vbid)?;
        s.item(Item::clone(&item))?;
        if let Some(r) = s.next() {
          self.reply(r);
        }
      }
      Resp::SetVbState {
        opaque,
        vbid,
        state,
      } => {
        self.passive(vbid)?.set_vb_state(state)?;
        self.reply(Resp::Ack(Ack::SetVbState { opaque, vbid }));
      }
      Resp::StreamEnd { vbid, reason, .. } => {
        if let Some(s) = self.streams.write().remove(&vbid) {
          s.set_dead(reason);
        }
        self.ready.lock().remove(vbid);
      }
      Resp::Noop { opaque } => {
        self.reply(Resp::Ack(Ack::Noop { opaque }));
        return Ok(());
      }
      other => {
        return Err(Error::Einval(format!(
          "{} unexpected {}",
          self.name,
          other.as_str()
        )));
      }
    }
    self.freed(size);
    Ok(())
  }

  fn freed(&self, size: usize) {
    let mut f = self.freed.lock();
    *f += size;
    if self.conf.buffer_size > 0 && *f >= self.conf.buffer_size / 2 {
      let bytes = std::mem::take(&mut *f);
      drop(f);
      self.reply(Resp::BufferAck { opaque: 0, bytes });
    }
  }

  /// Next message for the producer
  /// 发往生产者的下一条消息
  pub fn step(&self) -> Option<Resp> {
    if let Some(r) = self.out.lock().pop_front() {
      return Some(r);
    }
    loop {
      let vbid = self.ready.lock().pop()?;
      let Some(s) = self.stream(vbid) else {
        continue;
      };
      if let Some(r) = s.next() {
        self.ready.lock().push(vbid);
        return Some(r);
      }
    }
  }

  pub fn close_stream(&self, vbid: Vbid) -> Result<()> {
    let s = self
      .streams
      .write()
      .remove(&vbid)
      .ok_or(Error::KeyNotFound(vbid))?;
    s.set_dead(EndReason::Closed);
    self.ready.lock().remove(vbid);
    Ok(())
  }
}
