//! DCP producer: one connection's streams, flow control and keepalive
//! DCP 生产者：单连接的流、流控与保活

use std::{
  collections::HashMap,
  sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use event_listener::{Event, EventListener};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use vb_base::{Name, VbState, Vbid};
use vb_bucket::{Bucket, FailoverEntry};

use crate::{
  Ack, ActiveStream, BackfillMgr, BackfillStats, BufferLog, EndReason, Error, Filter,
  NotifierStream, ParsedConf, Progress, ReadyQueue, Resp, Result, SendErr, Sink, Stream,
  StreamReady, StreamReq, flags,
};

/// Seconds source, injectable for tests
/// 秒级时钟，测试可注入
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Wall clock in seconds
/// 秒级墙钟
pub fn coarse_clock() -> Clock {
  Arc::new(|| coarsetime::Clock::now_since_epoch().as_secs())
}

/// Outcome of one `step`
/// 一次 `step` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Sent,
  /// Sink could not take the message, it is kept for the next step
  /// 接收端暂时无法接收，消息保留到下次
  Retry,
  /// Flow control window full
  /// 流控窗口已满
  Paused,
  /// Nothing ready, wait on `listen()`
  /// 无数据，等待 `listen()`
  Idle,
}

#[derive(Debug, Default)]
struct Noop {
  enabled: bool,
  interval: u64,
  pending: bool,
  opaque: u32,
  sent_at: u64,
  last_recv: u64,
}

#[derive(Debug, Default)]
struct Ctl {
  send_end_on_close: bool,
  cursor_dropping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerStats {
  pub name: Name,
  pub streams: usize,
  pub live_streams: usize,
  pub ready: usize,
  pub items_sent: u64,
  pub bytes_sent: u64,
  pub outstanding: usize,
  pub buffer_max: usize,
  pub paused: bool,
  pub noop_pending: bool,
  pub backfill: BackfillStats,
}

pub struct Producer {
  name: Name,
  me: Weak<Producer>,
  bucket: Arc<Bucket>,
  conf: ParsedConf,
  clock: Clock,
  /// Guards find, insert and erase together
  /// 同时保护查找、插入与删除
  streams: RwLock<HashMap<Vbid, Stream>>,
  ready: Mutex<ReadyQueue>,
  log: Mutex<BufferLog>,
  noop: Mutex<Noop>,
  ctl: Mutex<Ctl>,
  reject: Mutex<Option<Resp>>,
  backfills: Arc<BackfillMgr>,
  event: Event,
  disconnected: AtomicBool,
  items_sent: AtomicU64,
  bytes_sent: AtomicU64,
}

fn parse_bool(key: &str, val: &str) -> Result<bool> {
  match val {
    "true" => Ok(true),
    "false" => Ok(false),
    _ => Err(Error::Einval(format!("{key}: {val}"))),
  }
}

fn parse_num<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
  val
    .parse()
    .map_err(|_| Error::Einval(format!("{key}: {val}")))
}

impl Producer {
  pub fn new(name: impl Into<Name>, bucket: Arc<Bucket>, conf: ParsedConf, clock: Clock) -> Arc<Self> {
    let name = name.into();
    let now = clock();
    Arc::new_cyclic(|me| Self {
      backfills: Arc::new(BackfillMgr::new(name.clone(), &conf)),
      me: me.clone(),
      bucket,
      log: Mutex::new(BufferLog::new(conf.buffer_size)),
      noop: Mutex::new(Noop {
        interval: conf.noop_interval,
        sent_at: now,
        last_recv: now,
        ..Default::default()
      }),
      ctl: Mutex::new(Ctl::default()),
      streams: RwLock::new(HashMap::new()),
      ready: Mutex::new(ReadyQueue::default()),
      reject: Mutex::new(None),
      event: Event::new(),
      disconnected: AtomicBool::new(false),
      items_sent: AtomicU64::new(0),
      bytes_sent: AtomicU64::new(0),
      name,
      conf,
      clock,
    })
  }

  #[inline]
  pub fn name(&self) -> &Name {
    &self.name
  }

  #[inline]
  pub fn conf(&self) -> &ParsedConf {
    &self.conf
  }

  /// Fires when a stream turns ready or flow control reopens
  /// 流就绪或流控重新打开时触发
  #[inline]
  pub fn listen(&self) -> EventListener {
    self.event.listen()
  }

  #[inline]
  pub fn backfills(&self) -> &Arc<BackfillMgr> {
    &self.backfills
  }

  /// Drive backfills until idle or blocked
  /// 驱动回填直到空闲或阻塞
  #[inline]
  pub fn run_backfills(&self) -> Progress {
    self.backfills.run_all()
  }

  #[inline]
  pub fn is_disconnected(&self) -> bool {
    self.disconnected.load(Ordering::Acquire)
  }

  pub fn stream(&self, vbid: Vbid) -> Option<Stream> {
    self.streams.read().get(&vbid).cloned()
  }

  fn live(&self) -> Result<()> {
    if self.is_disconnected() {
      return Err(Error::Disconnect(format!("{} disconnected", self.name)));
    }
    Ok(())
  }

  /// Any message from the peer resets the idle timer
  /// 对端任何消息都会重置空闲计时
  fn touch(&self) {
    self.noop.lock().last_recv = (self.clock)();
  }

  /// Runtime control message
  /// 运行时控制消息
  pub fn control(&self, key: &str, val: &str) -> Result<()> {
    self.live()?;
    self.touch();
    match key {
      "connection_buffer_size" => {
        self.log.lock().set_max(parse_num(key, val)?);
        self.event.notify(usize::MAX);
      }
      "enable_noop" => {
        let on = parse_bool(key, val)?;
        let now = (self.clock)();
        let mut n = self.noop.lock();
        n.enabled = on;
        n.pending = false;
        n.sent_at = now;
        n.last_recv = now;
      }
      "set_noop_interval" => {
        let v: u64 = parse_num(key, val)?;
        if v == 0 {
          return Err(Error::Einval(format!("{key}: {val}")));
        }
        self.noop.lock().interval = v;
      }
      "supports_cursor_dropping" => self.ctl.lock().cursor_dropping = parse_bool(key, val)?,
      "send_stream_end_on_client_close_stream" => {
        self.ctl.lock().send_end_on_close = parse_bool(key, val)?
      }
      _ => {
        warn!("{} unknown control {key}={val}", self.name);
        return Err(Error::Einval(format!("unknown control {key}")));
      }
    }
    debug!("{} control {key}={val}", self.name);
    Ok(())
  }

  fn insert(&self, vbid: Vbid, stream: Stream) -> Result<()> {
    let mut m = self.streams.write();
    if m.get(&vbid).is_some_and(Stream::is_live) {
      return Err(Error::KeyExists(vbid));
    }
    m.insert(vbid, stream);
    Ok(())
  }

  /// Validate, check for rollback, then create and activate a stream.
  /// Returns the vbucket's failover log.
  /// 校验并检查回滚，然后创建并激活流，返回故障转移日志
  pub fn stream_request(&self, req: StreamReq, filter: Option<&str>) -> Result<Vec<FailoverEntry>> {
    self.live()?;
    self.touch();
    let mut req = req;
    let vbid = req.vbid;
    let vb = self
      .bucket
      .get(vbid)
      .map_err(|_| Error::NotMyVbucket(vbid))?;
    let state = vb.state();
    let need_active = req.has(flags::ACTIVE_VB_ONLY) || req.has(flags::TAKEOVER);
    if state == VbState::Dead || (need_active && state != VbState::Active) {
      return Err(Error::NotMyVbucket(vbid));
    }

    let high = vb.high_seqno();
    if req.has(flags::LATEST) {
      req.end = high;
    }
    if req.start > req.end {
      warn!("{} {vbid} start {} after end {}", self.name, req.start, req.end);
      return Err(Error::Erange {
        vbid,
        msg: "start after end",
      });
    }
    if req.snap_start > req.start || req.start > req.snap_end {
      warn!(
        "{} {vbid} snapshot [{}, {}] does not bracket {}",
        self.name, req.snap_start, req.snap_end, req.start
      );
      return Err(Error::Erange {
        vbid,
        msg: "snapshot does not bracket start",
      });
    }

    if self.conf.notifier {
      let s = Arc::new(NotifierStream::new(vbid, req.opaque, req.start, high));
      self.insert(vbid, Stream::Notifier(s))?;
      self.stream_ready(vbid);
      return Ok(vb.failover_entries());
    }

    let purge = self.bucket.disk().purge_seqno(vbid);
    if let Some(to) = vb.needs_rollback(req.start, req.uuid, req.snap_start, req.snap_end, purge) {
      info!(
        "{} {vbid} rollback to {to}, asked {} uuid {:x}",
        self.name, req.start, req.uuid
      );
      return Err(Error::Rollback(to));
    }
    if req.start > high {
      info!("{} {vbid} start {} past high {high}", self.name, req.start);
      return Err(Error::Rollback(high));
    }

    let filter = Filter::new(filter, &*vb.manifest()?)?;
    let cb: Weak<dyn StreamReady> = self.me.clone();
    let stream = ActiveStream::new(
      self.name.clone(),
      req,
      Arc::clone(&vb),
      Arc::clone(self.bucket.disk()),
      Arc::clone(&self.backfills),
      cb,
      filter,
      self.conf.item_limit,
    );
    self.insert(vbid, Stream::Active(Arc::clone(&stream)))?;
    if let Err(e) = stream.activate() {
      self.streams.write().remove(&vbid);
      stream.set_dead(EndReason::Disconnected, false);
      return Err(e);
    }
    info!(
      "{} {vbid} stream {:?} opaque {} [{}, {}]",
      self.name,
      stream.state(),
      req.opaque,
      req.start,
      req.end
    );
    Ok(vb.failover_entries())
  }

  /// Client side close
  /// 客户端关闭流
  pub fn close_stream(&self, vbid: Vbid) -> Result<()> {
    self.live()?;
    self.touch();
    let send = self.ctl.lock().send_end_on_close;
    let stream = if send {
      self.stream(vbid)
    } else {
      self.streams.write().remove(&vbid)
    };
    let Some(s) = stream.filter(Stream::is_live) else {
      return Err(Error::KeyNotFound(vbid));
    };
    if s.set_dead(EndReason::Closed, send) {
      self.stream_ready(vbid);
    }
    Ok(())
  }

  /// Write at most one message
  /// 至多写出一条消息
  pub fn step<S: Sink + ?Sized>(&self, sink: &mut S) -> Result<Step> {
    self.live()?;
    if let Some(noop) = self.maybe_noop()? {
      return self.send(sink, noop);
    }
    let stashed = self.reject.lock().take();
    let resp = match stashed {
      Some(r) => r,
      None => {
        if self.log.lock().is_full() {
          return Ok(Step::Paused);
        }
        match self.next_item() {
          Some(r) => r,
          None => return Ok(Step::Idle),
        }
      }
    };
    self.send(sink, resp)
  }

  fn send<S: Sink + ?Sized>(&self, sink: &mut S, resp: Resp) -> Result<Step> {
    match sink.send(&resp) {
      Ok(()) => {
        let size = resp.size();
        if !matches!(resp, Resp::Noop { .. }) {
          self.log.lock().insert(size);
        }
        if resp.item().is_some() {
          self.items_sent.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        Ok(Step::Sent)
      }
      Err(SendErr::NoMem) => {
        debug!("{} {} deferred", self.name, resp.as_str());
        *self.reject.lock() = Some(resp);
        Ok(Step::Retry)
      }
      Err(SendErr::Closed) => {
        self.disconnect();
        Err(Error::Disconnect(format!("{} sink closed", self.name)))
      }
    }
  }

  /// Idle check and due noop
  /// 空闲检查与到期 noop
  fn maybe_noop(&self) -> Result<Option<Resp>> {
    let now = (self.clock)();
    let mut n = self.noop.lock();
    if !n.enabled {
      return Ok(None);
    }
    let idle = now.saturating_sub(n.last_recv);
    if self.conf.idle_timeout > 0 && idle > self.conf.idle_timeout {
      drop(n);
      warn!("{} idle {idle}s, disconnecting", self.name);
      self.disconnect();
      return Err(Error::Disconnect(format!("{} idle timeout", self.name)));
    }
    if n.pending || now.saturating_sub(n.sent_at) < n.interval {
      return Ok(None);
    }
    n.pending = true;
    n.sent_at = now;
    n.opaque = n.opaque.wrapping_add(1);
    Ok(Some(Resp::Noop { opaque: n.opaque }))
  }

  /// Round robin over ready vbuckets
  /// 轮询就绪的 vbucket
  fn next_item(&self) -> Option<Resp> {
    loop {
      let vbid = self.ready.lock().pop()?;
      let Some(stream) = self.stream(vbid) else {
        continue;
      };
      if let Some(r) = stream.next() {
        self.ready.lock().push(vbid);
        return Some(r);
      }
    }
  }

  pub fn buffer_acknowledgement(&self, bytes: usize) -> Result<()> {
    self.live()?;
    self.touch();
    if self.log.lock().ack(bytes) {
      debug!("{} unpaused by ack of {bytes}", self.name);
      self.event.notify(usize::MAX);
    }
    Ok(())
  }

  /// Peer reply to a message this producer sent
  /// 对端对本生产者消息的回复
  pub fn handle_response(&self, ack: Ack) -> Result<()> {
    self.live()?;
    self.touch();
    match ack {
      Ack::Noop { opaque } => {
        let mut n = self.noop.lock();
        if n.pending && n.opaque == opaque {
          n.pending = false;
        }
        Ok(())
      }
      Ack::SetVbState { vbid, .. } => {
        let Some(s) = self.stream(vbid).and_then(|s| s.as_active().cloned()) else {
          warn!("{} {vbid} set_vbucket_state ack without stream", self.name);
          return Err(Error::Disconnect(format!("{vbid} unexpected ack")));
        };
        s.set_vb_state_ack()
      }
      Ack::Marker { .. } => Ok(()),
    }
  }

  pub fn vbucket_state_changed(&self, vbid: Vbid, state: VbState) {
    let Some(s) = self.stream(vbid) else {
      return;
    };
    let queued = match &s {
      Stream::Active(a) => {
        if state == VbState::Dead && a.is_takeover_in_flight() {
          return;
        }
        a.set_dead(EndReason::StateChanged, true)
      }
      Stream::Notifier(n) => n.set_dead(EndReason::StateChanged, true),
      Stream::Passive(_) => false,
    };
    if queued {
      info!("{} {vbid} stream closed, vbucket {}", self.name, state.as_str());
      self.stream_ready(vbid);
    }
  }

  pub fn notify_seqno_available(&self, vbid: Vbid, seqno: u64) {
    let Some(s) = self.stream(vbid) else {
      return;
    };
    let ready = match &s {
      Stream::Active(a) => a.is_live(),
      Stream::Notifier(n) => n.notify_seqno(seqno),
      Stream::Passive(_) => false,
    };
    if ready {
      self.stream_ready(vbid);
    }
  }

  /// Drop the stream's cursor if the peer allowed it
  /// 对端允许时丢弃流的游标
  pub fn handle_slow_stream(&self, vbid: Vbid) -> bool {
    if !self.ctl.lock().cursor_dropping {
      return false;
    }
    let dropped = self
      .stream(vbid)
      .and_then(|s| s.as_active().cloned())
      .is_some_and(|a| a.handle_slow_stream());
    if dropped {
      self.stream_ready(vbid);
    }
    dropped
  }

  pub fn close_all_streams(&self) {
    let streams: Vec<Stream> = self.streams.write().drain().map(|(_, s)| s).collect();
    for s in &streams {
      s.set_dead(EndReason::Disconnected, false);
    }
    *self.ready.lock() = ReadyQueue::default();
    if !streams.is_empty() {
      info!("{} closed {} streams", self.name, streams.len());
    }
  }

  pub fn disconnect(&self) {
    if !self.disconnected.swap(true, Ordering::AcqRel) {
      self.close_all_streams();
      self.event.notify(usize::MAX);
    }
  }

  pub fn stats(&self) -> ProducerStats {
    let (streams, live_streams) = {
      let m = self.streams.read();
      (m.len(), m.values().filter(|s| s.is_live()).count())
    };
    let (outstanding, buffer_max, paused) = {
      let l = self.log.lock();
      (l.outstanding(), l.max(), l.is_full())
    };
    ProducerStats {
      name: self.name.clone(),
      streams,
      live_streams,
      ready: self.ready.lock().len(),
      items_sent: self.items_sent.load(Ordering::Relaxed),
      bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
      outstanding,
      buffer_max,
      paused,
      noop_pending: self.noop.lock().pending,
      backfill: self.backfills.stats(),
    }
  }
}

impl StreamReady for Producer {
  fn stream_ready(&self, vbid: Vbid) {
    if self.ready.lock().push(vbid) {
      self.event.notify(usize::MAX);
    }
  }
}

impl Drop for Producer {
  fn drop(&mut self) {
    let streams = std::mem::take(&mut *self.streams.write());
    for s in streams.values() {
      s.set_dead(EndReason::Disconnected, false);
    }
  }
}
