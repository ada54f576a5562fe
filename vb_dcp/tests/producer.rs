use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use aok::{OK, Void};
use vb_base::{Cid, VbState, Vbid};
use vb_bucket::{Bucket, Disk, MemDisk, MemStore};
use vb_dcp::{
  Ack, Clock, Conf, ConnMap, EndReason, Error, ParsedConf, Producer, Resp, Step, StreamReq,
  flags, marker,
};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

const VB: Vbid = Vbid(0);

fn bucket() -> Arc<Bucket> {
  Arc::new(Bucket::new(
    vb_bucket::ParsedConf::default(),
    Arc::new(MemStore::new()),
    Arc::new(MemDisk::new()) as Arc<dyn Disk>,
  ))
}

fn fake_clock(t: &Arc<AtomicU64>) -> Clock {
  let t = Arc::clone(t);
  Arc::new(move || t.load(Ordering::Relaxed))
}

fn producer(conns: &ConnMap, conf: &[Conf]) -> Arc<Producer> {
  let t = Arc::new(AtomicU64::new(1000));
  conns.new_producer("p", ParsedConf::new(conf), fake_clock(&t))
}

fn req(start: u64, end: u64) -> StreamReq {
  StreamReq {
    opaque: 7,
    vbid: VB,
    start,
    end,
    snap_start: start,
    snap_end: start,
    ..Default::default()
  }
}

fn drain(p: &Producer) -> vb_dcp::Result<Vec<Resp>> {
  let mut out = Vec::new();
  while p.step(&mut out)? == Step::Sent {}
  Ok(out)
}

fn seqnos(out: &[Resp]) -> Vec<u64> {
  out.iter().filter_map(Resp::seqno).collect()
}

/// One snapshot per checkpoint, later writes arrive without the checkpoint flag
/// 每个检查点一个快照，后续写入不带检查点标志
#[test]
fn in_memory_markers() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  let log = p.stream_request(req(0, u64::MAX), None)?;
  assert_eq!(log.len(), 1);

  let out = drain(&p)?;
  assert_eq!(
    out[0],
    Resp::Marker {
      opaque: 7,
      vbid: VB,
      start: 0,
      end: 3,
      flags: marker::MEMORY | marker::CHK,
    }
  );
  assert_eq!(seqnos(&out), vec![1, 2, 3]);

  vb.set(Cid::DEFAULT, "d", "v")?;
  let out = drain(&p)?;
  assert_eq!(
    out[0],
    Resp::Marker {
      opaque: 7,
      vbid: VB,
      start: 4,
      end: 4,
      flags: marker::MEMORY,
    }
  );
  assert_eq!(seqnos(&out), vec![4]);
  assert_eq!(p.stats().items_sent, 4);
  OK
}

#[test]
fn stream_ends_at_end_seqno() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c", "d"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0, 2), None)?;
  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![1, 2]);
  assert!(matches!(out[0], Resp::Marker { end: 2, .. }));
  assert!(matches!(
    out.last(),
    Some(Resp::StreamEnd {
      reason: EndReason::Ok,
      ..
    })
  ));
  assert!(p.stream(VB).is_some_and(|s| !s.is_live()));
  OK
}

/// The end seqno was deduplicated into a later one, the stream still ends
/// 结束序号已被去重到后续序号，流仍然结束
#[test]
fn stream_ends_when_end_seqno_deduplicated() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c", "c", "d"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  assert_eq!(vb.high_seqno(), 5);
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0, 3), None)?;
  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![1, 2]);
  assert!(matches!(out[0], Resp::Marker { start: 0, end: 2, .. }));
  assert!(matches!(
    out.last(),
    Some(Resp::StreamEnd {
      reason: EndReason::Ok,
      ..
    })
  ));
  assert!(p.stream(VB).is_some_and(|s| !s.is_live()));
  assert_eq!(vb.ckp().num_cursors(), 1);
  OK
}

#[test]
fn latest_flag_pins_end() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  vb.set(Cid::DEFAULT, "b", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(
    StreamReq {
      flags: flags::LATEST,
      ..req(0, 0)
    },
    None,
  )?;
  vb.set(Cid::DEFAULT, "c", "v")?;
  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![1, 2]);
  assert!(matches!(out.last(), Some(Resp::StreamEnd { .. })));
  OK
}

#[test]
fn stream_request_rejects() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  b.create_vb(Vbid(1), VbState::Replica)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);

  let missing = StreamReq {
    vbid: Vbid(5),
    ..req(0, 10)
  };
  assert!(matches!(p.stream_request(missing, None), Err(Error::NotMyVbucket(_))));
  assert!(matches!(p.stream_request(req(5, 2), None), Err(Error::Erange { .. })));
  let outside = StreamReq {
    snap_start: 2,
    snap_end: 3,
    ..req(1, 10)
  };
  assert!(matches!(p.stream_request(outside, None), Err(Error::Erange { .. })));
  let replica = StreamReq {
    vbid: Vbid(1),
    flags: flags::ACTIVE_VB_ONLY,
    ..req(0, 10)
  };
  assert!(matches!(p.stream_request(replica, None), Err(Error::NotMyVbucket(_))));

  p.stream_request(req(0, u64::MAX), None)?;
  assert!(matches!(p.stream_request(req(0, u64::MAX), None), Err(Error::KeyExists(_))));
  OK
}

/// A stream request is answered with a rollback point instead of a stream
/// 流请求以回滚点而非流作答
#[test]
fn rollback_instead_of_stream() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  let uuid = vb.failover_latest().uuid;

  let unknown = StreamReq {
    uuid: uuid ^ 1,
    ..req(2, u64::MAX)
  };
  assert!(matches!(p.stream_request(unknown, None), Err(Error::Rollback(0))));

  let ahead = StreamReq {
    uuid,
    ..req(9, u64::MAX)
  };
  assert!(matches!(p.stream_request(ahead, None), Err(Error::Rollback(3))));
  assert!(p.stream(VB).is_none());

  let ok = StreamReq {
    uuid,
    ..req(2, u64::MAX)
  };
  p.stream_request(ok, None)?;
  assert_eq!(seqnos(&drain(&p)?), vec![3]);
  OK
}

#[test]
fn buffer_log_pauses_until_acked() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  for i in 1..=5 {
    vb.set(Cid::DEFAULT, format!("k{i}"), "0123456789")?;
  }
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.control("connection_buffer_size", "150")?;
  p.stream_request(req(0, u64::MAX), None)?;

  let mut out = Vec::new();
  // marker 44, mutations 67 each
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Paused);
  let s = p.stats();
  assert!(s.paused);
  assert_eq!(s.outstanding, 44 + 67 * 2);

  p.buffer_acknowledgement(100)?;
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Paused);
  p.buffer_acknowledgement(1000)?;
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(p.step(&mut out)?, Step::Idle);
  assert_eq!(seqnos(&out), vec![1, 2, 3, 4, 5]);
  OK
}

struct Flaky {
  out: Vec<Resp>,
  refuse: usize,
}

impl vb_dcp::Sink for Flaky {
  fn send(&mut self, resp: &Resp) -> Result<(), vb_dcp::SendErr> {
    if self.refuse > 0 {
      self.refuse -= 1;
      return Err(vb_dcp::SendErr::NoMem);
    }
    self.out.push(resp.clone());
    Ok(())
  }
}

/// A refused message is the first one sent next time
/// 被拒消息在下次最先发送
#[test]
fn refused_message_retried() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  vb.set(Cid::DEFAULT, "b", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0, u64::MAX), None)?;

  let mut sink = Flaky {
    out: Vec::new(),
    refuse: 0,
  };
  assert_eq!(p.step(&mut sink)?, Step::Sent);
  sink.refuse = 2;
  assert_eq!(p.step(&mut sink)?, Step::Retry);
  assert_eq!(p.step(&mut sink)?, Step::Retry);
  while p.step(&mut sink)? == Step::Sent {}
  assert_eq!(seqnos(&sink.out), vec![1, 2]);
  OK
}

#[test]
fn noop_and_idle_timeout() -> Void {
  let b = bucket();
  b.create_vb(VB, VbState::Active)?;
  let conns = ConnMap::new(Arc::clone(&b));
  let t = Arc::new(AtomicU64::new(1000));
  let p = conns.new_producer(
    "p",
    ParsedConf::new(&[Conf::NoopInterval(20), Conf::IdleTimeout(60)]),
    fake_clock(&t),
  );
  p.control("enable_noop", "true")?;

  let mut out = Vec::new();
  assert_eq!(p.step(&mut out)?, Step::Idle);
  t.store(1020, Ordering::Relaxed);
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(out, vec![Resp::Noop { opaque: 1 }]);
  assert_eq!(p.step(&mut out)?, Step::Idle);
  assert!(p.stats().noop_pending);

  p.handle_response(Ack::Noop { opaque: 1 })?;
  assert!(!p.stats().noop_pending);
  t.store(1040, Ordering::Relaxed);
  assert_eq!(p.step(&mut out)?, Step::Sent);
  assert_eq!(out.last(), Some(&Resp::Noop { opaque: 2 }));

  t.store(1081, Ordering::Relaxed);
  assert!(matches!(p.step(&mut out), Err(Error::Disconnect(_))));
  assert!(p.is_disconnected());
  assert!(matches!(p.stream_request(req(0, 1), None), Err(Error::Disconnect(_))));
  OK
}

#[test]
fn control_keys() -> Void {
  let b = bucket();
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.control("connection_buffer_size", "4096")?;
  assert_eq!(p.stats().buffer_max, 4096);
  p.control("set_noop_interval", "5")?;
  p.control("supports_cursor_dropping", "true")?;
  assert!(matches!(p.control("enable_noop", "yes"), Err(Error::Einval(_))));
  assert!(matches!(p.control("set_noop_interval", "0"), Err(Error::Einval(_))));
  assert!(matches!(p.control("no_such_key", "1"), Err(Error::Einval(_))));
  OK
}

#[test]
fn close_stream() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);

  p.stream_request(req(0, u64::MAX), None)?;
  p.close_stream(VB)?;
  assert!(p.stream(VB).is_none());
  assert!(drain(&p)?.is_empty());
  assert!(matches!(p.close_stream(VB), Err(Error::KeyNotFound(_))));

  p.control("send_stream_end_on_client_close_stream", "true")?;
  p.stream_request(req(0, u64::MAX), None)?;
  p.close_stream(VB)?;
  let out = drain(&p)?;
  assert_eq!(
    out,
    vec![Resp::StreamEnd {
      opaque: 7,
      vbid: VB,
      reason: EndReason::Closed,
    }]
  );
  assert_eq!(vb.ckp().num_cursors(), 1);
  OK
}

#[test]
fn state_change_ends_stream() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0, u64::MAX), None)?;
  assert_eq!(seqnos(&drain(&p)?), vec![1]);

  b.set_vb_state(VB, VbState::Replica)?;
  let out = drain(&p)?;
  assert!(matches!(
    out.as_slice(),
    [Resp::StreamEnd {
      reason: EndReason::StateChanged,
      ..
    }]
  ));
  OK
}

#[test]
fn notifier_stream() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  vb.set(Cid::DEFAULT, "b", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[Conf::Notifier(true)]);

  p.stream_request(req(2, u64::MAX), None)?;
  assert!(drain(&p)?.is_empty());
  vb.set(Cid::DEFAULT, "c", "v")?;
  let out = drain(&p)?;
  assert!(matches!(
    out.as_slice(),
    [Resp::StreamEnd {
      reason: EndReason::Ok,
      ..
    }]
  ));

  p.stream_request(req(1, u64::MAX), None)?;
  assert_eq!(drain(&p)?.len(), 1);
  OK
}

/// Pending announced first, vbucket dies on its ack, then active announced
/// 先宣布 pending，确认后 vbucket 失效，再宣布 active
#[test]
fn takeover() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  vb.set(Cid::DEFAULT, "b", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(
    StreamReq {
      flags: flags::TAKEOVER,
      ..req(0, u64::MAX)
    },
    None,
  )?;

  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![1, 2]);
  assert!(matches!(
    out.last(),
    Some(Resp::SetVbState {
      state: VbState::Pending,
      ..
    })
  ));
  assert!(drain(&p)?.is_empty());
  assert!(matches!(
    p.handle_response(Ack::Noop { opaque: 0 }),
    Ok(())
  ));

  p.handle_response(Ack::SetVbState { opaque: 7, vbid: VB })?;
  assert_eq!(vb.state(), VbState::Dead);
  let out = drain(&p)?;
  assert!(matches!(
    out.as_slice(),
    [Resp::SetVbState {
      state: VbState::Active,
      ..
    }]
  ));

  p.handle_response(Ack::SetVbState { opaque: 7, vbid: VB })?;
  let out = drain(&p)?;
  assert!(matches!(
    out.as_slice(),
    [Resp::StreamEnd {
      reason: EndReason::Ok,
      ..
    }]
  ));
  assert!(matches!(
    p.handle_response(Ack::SetVbState { opaque: 7, vbid: VB }),
    Err(Error::Disconnect(_))
  ));
  OK
}

#[test]
fn collection_filter() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  let fruit = Cid(8);
  vb.create_collection(fruit, "fruit")?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  vb.set(fruit, "apple", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);

  assert!(matches!(
    p.stream_request(req(0, u64::MAX), Some(r#"{"collections":["9"]}"#)),
    Err(Error::UnknownCollection(_))
  ));
  assert!(matches!(
    p.stream_request(req(0, u64::MAX), Some(r#"{"collections":[]}"#)),
    Err(Error::Einval(_))
  ));

  p.stream_request(req(0, u64::MAX), Some(r#"{"collections":["8"]}"#))?;
  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![1, 3]);
  assert!(out.iter().filter_map(Resp::item).all(|i| i.cid == fruit));

  vb.drop_collection(fruit)?;
  let out = drain(&p)?;
  assert_eq!(seqnos(&out), vec![4]);
  assert!(matches!(
    out.last(),
    Some(Resp::StreamEnd {
      reason: EndReason::FilterEmpty,
      ..
    })
  ));
  OK
}

#[test]
fn disconnect_removes_cursors() -> Void {
  let b = bucket();
  let vb = b.create_vb(VB, VbState::Active)?;
  vb.set(Cid::DEFAULT, "a", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0, u64::MAX), None)?;
  assert_eq!(vb.ckp().num_cursors(), 2);

  let again = producer(&conns, &[]);
  assert!(p.is_disconnected());
  assert_eq!(vb.ckp().num_cursors(), 1);
  again.stream_request(req(0, u64::MAX), None)?;
  assert!(conns.disconnect("p"));
  assert_eq!(vb.ckp().num_cursors(), 1);
  assert_eq!(conns.num_producers(), 0);
  OK
}
