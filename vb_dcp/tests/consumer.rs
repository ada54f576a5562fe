use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use aok::{OK, Void};
use bytes::Bytes;
use vb_base::{Cid, Item, VbState, Vbid};
use vb_bucket::{Bucket, Disk, MemDisk, MemStore};
use vb_dcp::{
  Clock, Conf, ConnMap, Consumer, EndReason, Error, ParsedConf, PassiveState, Producer, Resp,
  Step, StreamReq, flags, marker,
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

fn clock() -> Clock {
  let t = Arc::new(AtomicU64::new(1));
  Arc::new(move || t.load(Ordering::Relaxed))
}

fn key(k: &'static str) -> Bytes {
  Bytes::from_static(k.as_bytes())
}

struct Link {
  p: Arc<Producer>,
  c: Arc<Consumer>,
  _src: Arc<ConnMap>,
  _dst: Arc<ConnMap>,
  acks: usize,
}

impl Link {
  fn new(src: &Arc<Bucket>, dst: &Arc<Bucket>, conf: &[Conf]) -> Self {
    let src_conns = ConnMap::new(Arc::clone(src));
    let dst_conns = ConnMap::new(Arc::clone(dst));
    Self {
      p: src_conns.new_producer("replica", ParsedConf::new(conf), clock()),
      c: dst_conns.new_consumer("replica", ParsedConf::new(conf)),
      _src: src_conns,
      _dst: dst_conns,
      acks: 0,
    }
  }

  /// Shuttle messages both ways until neither side has anything to say
  /// 双向转发消息直到两端都无消息
  fn pump(&mut self) -> vb_dcp::Result<()> {
    loop {
      let mut moved = false;
      while let Some(r) = self.c.step() {
        moved = true;
        match r {
          Resp::StreamReq(req) => {
            let res = self.p.stream_request(req, None).map(|_| ());
            self.c.stream_response(req.vbid, res)?;
          }
          Resp::Ack(a) => self.p.handle_response(a)?,
          Resp::BufferAck { bytes, .. } => {
            self.acks += 1;
            self.p.buffer_acknowledgement(bytes)?;
          }
          other => panic!("consumer sent {}", other.as_str()),
        }
      }
      self.p.run_backfills();
      let mut out = Vec::new();
      while self.p.step(&mut out)? == Step::Sent {}
      for r in out {
        moved = true;
        self.c.message(r)?;
      }
      if !moved {
        return Ok(());
      }
    }
  }
}

#[test]
fn replicates_mutations_and_deletions() -> Void {
  let src = bucket();
  let dst = bucket();
  let active = src.create_vb(VB, VbState::Active)?;
  let replica = dst.create_vb(VB, VbState::Replica)?;
  active.set(Cid::DEFAULT, "a", "1")?;
  active.set(Cid::DEFAULT, "b", "2")?;
  active.delete(Cid::DEFAULT, "a")?;

  let mut link = Link::new(&src, &dst, &[]);
  link.c.add_stream(VB, 0)?;
  assert!(matches!(link.c.add_stream(VB, 0), Err(Error::KeyExists(_))));
  link.pump()?;

  assert_eq!(replica.high_seqno(), 3);
  assert!(dst.store().get(VB, Cid::DEFAULT, &key("a")).is_none());
  assert_eq!(
    dst.store().get(VB, Cid::DEFAULT, &key("b")).map(|i| i.val.clone()),
    Some(Bytes::from_static(b"2"))
  );
  let s = link.c.stream(VB);
  assert_eq!(s.as_ref().map(|s| s.state()), Some(PassiveState::Reading));

  active.set(Cid::DEFAULT, "c", "3")?;
  link.pump()?;
  assert_eq!(replica.high_seqno(), 4);
  assert_eq!(s.map(|s| s.num_items()), Some(3));
  OK
}

#[test]
fn add_stream_needs_replica() -> Void {
  let src = bucket();
  let dst = bucket();
  dst.create_vb(VB, VbState::Active)?;
  let link = Link::new(&src, &dst, &[]);
  assert!(matches!(link.c.add_stream(VB, 0), Err(Error::NotMyVbucket(_))));
  assert!(matches!(link.c.add_stream(Vbid(3), 0), Err(Error::NotMyVbucket(_))));
  assert!(matches!(link.c.close_stream(VB), Err(Error::KeyNotFound(_))));
  OK
}

/// Small window: the consumer's acks keep the producer going
/// 小窗口：消费者的确认让生产者持续发送
#[test]
fn buffer_acks_keep_flow() -> Void {
  let src = bucket();
  let dst = bucket();
  let active = src.create_vb(VB, VbState::Active)?;
  let replica = dst.create_vb(VB, VbState::Replica)?;
  for i in 0..20 {
    active.set(Cid::DEFAULT, format!("key{i}"), "value")?;
  }
  let mut link = Link::new(&src, &dst, &[Conf::BufferSize(256)]);
  link.c.add_stream(VB, 0)?;
  link.pump()?;
  assert_eq!(replica.high_seqno(), 20);
  assert!(link.acks > 3);
  assert!(link.p.stats().outstanding < 128);
  OK
}

/// A replica on an unknown branch is rolled back, then streams again
/// 未知分支上的副本先回滚再重新流式复制
#[test]
fn rollback_then_resync() -> Void {
  let src = bucket();
  let dst = bucket();
  let active = src.create_vb(VB, VbState::Active)?;
  active.set(Cid::DEFAULT, "a", "1")?;
  active.set(Cid::DEFAULT, "b", "1")?;

  let replica = dst.create_vb(VB, VbState::Replica)?;
  replica.ckp().create_snapshot(1, 2, vb_base::CkpType::Memory);
  replica.apply_replica(Item::mutation(VB, Cid::DEFAULT, "x", "1").with_seqno(1))?;
  replica.apply_replica(Item::mutation(VB, Cid::DEFAULT, "y", "1").with_seqno(2))?;
  dst.flush(VB)?;

  let mut link = Link::new(&src, &dst, &[]);
  link.c.add_stream(VB, 0)?;
  link.pump()?;

  assert_eq!(replica.high_seqno(), 2);
  assert!(dst.store().get(VB, Cid::DEFAULT, &key("x")).is_none());
  assert!(dst.store().get(VB, Cid::DEFAULT, &key("a")).is_some());
  assert_eq!(link.c.num_streams(), 1);
  OK
}

#[test]
fn takeover_moves_ownership() -> Void {
  let src = bucket();
  let dst = bucket();
  let active = src.create_vb(VB, VbState::Active)?;
  let replica = dst.create_vb(VB, VbState::Replica)?;
  active.set(Cid::DEFAULT, "a", "1")?;
  active.set(Cid::DEFAULT, "b", "1")?;

  let mut link = Link::new(&src, &dst, &[]);
  link.c.add_stream(VB, flags::TAKEOVER)?;
  link.pump()?;

  assert_eq!(active.state(), VbState::Dead);
  assert_eq!(replica.state(), VbState::Active);
  assert_eq!(replica.high_seqno(), 2);
  assert_eq!(link.c.num_streams(), 0);
  assert_eq!(replica.set(Cid::DEFAULT, "c", "1")?.seqno, 3);
  OK
}

#[test]
fn passive_rejects_out_of_snapshot() -> Void {
  let src = bucket();
  let dst = bucket();
  let replica = dst.create_vb(VB, VbState::Replica)?;
  src.create_vb(VB, VbState::Active)?;
  let link = Link::new(&src, &dst, &[]);
  link.c.add_stream(VB, 0)?;
  let req = match link.c.step() {
    Some(Resp::StreamReq(r)) => r,
    other => panic!("expected stream request, got {other:?}"),
  };
  assert_eq!(
    req,
    StreamReq {
      opaque: req.opaque,
      vbid: VB,
      start: 0,
      end: u64::MAX,
      uuid: replica.failover_latest().uuid,
      ..Default::default()
    }
  );
  link.c.stream_response(VB, Ok(()))?;

  let mutation = |seqno| Resp::Mutation {
    opaque: req.opaque,
    item: Arc::new(Item::mutation(VB, Cid::DEFAULT, "k", "v").with_seqno(seqno)),
  };
  assert!(matches!(link.c.message(mutation(1)), Err(Error::Erange { .. })));
  link.c.message(Resp::Marker {
    opaque: req.opaque,
    vbid: VB,
    start: 1,
    end: 2,
    flags: marker::MEMORY | marker::ACK,
  })?;
  link.c.message(mutation(1))?;
  assert!(matches!(link.c.message(mutation(1)), Err(Error::Erange { .. })));
  assert!(matches!(link.c.message(mutation(3)), Err(Error::Erange { .. })));
  link.c.message(mutation(2))?;
  assert!(matches!(link.c.step(), Some(Resp::Ack(vb_dcp::Ack::Marker { .. }))));

  link.c.message(Resp::Noop { opaque: 9 })?;
  assert_eq!(link.c.step(), Some(Resp::Ack(vb_dcp::Ack::Noop { opaque: 9 })));

  link.c.message(Resp::StreamEnd {
    opaque: req.opaque,
    vbid: VB,
    reason: EndReason::Closed,
  })?;
  assert_eq!(link.c.num_streams(), 0);
  assert_eq!(replica.high_seqno(), 2);
  OK
}

/// Random writes, deletes and rotations interleaved with replication converge
/// 随机写入、删除与轮转穿插复制，最终一致
#[test]
fn random_workload_converges() -> Void {
  fastrand::seed(7);
  let src = bucket();
  let dst = bucket();
  let active = src.create_vb(VB, VbState::Active)?;
  let replica = dst.create_vb(VB, VbState::Replica)?;
  let mut link = Link::new(&src, &dst, &[Conf::BufferSize(2048)]);
  link.c.add_stream(VB, 0)?;

  for round in 0..64 {
    for _ in 0..fastrand::usize(1..8) {
      let k = format!("k{}", fastrand::u8(0..16));
      if fastrand::bool() {
        active.set(Cid::DEFAULT, k, round.to_string())?;
      } else {
        match active.delete(Cid::DEFAULT, k) {
          Ok(_) | Err(vb_bucket::Error::KeyNotFound) => {}
          Err(e) => return Err(e.into()),
        }
      }
    }
    if fastrand::u8(0..4) == 0 {
      active.ckp().create_new_checkpoint(false);
    }
    if fastrand::u8(0..3) == 0 {
      link.pump()?;
    }
  }
  link.pump()?;

  assert_eq!(replica.high_seqno(), active.high_seqno());
  for i in 0..16 {
    let k = Bytes::from(format!("k{i}"));
    let want = src.store().get(VB, Cid::DEFAULT, &k).map(|i| i.val.clone());
    let got = dst.store().get(VB, Cid::DEFAULT, &k).map(|i| i.val.clone());
    assert_eq!(got, want, "k{i}");
  }
  OK
}
