use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use aok::{OK, Void};
use vb_base::{Cid, VbState, Vbid};
use vb_bucket::{Bucket, Disk, MemDisk, MemStore};
use vb_dcp::{
  ActiveState, CkpRemover, Clock, Conf, ConnMap, EndReason, ParsedConf, Producer, Progress, Resp,
  Step, StreamReq, flags, marker,
};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

const VB: Vbid = Vbid(0);

fn bucket(conf: &[vb_bucket::Conf]) -> (Arc<Bucket>, Arc<MemDisk>) {
  let disk = Arc::new(MemDisk::new());
  let b = Arc::new(Bucket::new(
    vb_bucket::ParsedConf::new(conf),
    Arc::new(MemStore::new()),
    Arc::clone(&disk) as Arc<dyn Disk>,
  ));
  (b, disk)
}

fn clock() -> Clock {
  let t = Arc::new(AtomicU64::new(1));
  Arc::new(move || t.load(Ordering::Relaxed))
}

fn producer(conns: &ConnMap, conf: &[Conf]) -> Arc<Producer> {
  conns.new_producer("p", ParsedConf::new(conf), clock())
}

fn req(flags: u32) -> StreamReq {
  StreamReq {
    flags,
    opaque: 3,
    vbid: VB,
    end: u64::MAX,
    ..Default::default()
  }
}

fn drain(p: &Producer, out: &mut Vec<Resp>) -> vb_dcp::Result<()> {
  while p.step(out)? == Step::Sent {}
  Ok(())
}

fn seqnos(out: &[Resp]) -> Vec<u64> {
  out.iter().filter_map(Resp::seqno).collect()
}

/// Three items in a closed, persisted checkpoint and one in the open one
/// 已关闭且已持久化的检查点中三条，打开检查点中一条
fn older_data_on_disk(b: &Bucket) -> Void {
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  vb.ckp().create_new_checkpoint(true);
  vb.set(Cid::DEFAULT, "d", "v")?;
  b.flush(VB)?;
  vb.ckp().remove_closed_unref_checkpoints(16);
  assert_eq!(vb.ckp().num_checkpoints(), 1);
  OK
}

#[test]
fn disk_then_memory() -> Void {
  let (b, _) = bucket(&[]);
  older_data_on_disk(&b)?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0), None)?;
  let s = p.stream(VB).and_then(|s| s.as_active().cloned());
  assert_eq!(s.as_ref().map(|s| s.state()), Some(ActiveState::Backfilling));

  let mut out = Vec::new();
  drain(&p, &mut out)?;
  assert!(out.is_empty());
  assert_eq!(p.backfills().num_backfills(), 1);

  assert_eq!(p.run_backfills(), Progress::Idle);
  drain(&p, &mut out)?;
  assert_eq!(seqnos(&out), vec![1, 2, 3, 4]);
  let markers: Vec<(u64, u64, u32)> = out
    .iter()
    .filter_map(|r| match r {
      Resp::Marker {
        start, end, flags, ..
      } => Some((*start, *end, *flags)),
      _ => None,
    })
    .collect();
  assert_eq!(
    markers,
    vec![
      (0, 3, marker::DISK | marker::CHK),
      (4, 4, marker::MEMORY | marker::CHK)
    ]
  );
  let st = s.map(|s| s.stats());
  assert_eq!(st.map(|s| (s.state, s.backfill_items, s.memory_items)), Some((ActiveState::InMemory, 3, 1)));
  assert_eq!(p.stats().backfill.bytes_read, 0);
  OK
}

#[test]
fn disk_only_ends_after_disk() -> Void {
  let (b, _) = bucket(&[]);
  older_data_on_disk(&b)?;
  let vb = b.get(VB)?;
  vb.set(Cid::DEFAULT, "e", "v")?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(flags::DISKONLY), None)?;

  p.run_backfills();
  let mut out = Vec::new();
  drain(&p, &mut out)?;
  assert_eq!(seqnos(&out), vec![1, 2, 3, 4]);
  assert!(matches!(out[0], Resp::Marker { end: 4, .. }));
  assert!(matches!(
    out.last(),
    Some(Resp::StreamEnd {
      reason: EndReason::Ok,
      ..
    })
  ));
  assert_eq!(vb.ckp().num_cursors(), 1);
  OK
}

/// Reads past the shared budget wait until sent bytes free it
/// 超出共享预算的读取等待已发送字节释放
#[test]
fn shared_budget_blocks_and_resumes() -> Void {
  let (b, _) = bucket(&[]);
  older_data_on_disk(&b)?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[Conf::BackfillBytes(1)]);
  p.stream_request(req(flags::DISKONLY), None)?;

  assert_eq!(p.run_backfills(), Progress::Blocked);
  assert!(p.stats().backfill.full);
  assert_eq!(p.stats().backfill.snoozing, 1);

  let mut out = Vec::new();
  for _ in 0..16 {
    drain(&p, &mut out)?;
    if matches!(out.last(), Some(Resp::StreamEnd { .. })) {
      break;
    }
    p.run_backfills();
  }
  assert_eq!(seqnos(&out), vec![1, 2, 3, 4]);
  assert!(matches!(out.last(), Some(Resp::StreamEnd { .. })));
  assert_eq!(p.backfills().num_backfills(), 0);
  OK
}

#[test]
fn purged_start_rolls_back() -> Void {
  let (b, disk) = bucket(&[]);
  older_data_on_disk(&b)?;
  let vb = b.get(VB)?;
  vb.delete(Cid::DEFAULT, "a")?;
  b.flush(VB)?;
  disk.purge(VB, 5);
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  let uuid = vb.failover_latest().uuid;
  let r = StreamReq {
    uuid,
    start: 2,
    snap_start: 2,
    snap_end: 2,
    ..req(0)
  };
  assert!(matches!(p.stream_request(r, None), Err(vb_dcp::Error::Rollback(0))));
  OK
}

#[test]
fn backfills_beyond_limit_wait() -> Void {
  let (b, _) = bucket(&[]);
  for i in 0..3u16 {
    let vb = b.create_vb(Vbid(i), VbState::Active)?;
    vb.set(Cid::DEFAULT, "a", "v")?;
  }
  b.flush_all()?;
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[Conf::MaxBackfills(1)]);
  for i in 0..3u16 {
    p.stream_request(
      StreamReq {
        vbid: Vbid(i),
        ..req(flags::DISKONLY)
      },
      None,
    )?;
  }
  let st = p.stats().backfill;
  assert_eq!((st.active, st.pending), (1, 2));

  p.run_backfills();
  let mut out = Vec::new();
  drain(&p, &mut out)?;
  let ends = out
    .iter()
    .filter(|r| matches!(r, Resp::StreamEnd { .. }))
    .count();
  assert_eq!(ends, 3);
  OK
}

/// Remover drops a lagging cursor; the stream catches up from disk
/// 回收任务丢弃落后游标，流从磁盘追赶
#[test]
fn slow_cursor_dropped() -> Void {
  let (b, _) = bucket(&[vb_bucket::Conf::CkpMemQuota(100)]);
  let vb = b.create_vb(VB, VbState::Active)?;
  for k in ["a", "b", "c"] {
    vb.set(Cid::DEFAULT, k, "v")?;
  }
  let conns = ConnMap::new(Arc::clone(&b));
  let p = producer(&conns, &[]);
  p.stream_request(req(0), None)?;

  vb.ckp().create_new_checkpoint(true);
  vb.set(Cid::DEFAULT, "d", "v")?;
  vb.set(Cid::DEFAULT, "e", "v")?;
  b.flush(VB)?;

  let r = CkpRemover::run(&b, &conns);
  assert_eq!(r.dropped, 0);
  assert_eq!(vb.ckp().num_checkpoints(), 2);

  p.control("supports_cursor_dropping", "true")?;
  let r = CkpRemover::run(&b, &conns);
  assert_eq!(r.dropped, 1);
  assert_eq!(r.removed, 3);
  assert_eq!(vb.ckp().num_checkpoints(), 1);

  let mut out = Vec::new();
  drain(&p, &mut out)?;
  p.run_backfills();
  drain(&p, &mut out)?;
  assert_eq!(seqnos(&out), vec![1, 2, 3, 4, 5]);
  assert!(matches!(
    out.first(),
    Some(Resp::Marker {
      flags: marker::DISK | marker::CHK,
      ..
    })
  ));
  OK
}
