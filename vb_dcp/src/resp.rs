//! Messages exchanged over a DCP connection
//! DCP 连接上交换的消息

use vb_base::{Op, QueuedItem, VbState, Vbid};

/// Snapshot marker flags
/// 快照标记标志
pub mod marker {
  pub const MEMORY: u32 = 0x01;
  pub const DISK: u32 = 0x02;
  /// Snapshot starts a checkpoint
  /// 快照开启检查点
  pub const CHK: u32 = 0x04;
  /// Consumer must acknowledge the snapshot end
  /// 消费者需确认快照结束
  pub const ACK: u32 = 0x08;
}

/// Stream request flags
/// 流请求标志
pub mod flags {
  pub const TAKEOVER: u32 = 0x01;
  pub const DISKONLY: u32 = 0x02;
  /// End at the current high seqno
  /// 以当前最高序号结束
  pub const LATEST: u32 = 0x04;
  pub const ACTIVE_VB_ONLY: u32 = 0x10;
}

const HEADER: usize = 24;
const MUTATION_BASE: usize = 55;
const DELETION_BASE: usize = 42;
const SYSTEM_EVENT_BASE: usize = 37;
const MARKER: usize = 44;
const STREAM_END: usize = 28;
const SET_VB_STATE: usize = 25;
const BUFFER_ACK: usize = 28;
const STREAM_REQ: usize = HEADER + 48;

/// Why a stream ended
/// 流结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EndReason {
  Ok = 0,
  Closed = 1,
  StateChanged = 2,
  Disconnected = 3,
  Slow = 4,
  BackfillFail = 5,
  Rollback = 6,
  FilterEmpty = 7,
}

impl EndReason {
  pub const fn as_str(&self) -> &'static str {
    match self {
      EndReason::Ok => "ok",
      EndReason::Closed => "closed",
      EndReason::StateChanged => "state changed",
      EndReason::Disconnected => "disconnected",
      EndReason::Slow => "slow",
      EndReason::BackfillFail => "backfill failed",
      EndReason::Rollback => "rollback",
      EndReason::FilterEmpty => "filter empty",
    }
  }
}

/// Stream request parameters
/// 流请求参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamReq {
  pub flags: u32,
  pub opaque: u32,
  pub vbid: Vbid,
  pub start: u64,
  pub end: u64,
  pub uuid: u64,
  pub snap_start: u64,
  pub snap_end: u64,
}

impl StreamReq {
  #[inline]
  pub const fn has(&self, flag: u32) -> bool {
    self.flags & flag != 0
  }
}

/// Replies to messages the producer sent
/// 对生产者消息的回复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
  Noop { opaque: u32 },
  SetVbState { opaque: u32, vbid: Vbid },
  Marker { opaque: u32, vbid: Vbid },
}

/// One message ready for the wire
/// 一条待发送消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resp {
  Marker {
    opaque: u32,
    vbid: Vbid,
    start: u64,
    end: u64,
    flags: u32,
  },
  Mutation {
    opaque: u32,
    item: QueuedItem,
  },
  Deletion {
    opaque: u32,
    item: QueuedItem,
  },
  SystemEvent {
    opaque: u32,
    item: QueuedItem,
  },
  SetVbState {
    opaque: u32,
    vbid: Vbid,
    state: VbState,
  },
  StreamEnd {
    opaque: u32,
    vbid: Vbid,
    reason: EndReason,
  },
  Noop {
    opaque: u32,
  },
  BufferAck {
    opaque: u32,
    bytes: usize,
  },
  StreamReq(StreamReq),
  Ack(Ack),
}

impl Resp {
  /// Data message for a log entry; meta entries have none
  /// 日志条目对应的数据消息；元条目没有
  pub fn from_item(opaque: u32, item: QueuedItem) -> Option<Self> {
    Some(match item.op {
      Op::Mutation => Resp::Mutation { opaque, item },
      Op::Deletion => Resp::Deletion { opaque, item },
      Op::SystemEvent(_) => Resp::SystemEvent { opaque, item },
      _ => return None,
    })
  }

  /// Bytes charged to flow control
  /// 计入流控的字节数
  pub fn size(&self) -> usize {
    match self {
      Resp::Marker { .. } => MARKER,
      Resp::Mutation { item, .. } => MUTATION_BASE + item.key.len() + item.val.len(),
      Resp::Deletion { item, .. } => DELETION_BASE + item.key.len(),
      Resp::SystemEvent { item, .. } => SYSTEM_EVENT_BASE + item.key.len() + item.val.len(),
      Resp::SetVbState { .. } => SET_VB_STATE,
      Resp::StreamEnd { .. } => STREAM_END,
      Resp::Noop { .. } | Resp::Ack(_) => HEADER,
      Resp::BufferAck { .. } => BUFFER_ACK,
      Resp::StreamReq(_) => STREAM_REQ,
    }
  }

  pub fn vbid(&self) -> Option<Vbid> {
    match self {
      Resp::Marker { vbid, .. } | Resp::SetVbState { vbid, .. } | Resp::StreamEnd { vbid, .. } => {
        Some(*vbid)
      }
      Resp::Mutation { item, .. } | Resp::Deletion { item, .. } | Resp::SystemEvent { item, .. } => {
        Some(item.vbid)
      }
      Resp::StreamReq(r) => Some(r.vbid),
      Resp::Ack(Ack::SetVbState { vbid, .. } | Ack::Marker { vbid, .. }) => Some(*vbid),
      Resp::Noop { .. } | Resp::BufferAck { .. } | Resp::Ack(Ack::Noop { .. }) => None,
    }
  }

  /// Log entry carried by data messages
  /// 数据消息携带的日志条目
  pub fn item(&self) -> Option<&QueuedItem> {
    match self {
      Resp::Mutation { item, .. } | Resp::Deletion { item, .. } | Resp::SystemEvent { item, .. } => {
        Some(item)
      }
      _ => None,
    }
  }

  #[inline]
  pub fn seqno(&self) -> Option<u64> {
    self.item().map(|i| i.seqno)
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Resp::Marker { .. } => "snapshot_marker",
      Resp::Mutation { .. } => "mutation",
      Resp::Deletion { .. } => "deletion",
      Resp::SystemEvent { .. } => "system_event",
      Resp::SetVbState { .. } => "set_vbucket_state",
      Resp::StreamEnd { .. } => "stream_end",
      Resp::Noop { .. } => "noop",
      Resp::BufferAck { .. } => "buffer_acknowledgement",
      Resp::StreamReq(_) => "stream_req",
      Resp::Ack(_) => "response",
    }
  }
}
