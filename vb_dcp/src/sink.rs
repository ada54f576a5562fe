//! Outbound message sink of a connection
//! 连接的出站消息接收端

use crate::Resp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErr {
  /// Could not buffer the message now, retried next step
  /// 暂时无法缓冲消息，下次 step 重试
  NoMem,
  /// Peer is gone
  /// 对端已断开
  Closed,
}

pub trait Sink {
  fn send(&mut self, resp: &Resp) -> Result<(), SendErr>;
}

impl Sink for Vec<Resp> {
  fn send(&mut self, resp: &Resp) -> Result<(), SendErr> {
    self.push(resp.clone());
    Ok(())
  }
}
