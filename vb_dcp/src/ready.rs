//! Round-robin queue of vbuckets with pending data
//! 有待发数据的 vbucket 轮询队列

use std::collections::{HashSet, VecDeque};

use vb_base::Vbid;

#[derive(Debug, Default)]
pub struct ReadyQueue {
  queue: VecDeque<Vbid>,
  set: HashSet<Vbid>,
}

impl ReadyQueue {
  /// Returns false if already queued
  /// 已在队列中则返回 false
  pub fn push(&mut self, vbid: Vbid) -> bool {
    if !self.set.insert(vbid) {
      return false;
    }
    self.queue.push_back(vbid);
    true
  }

  pub fn pop(&mut self) -> Option<Vbid> {
    let vbid = self.queue.pop_front()?;
    self.set.remove(&vbid);
    Some(vbid)
  }

  pub fn remove(&mut self, vbid: Vbid) {
    if self.set.remove(&vbid) {
      self.queue.retain(|v| *v != vbid);
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.queue.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }
}
