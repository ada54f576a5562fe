//! Connections of one bucket, and the bridge from vbucket events to producers
//! 单个桶的连接，以及从 vbucket 事件到生产者的桥接

use std::{collections::HashMap, sync::Arc};

use log::info;
use parking_lot::RwLock;
use vb_base::{Name, VbState, Vbid};
use vb_bucket::{Bucket, Notify};

use crate::{Clock, Consumer, ParsedConf, Producer};

pub struct ConnMap {
  bucket: Arc<Bucket>,
  producers: RwLock<HashMap<Name, Arc<Producer>>>,
  consumers: RwLock<HashMap<Name, Arc<Consumer>>>,
}

impl ConnMap {
  /// Registers itself as the bucket's notification target
  /// 将自身注册为桶的通知目标
  pub fn new(bucket: Arc<Bucket>) -> Arc<Self> {
    let map = Arc::new(Self {
      bucket,
      producers: RwLock::new(HashMap::new()),
      consumers: RwLock::new(HashMap::new()),
    });
    let weak = Arc::downgrade(&map);
    map.bucket.set_notify(weak);
    map
  }

  #[inline]
  pub fn bucket(&self) -> &Arc<Bucket> {
    &self.bucket
  }

  /// A reconnect under the same name replaces and disconnects the old producer
  /// 同名重连会替换并断开旧生产者
  pub fn new_producer(&self, name: impl Into<Name>, conf: ParsedConf, clock: Clock) -> Arc<Producer> {
    let name = name.into();
    let p = Producer::new(name.clone(), Arc::clone(&self.bucket), conf, clock);
    let old = self.producers.write().insert(name.clone(), Arc::clone(&p));
    if let Some(old) = old {
      info!("{name} replaced, disconnecting old producer");
      old.disconnect();
    }
    p
  }

  pub fn new_consumer(&self, name: impl Into<Name>, conf: ParsedConf) -> Arc<Consumer> {
    let name = name.into();
    let c = Consumer::new(name.clone(), Arc::clone(&self.bucket), conf);
    self.consumers.write().insert(name, Arc::clone(&c));
    c
  }

  pub fn producer(&self, name: &str) -> Option<Arc<Producer>> {
    self.producers.read().get(name).cloned()
  }

  pub fn consumer(&self, name: &str) -> Option<Arc<Consumer>> {
    self.consumers.read().get(name).cloned()
  }

  fn producers(&self) -> Vec<Arc<Producer>> {
    self.producers.read().values().cloned().collect()
  }

  /// Drop a connection and tear down its streams
  /// 移除连接并拆除其全部流
  pub fn disconnect(&self, name: &str) -> bool {
    let p = self.producers.write().remove(name);
    if let Some(p) = &p {
      p.disconnect();
    }
    let c = self.consumers.write().remove(name);
    p.is_some() || c.is_some()
  }

  /// Ask the producer owning the cursor `name` to drop it
  /// 请求持有游标 `name` 的生产者丢弃它
  pub fn handle_slow_stream(&self, vbid: Vbid, name: &Name) -> bool {
    self
      .producer(name.as_str())
      .is_some_and(|p| p.handle_slow_stream(vbid))
  }

  pub fn num_producers(&self) -> usize {
    self.producers.read().len()
  }

  pub fn num_consumers(&self) -> usize {
    self.consumers.read().len()
  }
}

impl Notify for ConnMap {
  fn notify_seqno(&self, vbid: Vbid, seqno: u64) {
    for p in self.producers() {
      p.notify_seqno_available(vbid, seqno);
    }
  }

  fn notify_state(&self, vbid: Vbid, state: VbState) {
    for p in self.producers() {
      p.vbucket_state_changed(vbid, state);
    }
  }
}
