use std::sync::Arc;

use log::{debug, info};
use vb_base::VbState;

use super::CkpMgr;
use crate::{Checkpoint, Cursor, Expelled, Removed};

impl CkpMgr {
  /// Remove closed checkpoints no cursor references, oldest first, up to `limit`
  /// 从最旧开始移除无游标引用的已关闭检查点，最多 `limit` 个
  pub fn remove_closed_unref_checkpoints(&self, limit: usize) -> Removed {
    let mut new_open = false;
    let drained: Vec<Checkpoint> = {
      let mut g = self.inner.lock();
      if g.state == VbState::Active {
        let force = self.mem_force(&g);
        if force {
          info!(
            "{} checkpoint memory {} over {}, closing open checkpoint",
            self.vbid,
            g.mem(),
            self.conf.mem_high_wat
          );
        }
        new_open = self.check_open(&mut g, force, true);
      }

      let persisted = g.persisted_ckp_id;
      let n = g
        .list
        .iter()
        .take(limit)
        .take_while(|c| {
          !c.is_open() && c.cursors() == 0 && !(self.conf.persistence && c.id() > persisted)
        })
        .count();
      let drained: Vec<Checkpoint> = g.list.drain(..n).collect();
      g.removed += drained.len() as u64;
      self.sync_mem(&g);
      drained
    };

    let removed = Removed {
      items: drained.iter().map(Checkpoint::num_items).sum(),
      checkpoints: drained.len(),
      new_open,
    };
    if removed.checkpoints > 0 {
      debug!(
        "{} removed {} checkpoints, {} items",
        self.vbid, removed.checkpoints, removed.items
      );
    }
    drop(drained);
    removed
  }

  /// Expel entries before the earliest cursor of the oldest referenced checkpoint
  /// 驱逐最旧被引用检查点中最早游标之前的条目
  pub fn expel_unreferenced_items(&self) -> Expelled {
    let expelled = {
      let mut g = self.inner.lock();
      let Some(i) = g.list.iter().position(|c| c.cursors() > 0) else {
        return Expelled::default();
      };
      let id = g.list[i].id();
      let Some(upto) = g
        .cursors
        .values()
        .filter(|p| p.ckp_id == id)
        .map(|p| p.slot)
        .min()
      else {
        return Expelled::default();
      };
      let items = g.list[i].expel(upto);
      g.expelled += items.len() as u64;
      self.sync_mem(&g);
      items
    };

    let r = Expelled {
      items: expelled.len(),
      mem: expelled.iter().map(|i| i.size()).sum(),
    };
    if r.items > 0 {
      debug!("{} expelled {} items, {} bytes", self.vbid, r.items, r.mem);
    }
    drop(expelled);
    r
  }

  /// Replication cursors whose removal would let memory be reclaimed
  /// 移除后可回收内存的复制游标
  pub fn cursors_to_drop(&self) -> Vec<Arc<Cursor>> {
    let g = self.inner.lock();
    let replicas = g.cursors.values().filter(|p| !p.handle.is_persistence());
    let pcursor = g.cursors.values().find(|p| p.handle.is_persistence());
    match pcursor {
      Some(pc) if self.conf.persistence => replicas
        .filter(|p| p.ckp_id < pc.ckp_id)
        .map(|p| Arc::clone(&p.handle))
        .collect(),
      _ => match g.list.front() {
        Some(front) if !front.is_open() => replicas
          .filter(|p| p.ckp_id == front.id())
          .map(|p| Arc::clone(&p.handle))
          .collect(),
        _ => Vec::new(),
      },
    }
  }
}
