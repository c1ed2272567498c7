//! Per-peer liveness probing
//!
//! Every peer gets one task that pings it every `T`. The task never looks at
//! the peer directly: each tick asks the registry to probe the peer under its
//! room lock, which either sends the ping or reports the peer as expired
//! (nothing acknowledged for more than `2T`). Acknowledgments only move the
//! peer's `last_live_at`; they never reschedule the tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, trace};

use crate::peer::PeerRef;
use crate::registry::{Probe, RoomRegistry};

/// Ownership of one peer's heartbeat task
///
/// Dropping the handle cancels the task, so a peer that is dropped can never
/// leave a timer behind.
#[derive(Debug)]
pub struct HeartbeatHandle {
    abort: AbortHandle,
}

impl HeartbeatHandle {
    fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Stop the task. Safe to call on a task that already finished.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Start probing `peer` every `interval`
///
/// The first ping goes out immediately. Returns false if the peer already
/// left, in which case the task is cancelled straight away.
pub fn start(registry: &Arc<RoomRegistry>, peer: PeerRef, interval: Duration) -> bool {
    let task = tokio::spawn(run(Arc::clone(registry), peer.clone(), interval));
    registry.attach_heartbeat(&peer, HeartbeatHandle::new(task.abort_handle()))
}

async fn run(registry: Arc<RoomRegistry>, peer: PeerRef, interval: Duration) {
    let window = interval * 2;
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match registry.probe(&peer, window) {
            Probe::Pinged => trace!("Pinged {}", peer.id),
            Probe::Expired => {
                info!("Peer {} timed out in room {}", peer.id, peer.group_key);
                registry.leave(&peer);
                return;
            }
            Probe::Gone => return,
        }
    }
}
