//! Session keepalive
//!
//! Janus expires sessions that stay silent for longer than its session
//! timeout (60s by default), so a task pings the gateway while a session
//! exists.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::message::Request;
use super::state::SessionState;
use crate::network::SignalingTransport;

pub struct KeepaliveSupervisor {
    interval: Duration,
    active: Option<JoinHandle<()>>,
    /// Stopped tasks, awaited by `join`
    retired: Vec<JoinHandle<()>>,
}

impl KeepaliveSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: None,
            retired: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start pinging for the session currently in `state`, replacing any
    /// previous task. Returns false if no runtime is available.
    pub fn start(
        &mut self,
        state: Arc<SessionState>,
        transport: Arc<dyn SignalingTransport>,
    ) -> bool {
        self.stop();

        if self.interval.is_zero() {
            warn!("Keepalive not started, interval is zero");
            return false;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Keepalive not started, no runtime: {}", e);
                return false;
            }
        };

        let period = self.interval;
        self.active = Some(handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !send_keepalive(&state, transport.as_ref()) {
                    break;
                }
            }
            debug!("Keepalive stopped");
        }));
        true
    }

    /// Abort the running task, if any
    pub fn stop(&mut self) {
        if let Some(task) = self.active.take() {
            task.abort();
            // Only tasks still winding down need to be awaited
            self.retired.retain(|retired| !retired.is_finished());
            self.retired.push(task);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop and wait for every task this supervisor started
    pub async fn join(&mut self) {
        self.stop();
        for task in self.retired.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Keepalive task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for KeepaliveSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send one keepalive; false once the session is gone.
///
/// The read guard is held across the send so teardown cannot clear the ids
/// between the check and the send.
fn send_keepalive(state: &SessionState, transport: &dyn SignalingTransport) -> bool {
    let ids = state.read_ids();
    if ids.session_id == 0 {
        return false;
    }

    match Request::keepalive(ids.session_id).to_json() {
        Ok(json) => match transport.send(json) {
            Ok(()) => trace!("Keepalive sent for session {}", ids.session_id),
            Err(e) => warn!("Failed to send keepalive: {}", e),
        },
        Err(e) => warn!("Failed to encode keepalive: {}", e),
    }
    true
}
