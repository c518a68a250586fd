//! Fixed-interval agent update loop
//!
//! Each cycle runs to completion before the next starts. A cycle that
//! overruns the interval is followed immediately by the next one; otherwise
//! the loop sleeps for what is left of the interval, measured from the start
//! of the cycle.

use super::collaborators::{BehaviorMonitor, SelfGeneration};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Work performed once per tick
#[async_trait]
pub trait Update: Send + Sync {
    /// `delta` is the time since the previous cycle started
    async fn update(&self, delta: Duration);
}

/// The agent's periodic work: behaviour monitoring then self-prompting
pub struct AgentUpdate {
    behavior: Arc<dyn BehaviorMonitor>,
    self_generation: Arc<dyn SelfGeneration>,
}

impl AgentUpdate {
    pub fn new(behavior: Arc<dyn BehaviorMonitor>, self_generation: Arc<dyn SelfGeneration>) -> Self {
        Self {
            behavior,
            self_generation,
        }
    }
}

#[async_trait]
impl Update for AgentUpdate {
    async fn update(&self, delta: Duration) {
        self.behavior.update().await;
        self.self_generation.update(delta).await;
    }
}

/// Run `unit` every `interval` until `shutdown` turns true; returns the number of cycles run
pub async fn run_update_loop<U>(
    unit: &U,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    U: Update + ?Sized,
{
    let mut cycles = 0;
    let mut last = Instant::now();

    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = shutdown.wait_for(|stop| *stop) => return cycles,
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let start = Instant::now();
        unit.update(start - last).await;
        cycles += 1;

        if let Some(remaining) = interval.checked_sub(start.elapsed()) {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        last = start;
    }

    debug!(cycles, "update loop stopped");
    cycles
}
