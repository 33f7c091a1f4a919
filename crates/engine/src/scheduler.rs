use crate::GameSession;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drives `GameSession::tick` on a fixed period.
///
/// Ticks run one at a time on a single task; a tick that overruns its period
/// skips the missed slots instead of bursting to catch up.
pub struct ProductionScheduler {
    session: Arc<GameSession>,
    period: Duration,
}

impl ProductionScheduler {
    pub fn new(session: Arc<GameSession>, period: Duration) -> Self {
        Self { session, period }
    }

    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        // First tick one full period after start, not immediately.
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_ms = self.period.as_millis() as u64, "production.started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.session.tick() {
                    Ok(snapshot) => debug!(resources = %snapshot.resources, "production.applied"),
                    Err(err) => warn!(error = %err, "production.write_back_failed"),
                },
            }
        }
        info!("production.stopped");
    }
}
