use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::engine::ContractEngine;
use crate::error::HubError;
use crate::store::SessionStore;

const LOG_TARGET: &str = "sweeper";

/// How often overdue sessions are reclaimed.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Background task cancelling sessions past their deadline. The sweeper
/// is advisory: settle independently re-checks `expires_at`, so a slow
/// sweep never lets an expired session settle.
pub struct ExpirySweeper {
    sessions: Arc<dyn SessionStore>,
    engine: Arc<ContractEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(sessions: Arc<dyn SessionStore>, engine: Arc<ContractEngine>) -> Self {
        Self {
            sessions,
            engine,
            interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let span = tracing::info_span!("task", task_name = "expiry-sweeper");
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    self.sweep_once().await;
                }
            }
            .instrument(span),
        )
    }

    /// One pass: expire everything overdue. Returns how many sessions
    /// were reclaimed.
    pub async fn sweep_once(&self) -> usize {
        let overdue = match self.sessions.find_expired(Utc::now()).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(target = LOG_TARGET, error = %err, "expiry scan failed");
                return 0;
            }
        };
        let mut reclaimed = 0;
        for session in overdue {
            match self.engine.expire(&session.session_id).await {
                Ok(outcome) => {
                    reclaimed += 1;
                    info!(
                        target = LOG_TARGET,
                        session_id = %outcome.session_id,
                        refunded = outcome.refunded_players.len(),
                        "expired overdue session"
                    );
                }
                // Lost the race against a concurrent settle or cancel;
                // the terminal transition that won is authoritative.
                Err(HubError::AlreadySettled) | Err(HubError::InvalidState(_)) => {}
                Err(err) => {
                    warn!(
                        target = LOG_TARGET,
                        session_id = %session.session_id,
                        error = %err,
                        "failed to expire session"
                    );
                }
            }
        }
        reclaimed
    }
}
