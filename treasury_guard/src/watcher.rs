use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{readiness, BatchSelector, Readiness};
use crate::cfg::Cfg;
use crate::clock::Clock;
use crate::contract::RequestCreated;
use crate::errors::GuardError;
use crate::eth_client::GuardClient;
use crate::metrics::GuardMetrics;
use crate::policy::{Policy, PolicyRequest};
use crate::tracker::RequestTracker;

/// Seconds an ID stays out of batches after an execute attempt.
pub const EXEC_COOLDOWN_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub chain_id: u64,
    pub poll_interval: Duration,
    pub gas_floor: u64,
    pub selector: BatchSelector,
}

impl WatcherSettings {
    pub fn from_cfg(cfg: &Cfg) -> Result<Self, GuardError> {
        Ok(Self {
            chain_id: cfg.chain_id,
            poll_interval: cfg.poll_interval()?,
            gas_floor: cfg.gas_floor,
            selector: BatchSelector::new(cfg.gas_floor, cfg.gas_per_tx, cfg.max_batch),
        })
    }
}

/// Drives requests from creation to execution. Owns the tracker and the
/// policy; nothing else touches them.
pub struct Watcher {
    settings: WatcherSettings,
    policy: Policy,
    tracker: RequestTracker,
    metrics: Arc<GuardMetrics>,
}

impl Watcher {
    pub fn new(settings: WatcherSettings, policy: Policy, clock: Clock, metrics: Arc<GuardMetrics>) -> Self {
        Self { settings, policy, tracker: RequestTracker::new(clock), metrics }
    }

    /// Runs until `cancel` fires. Only startup problems are returned.
    pub async fn run(mut self, client: Arc<dyn GuardClient>, cancel: CancellationToken) -> Result<(), GuardError> {
        let actual = client.chain_id().await?;
        if actual != self.settings.chain_id {
            return Err(GuardError::ChainIdMismatch { actual, expected: self.settings.chain_id });
        }
        info!(chain_id = actual, poll_interval = ?self.settings.poll_interval, "watcher started");

        let mut streams = client.subscribe_request_created(cancel.child_token());
        let period = self.settings.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("watcher stopping");
                    return Ok(());
                }
                Some(err) = streams.errors.recv() => {
                    self.metrics.inc_failures();
                    error!(error = %err, "subscription error");
                }
                // Polled before events: an event backlog must not delay executions.
                _ = ticker.tick() => {
                    self.handle_tick(client.as_ref()).await;
                }
                Some(event) = streams.events.recv() => {
                    self.handle_event(client.as_ref(), event).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, client: &dyn GuardClient, event: RequestCreated) {
        let Ok(id) = u64::try_from(event.id) else {
            warn!(id = %event.id, "request id does not fit in u64, skipping");
            return;
        };
        if self.tracker.note(id) {
            debug!(id, token = %event.token, to = %event.to, amount = %event.amount, "tracking new request");
        }
        if self.tracker.is_approved(id) {
            debug!(id, "already approved by this guardian, ignoring duplicate event");
            return;
        }

        let req = match client.get_request(id).await {
            Ok(req) => req,
            Err(err) => {
                self.metrics.inc_failures();
                error!(id, error = %err, "failed to read request");
                return;
            }
        };
        if req.is_terminal() {
            info!(id, status = req.status, "request already finalized");
            self.tracker.forget(id);
            return;
        }

        let check = PolicyRequest { token: req.token, to: req.to, amount: req.amount, created_by: req.created_by };
        if let Err(denial) = self.policy.check(&check) {
            info!(id, reason = %denial, token = %req.token, amount = %req.amount, "policy denied request");
            return;
        }

        match client.approve(id).await {
            Ok(tx_hash) => {
                self.tracker.mark_approved(id);
                self.metrics.inc_approvals();
                info!(id, %tx_hash, created_at = req.created_at, "approve sent");
            }
            Err(err) => {
                self.metrics.inc_failures();
                error!(id, error = %err, "approve failed");
            }
        }
    }

    async fn handle_tick(&mut self, client: &dyn GuardClient) {
        if self.tracker.is_empty() {
            return;
        }
        let chain_time = match client.chain_time().await {
            Ok(t) => t,
            Err(err) => {
                self.metrics.inc_failures();
                error!(error = %err, "failed to read chain time");
                return;
            }
        };

        let batch = self.build_ready_batch(client, chain_time).await;
        if batch.is_empty() {
            return;
        }

        let result = client.execute_batch(&batch, self.settings.gas_floor).await;
        let cooldown = chrono::Duration::seconds(EXEC_COOLDOWN_SECS);
        for id in &batch {
            self.tracker.arm_cooldown(*id, cooldown);
        }
        match result {
            Ok(tx_hash) => {
                self.metrics.inc_executions();
                info!(%tx_hash, count = batch.len(), ids = ?batch, "executeBatch sent");
            }
            Err(err) => {
                self.metrics.inc_failures();
                error!(ids = ?batch, error = %err, "executeBatch failed");
            }
        }
    }

    /// Walks tracked IDs in ascending order and returns those ready to execute.
    async fn build_ready_batch(&mut self, client: &dyn GuardClient, chain_time: u64) -> Vec<u64> {
        let ids: Vec<u64> = self.tracker.ids().collect();
        let mut ready = Vec::new();

        for id in ids {
            if ready.len() >= self.settings.selector.max_batch() {
                break;
            }
            let req = match client.get_request(id).await {
                Ok(req) => req,
                Err(err) => {
                    self.metrics.inc_failures();
                    error!(id, error = %err, "failed to read request");
                    continue;
                }
            };
            if req.is_terminal() {
                info!(id, status = req.status, "request finalized, no longer tracked");
                self.tracker.forget(id);
                continue;
            }
            if self.tracker.is_cooling(id) {
                continue;
            }
            match readiness(&req, chain_time) {
                Readiness::Ready => ready.push(id),
                other => debug!(id, state = ?other, chain_time, "not ready"),
            }
        }

        self.settings.selector.select(&ready)
    }
}
