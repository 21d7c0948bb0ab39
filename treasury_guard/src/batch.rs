use crate::contract::RequestState;

/// Why a pending request cannot go into an execute batch yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Finalized,
    AwaitingApprovals,
    Timelocked,
    Expired,
}

/// Evaluates the on-chain readiness predicates against `chain_time`.
pub fn readiness(req: &RequestState, chain_time: u64) -> Readiness {
    if req.is_terminal() {
        return Readiness::Finalized;
    }
    if req.approvals_needed > 0 && req.approvals < req.approvals_needed {
        return Readiness::AwaitingApprovals;
    }
    if chain_time < req.earliest_exec {
        return Readiness::Timelocked;
    }
    if req.expires_at > 0 && chain_time > req.expires_at {
        return Readiness::Expired;
    }
    Readiness::Ready
}

/// Picks the prefix of ready IDs that fits into one execute transaction.
#[derive(Debug, Clone)]
pub struct BatchSelector {
    gas_floor: u64,
    gas_per_tx: u64,
    max_batch: usize,
}

impl BatchSelector {
    pub fn new(gas_floor: u64, gas_per_tx: u64, max_batch: usize) -> Self {
        Self { gas_floor, gas_per_tx, max_batch }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn select(&self, ids: &[u64]) -> Vec<u64> {
        let mut gas_remaining = self.gas_per_tx.saturating_mul(ids.len() as u64);
        let mut selected = Vec::with_capacity(ids.len().min(self.max_batch));
        for id in ids {
            if selected.len() >= self.max_batch || gas_remaining < self.gas_floor {
                break;
            }
            selected.push(*id);
            gas_remaining = gas_remaining.saturating_sub(self.gas_per_tx);
        }
        selected
    }
}
