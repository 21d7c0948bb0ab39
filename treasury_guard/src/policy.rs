use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Duration, Utc};

use crate::{cfg::Cfg, clock::Clock, errors::GuardError};

/// Why a request was refused. The tag is what ends up in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    TokenNotAllowed,
    AmountExceedsLimit,
    CooldownActive,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::TokenNotAllowed => "token_not_allowed",
            Denial::AmountExceedsLimit => "amount_exceeds_limit",
            Denial::CooldownActive => "cooldown_active",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyRequest {
    pub token: Address,
    pub to: Address,
    pub amount: U256,
    pub created_by: Address,
}

type CooldownKey = (Address, Address, Address);

pub struct Policy {
    allowlist: HashSet<Address>,
    max_amount: Option<U256>,
    cooldown: Duration,
    clock: Clock,
    last_accepted: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
}

impl Policy {
    pub fn new(
        allowlist: HashSet<Address>,
        max_amount: Option<U256>,
        cooldown: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            allowlist,
            max_amount,
            cooldown,
            clock,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_cfg(cfg: &Cfg, clock: Clock) -> Result<Self, GuardError> {
        let allowlist = parse_allowlist(&cfg.policy_allowed_tokens)?;
        let max_amount = parse_max_amount(&cfg.policy_max_amount)?;
        let cooldown = i64::try_from(cfg.cooldown_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| GuardError::Config(format!("COOLDOWN_SECONDS out of range: {}", cfg.cooldown_seconds)))?;
        Ok(Self::new(allowlist, max_amount, cooldown, clock))
    }

    /// Runs the allowlist, amount and cooldown checks in that order.
    ///
    /// Only an accepted request touches the cooldown table.
    pub fn check(&self, req: &PolicyRequest) -> Result<(), Denial> {
        if !self.allowlist.is_empty() && !self.allowlist.contains(&req.token) {
            return Err(Denial::TokenNotAllowed);
        }

        if let Some(max) = self.max_amount
            && req.amount > max
        {
            return Err(Denial::AmountExceedsLimit);
        }

        if self.cooldown > Duration::zero() {
            let key = (req.token, req.to, req.created_by);
            let now = (self.clock)();

            let mut last_accepted = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(last) = last_accepted.get(&key)
                && now.signed_duration_since(*last) < self.cooldown
            {
                return Err(Denial::CooldownActive);
            }
            last_accepted.insert(key, now);
        }

        Ok(())
    }

    #[cfg(test)]
    fn last_accepted(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        self.last_accepted.lock().unwrap().get(key).copied()
    }
}

fn parse_allowlist(csv: &str) -> Result<HashSet<Address>, GuardError> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<Address>()
                .map_err(|e| GuardError::Config(format!("invalid allowlisted token {entry}: {e}")))
        })
        .collect()
}

fn parse_max_amount(raw: &str) -> Result<Option<U256>, GuardError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(None);
    }
    U256::from_str_radix(raw, 10)
        .map(Some)
        .map_err(|e| GuardError::Config(format!("invalid POLICY_MAX_AMOUNT {raw}: {e}")))
}
