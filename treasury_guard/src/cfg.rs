use std::{net::SocketAddr, time::Duration};

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::Address;
use clap::Parser;

use crate::errors::GuardError;

#[derive(Parser, Debug)]
#[command(name = "guardd", about = "Treasury guardian: approves and batch-executes guarded payment requests")]
pub struct Cfg {
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    #[arg(long, env = "WS_URL")]
    pub ws_url: String,

    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Address,

    #[arg(long, env = "GUARDIAN_KEY", hide_env_values = true)]
    pub guardian_key: PrivateKeySigner,

    #[arg(long, env = "EXECUTOR_KEY", hide_env_values = true)]
    pub executor_key: PrivateKeySigner,

    #[arg(long, env = "MAX_BATCH", default_value_t = 10)]
    pub max_batch: usize,

    #[arg(long, env = "POLL_INTERVAL", default_value = "5s")]
    pub poll_interval: String,

    #[arg(long, env = "GAS_FLOOR", default_value_t = 50_000)]
    pub gas_floor: u64,

    #[arg(long, env = "GAS_PER_TX", default_value_t = 250_000)]
    pub gas_per_tx: u64,

    #[arg(long, env = "POLICY_MAX_AMOUNT", default_value = "0")]
    pub policy_max_amount: String,

    #[arg(long, env = "POLICY_ALLOWED_TOKENS", default_value = "")]
    pub policy_allowed_tokens: String,

    #[arg(long, env = "COOLDOWN_SECONDS", default_value_t = 0)]
    pub cooldown_seconds: u64,

    #[arg(long, env = "HTTP_LISTEN_ADDR", default_value = "127.0.0.1:9000")]
    pub http_listen_addr: SocketAddr,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "METRICS_NAMESPACE", default_value = "treasury_guard")]
    pub metrics_namespace: String,

    #[arg(long, env = "EVENT_BUFFER", default_value_t = 64)]
    pub event_buffer: usize,

    #[arg(long, env = "RESUBSCRIBE_DELAY", default_value = "5s")]
    pub resubscribe_delay: String,
}

impl Cfg {
    pub fn poll_interval(&self) -> Result<Duration, GuardError> {
        parse_positive_duration("POLL_INTERVAL", &self.poll_interval)
    }

    pub fn resubscribe_delay(&self) -> Result<Duration, GuardError> {
        parse_positive_duration("RESUBSCRIBE_DELAY", &self.resubscribe_delay)
    }

    /// Rejects settings that would leave the daemon idle or spinning.
    pub fn validate(&self) -> Result<(), GuardError> {
        self.poll_interval()?;
        self.resubscribe_delay()?;
        if self.event_buffer == 0 {
            return Err(GuardError::Config("EVENT_BUFFER must be at least 1".into()));
        }
        if self.max_batch == 0 {
            return Err(GuardError::Config("MAX_BATCH must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_positive_duration(key: &str, raw: &str) -> Result<Duration, GuardError> {
    let parsed = parse_duration::parse(raw).map_err(|e| GuardError::Config(format!("invalid {key} {raw:?}: {e}")))?;
    if parsed.is_zero() {
        return Err(GuardError::Config(format!("{key} must be greater than zero")));
    }
    Ok(parsed)
}
