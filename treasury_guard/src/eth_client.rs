use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cfg::Cfg;
use crate::contract::{
    approve_calldata, decode_request, execute_batch_calldata, requests_calldata, RequestState, APPROVE_GAS_LIMIT,
    EXECUTE_BATCH_GAS_LIMIT,
};
use crate::errors::GuardError;
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::subscriber::{self, EventStreams, SubscriptionSettings};
use crate::tx_sender::TxSender;

/// Everything the watcher needs from the chain.
#[async_trait]
pub trait GuardClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, GuardError>;

    /// Latest block timestamp; the clock readiness is judged against.
    async fn chain_time(&self) -> Result<u64, GuardError>;

    async fn get_request(&self, id: u64) -> Result<RequestState, GuardError>;

    async fn approve(&self, id: u64) -> Result<B256, GuardError>;

    async fn execute_batch(&self, ids: &[u64], gas_floor: u64) -> Result<B256, GuardError>;

    fn subscribe_request_created(&self, cancel: CancellationToken) -> EventStreams;
}

pub struct EthClient {
    rpc: Arc<dyn ChainRpc>,
    sender: TxSender,
    contract: Address,
    guardian: PrivateKeySigner,
    executor: PrivateKeySigner,
    subscription: SubscriptionSettings,
}

impl EthClient {
    /// Connects the HTTP RPC and dials `WS_URL` once. An unreachable
    /// WebSocket endpoint is a startup error.
    pub async fn new(cfg: &Cfg) -> Result<Self, GuardError> {
        let rpc = Arc::new(AlloyRpc::connect(&cfg.rpc_url).await?);
        let client = Self::with_rpc(rpc, cfg)?;
        subscriber::dial(&cfg.ws_url).await?;
        debug!(ws_url = %cfg.ws_url, "websocket endpoint reachable");
        Ok(client)
    }

    pub fn with_rpc(rpc: Arc<dyn ChainRpc>, cfg: &Cfg) -> Result<Self, GuardError> {
        if cfg.contract_address == Address::ZERO {
            return Err(GuardError::Config("CONTRACT_ADDRESS must not be the zero address".into()));
        }
        Ok(Self {
            sender: TxSender::new(rpc.clone(), cfg.chain_id, cfg.contract_address),
            rpc,
            contract: cfg.contract_address,
            guardian: cfg.guardian_key.clone(),
            executor: cfg.executor_key.clone(),
            subscription: SubscriptionSettings {
                ws_url: cfg.ws_url.clone(),
                contract: cfg.contract_address,
                event_buffer: cfg.event_buffer,
                resubscribe_delay: cfg.resubscribe_delay()?,
            },
        })
    }
}

#[async_trait]
impl GuardClient for EthClient {
    async fn chain_id(&self) -> Result<u64, GuardError> {
        self.rpc.chain_id().await
    }

    async fn chain_time(&self) -> Result<u64, GuardError> {
        self.rpc.latest_timestamp().await
    }

    async fn get_request(&self, id: u64) -> Result<RequestState, GuardError> {
        let output = self.rpc.call(self.contract, requests_calldata(id)).await?;
        decode_request(&output)
    }

    async fn approve(&self, id: u64) -> Result<B256, GuardError> {
        debug!(id, guardian = %self.guardian.address(), "sending approve");
        self.sender.send(&self.guardian, approve_calldata(id), APPROVE_GAS_LIMIT).await
    }

    async fn execute_batch(&self, ids: &[u64], gas_floor: u64) -> Result<B256, GuardError> {
        debug!(?ids, gas_floor, executor = %self.executor.address(), "sending executeBatch");
        self.sender
            .send(&self.executor, execute_batch_calldata(ids, gas_floor), EXECUTE_BATCH_GAS_LIMIT)
            .await
    }

    fn subscribe_request_created(&self, cancel: CancellationToken) -> EventStreams {
        subscriber::spawn(self.subscription.clone(), cancel)
    }
}
