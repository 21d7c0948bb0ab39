use alloy::eips::BlockNumberOrTag;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use crate::errors::GuardError;

/// The raw JSON-RPC calls the guardian needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, GuardError>;

    /// Timestamp of the latest block, in seconds.
    async fn latest_timestamp(&self) -> Result<u64, GuardError>;

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, GuardError>;

    async fn pending_nonce(&self, address: Address) -> Result<u64, GuardError>;

    async fn max_priority_fee(&self) -> Result<u128, GuardError>;

    async fn gas_price(&self) -> Result<u128, GuardError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, GuardError>;
}

pub struct AlloyRpc {
    provider: DynProvider,
}

impl AlloyRpc {
    pub async fn connect(rpc_url: &str) -> Result<Self, GuardError> {
        // Nonce, fees and signing are handled by the tx sender.
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect(rpc_url)
            .await?
            .erased();
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainRpc for AlloyRpc {
    async fn chain_id(&self) -> Result<u64, GuardError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn latest_timestamp(&self) -> Result<u64, GuardError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| GuardError::Rpc("latest block not found".into()))?;
        Ok(block.header.timestamp)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, GuardError> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        Ok(self.provider.call(tx).await?)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, GuardError> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn max_priority_fee(&self) -> Result<u128, GuardError> {
        Ok(self.provider.get_max_priority_fee_per_gas().await?)
    }

    async fn gas_price(&self) -> Result<u128, GuardError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, GuardError> {
        let pending = self.provider.send_raw_transaction(&raw).await?;
        Ok(*pending.tx_hash())
    }
}
