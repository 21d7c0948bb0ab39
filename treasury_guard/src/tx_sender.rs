use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use tracing::{debug, warn};

use crate::errors::GuardError;
use crate::rpc::ChainRpc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeeMode {
    Dynamic,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeeQuote {
    Dynamic { max_fee_per_gas: u128, max_priority_fee_per_gas: u128 },
    Legacy { gas_price: u128 },
}

impl FeeQuote {
    fn mode(&self) -> FeeMode {
        match self {
            FeeQuote::Dynamic { .. } => FeeMode::Dynamic,
            FeeQuote::Legacy { .. } => FeeMode::Legacy,
        }
    }
}

/// `max(gas_price, 2 * tip)`, or `2 * tip` when the gas price is unknown.
fn dynamic_fee_cap(gas_price: Option<u128>, tip: u128) -> u128 {
    let doubled = tip.saturating_mul(2);
    gas_price.map_or(doubled, |price| price.max(doubled))
}

/// Signs and submits zero-value calls to a single contract.
pub struct TxSender {
    rpc: Arc<dyn ChainRpc>,
    chain_id: u64,
    to: Address,
}

impl TxSender {
    pub fn new(rpc: Arc<dyn ChainRpc>, chain_id: u64, to: Address) -> Self {
        Self { rpc, chain_id, to }
    }

    /// Sends `input` signed by `signer`.
    ///
    /// Prefers an EIP-1559 transaction and falls back to a legacy one when the
    /// node cannot quote a priority fee. A "nonce too low" rejection is retried
    /// exactly once with a fresh nonce and fresh fees in the same fee mode.
    pub async fn send(&self, signer: &PrivateKeySigner, input: Bytes, gas_limit: u64) -> Result<B256, GuardError> {
        let from = signer.address();
        let nonce = self.rpc.pending_nonce(from).await?;
        let quote = self.initial_quote().await?;

        match self.sign_and_send(signer, nonce, quote, input.clone(), gas_limit).await {
            Err(err) if err.is_nonce_too_low() => {
                let nonce = self.rpc.pending_nonce(from).await?;
                warn!(%from, nonce, error = %err, "nonce too low, resubmitting once");
                let quote = self.quote(quote.mode()).await?;
                self.sign_and_send(signer, nonce, quote, input, gas_limit).await
            }
            result => result,
        }
    }

    async fn initial_quote(&self) -> Result<FeeQuote, GuardError> {
        match self.dynamic_quote().await {
            Ok(quote) => Ok(quote),
            Err(err) => {
                debug!(error = %err, "priority fee unavailable, using legacy pricing");
                self.quote(FeeMode::Legacy).await
            }
        }
    }

    async fn quote(&self, mode: FeeMode) -> Result<FeeQuote, GuardError> {
        match mode {
            FeeMode::Dynamic => self.dynamic_quote().await,
            FeeMode::Legacy => Ok(FeeQuote::Legacy { gas_price: self.rpc.gas_price().await? }),
        }
    }

    async fn dynamic_quote(&self) -> Result<FeeQuote, GuardError> {
        let tip = self.rpc.max_priority_fee().await?;
        let gas_price = self.rpc.gas_price().await.ok();
        Ok(FeeQuote::Dynamic {
            max_fee_per_gas: dynamic_fee_cap(gas_price, tip),
            max_priority_fee_per_gas: tip,
        })
    }

    async fn sign_and_send(
        &self,
        signer: &PrivateKeySigner,
        nonce: u64,
        quote: FeeQuote,
        input: Bytes,
        gas_limit: u64,
    ) -> Result<B256, GuardError> {
        let raw = self.sign(signer, nonce, quote, input, gas_limit)?;
        self.rpc.send_raw_transaction(raw).await
    }

    fn sign(
        &self,
        signer: &PrivateKeySigner,
        nonce: u64,
        quote: FeeQuote,
        input: Bytes,
        gas_limit: u64,
    ) -> Result<Bytes, GuardError> {
        let envelope: TxEnvelope = match quote {
            FeeQuote::Dynamic { max_fee_per_gas, max_priority_fee_per_gas } => {
                let mut tx = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce,
                    gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: TxKind::Call(self.to),
                    value: U256::ZERO,
                    access_list: Default::default(),
                    input,
                };
                let sig = signer.sign_transaction_sync(&mut tx)?;
                tx.into_signed(sig).into()
            }
            FeeQuote::Legacy { gas_price } => {
                let mut tx = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce,
                    gas_price,
                    gas_limit,
                    to: TxKind::Call(self.to),
                    value: U256::ZERO,
                    input,
                };
                let sig = signer.sign_transaction_sync(&mut tx)?;
                tx.into_signed(sig).into()
            }
        };
        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use alloy::consensus::Transaction;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::{address, b256};

    use super::*;
    use crate::rpc::MockChainRpc;

    const CONTRACT: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const GWEI: u128 = 1_000_000_000;
    const TX_HASH: B256 = b256!("00000000000000000000000000000000000000000000000000000000000000aa");

    fn signer() -> PrivateKeySigner {
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".parse().unwrap()
    }

    fn decode(raw: &Bytes) -> TxEnvelope {
        TxEnvelope::decode_2718(&mut &raw[..]).unwrap()
    }

    fn capture_sends(rpc: &mut MockChainRpc, sent: Arc<Mutex<Vec<Bytes>>>, fail_first: bool) {
        let calls = AtomicUsize::new(0);
        rpc.expect_send_raw_transaction().returning(move |raw| {
            sent.lock().unwrap().push(raw);
            if fail_first && calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GuardError::Rpc("server returned an error response: error code -32000: Nonce too low".into()))
            } else {
                Ok(TX_HASH)
            }
        });
    }

    #[test]
    fn test_dynamic_fee_cap() {
        assert_eq!(dynamic_fee_cap(Some(30 * GWEI), 2 * GWEI), 30 * GWEI);
        assert_eq!(dynamic_fee_cap(Some(GWEI), 2 * GWEI), 4 * GWEI);
        assert_eq!(dynamic_fee_cap(None, 2 * GWEI), 4 * GWEI);
        assert_eq!(dynamic_fee_cap(None, u128::MAX), u128::MAX);
    }

    #[tokio::test]
    async fn test_sends_dynamic_fee_tx() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce().times(1).returning(|_| Ok(7));
        rpc.expect_max_priority_fee().returning(|| Ok(2 * GWEI));
        rpc.expect_gas_price().returning(|| Ok(30 * GWEI));
        capture_sends(&mut rpc, sent.clone(), false);

        let sender = TxSender::new(Arc::new(rpc), 31337, CONTRACT);
        let hash = sender.send(&signer(), Bytes::from_static(&[1, 2, 3, 4]), 120_000).await.unwrap();
        assert_eq!(hash, TX_HASH);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let tx = decode(&sent[0]);
        assert!(matches!(tx, TxEnvelope::Eip1559(_)));
        assert_eq!(tx.chain_id(), Some(31337));
        assert_eq!(tx.nonce(), 7);
        assert_eq!(tx.gas_limit(), 120_000);
        assert_eq!(tx.max_fee_per_gas(), 30 * GWEI);
        assert_eq!(tx.max_priority_fee_per_gas(), Some(2 * GWEI));
        assert_eq!(tx.to(), Some(CONTRACT));
        assert_eq!(tx.value(), U256::ZERO);
        assert_eq!(&tx.input()[..], &[1u8, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_falls_back_to_legacy() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce().returning(|_| Ok(0));
        rpc.expect_max_priority_fee()
            .returning(|| Err(GuardError::Rpc("method eth_maxPriorityFeePerGas not found".into())));
        rpc.expect_gas_price().returning(|| Ok(5 * GWEI));
        capture_sends(&mut rpc, sent.clone(), false);

        let sender = TxSender::new(Arc::new(rpc), 1, CONTRACT);
        sender.send(&signer(), Bytes::new(), 800_000).await.unwrap();

        let tx = decode(&sent.lock().unwrap()[0]);
        assert!(matches!(tx, TxEnvelope::Legacy(_)));
        assert_eq!(tx.chain_id(), Some(1));
        assert_eq!(tx.gas_price(), Some(5 * GWEI));
        assert_eq!(tx.gas_limit(), 800_000);
    }

    #[tokio::test]
    async fn test_retries_once_on_nonce_too_low() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let nonces = AtomicUsize::new(0);
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce()
            .times(2)
            .returning(move |_| Ok(5 + nonces.fetch_add(1, Ordering::SeqCst) as u64));
        rpc.expect_max_priority_fee().returning(|| Ok(GWEI));
        rpc.expect_gas_price().returning(|| Ok(10 * GWEI));
        capture_sends(&mut rpc, sent.clone(), true);

        let sender = TxSender::new(Arc::new(rpc), 31337, CONTRACT);
        let hash = sender.send(&signer(), Bytes::from_static(&[9]), 120_000).await.unwrap();
        assert_eq!(hash, TX_HASH);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let (first, second) = (decode(&sent[0]), decode(&sent[1]));
        assert_eq!(first.nonce(), 5);
        assert_eq!(second.nonce(), 6);
        assert!(matches!(second, TxEnvelope::Eip1559(_)));
    }

    #[tokio::test]
    async fn test_retry_keeps_legacy_mode() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce().times(2).returning(|_| Ok(3));
        rpc.expect_max_priority_fee()
            .times(1)
            .returning(|| Err(GuardError::Rpc("unsupported".into())));
        rpc.expect_gas_price().returning(|| Ok(GWEI));
        capture_sends(&mut rpc, sent.clone(), true);

        let sender = TxSender::new(Arc::new(rpc), 31337, CONTRACT);
        sender.send(&signer(), Bytes::new(), 120_000).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(decode(&sent[1]), TxEnvelope::Legacy(_)));
    }

    #[tokio::test]
    async fn test_second_nonce_too_low_is_returned() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce().times(2).returning(|_| Ok(1));
        rpc.expect_max_priority_fee().returning(|| Ok(GWEI));
        rpc.expect_gas_price().returning(|| Ok(GWEI));
        rpc.expect_send_raw_transaction()
            .times(2)
            .returning(|_| Err(GuardError::Rpc("nonce too low".into())));

        let sender = TxSender::new(Arc::new(rpc), 31337, CONTRACT);
        let err = sender.send(&signer(), Bytes::new(), 120_000).await.unwrap_err();
        assert!(err.is_nonce_too_low());
    }

    #[tokio::test]
    async fn test_other_send_errors_are_not_retried() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce().times(1).returning(|_| Ok(1));
        rpc.expect_max_priority_fee().returning(|| Ok(GWEI));
        rpc.expect_gas_price().returning(|| Ok(GWEI));
        rpc.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(GuardError::Rpc("insufficient funds".into())));

        let sender = TxSender::new(Arc::new(rpc), 31337, CONTRACT);
        assert!(matches!(
            sender.send(&signer(), Bytes::new(), 120_000).await,
            Err(GuardError::Rpc(msg)) if msg == "insufficient funds"
        ));
    }
}
