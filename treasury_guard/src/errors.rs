// Error types for guardian operations

#[derive(thiserror::Error, Debug)]
pub enum GuardError {
    #[error("config: {0}")]
    Config(String),

    #[error("chain id mismatch: got {actual} expected {expected}")]
    ChainIdMismatch { actual: u64, expected: u64 },

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("signing: {0}")]
    Signing(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("subscription: {0}")]
    Subscription(String),
}

impl GuardError {
    /// Nodes report a reused nonce only through the error message.
    pub fn is_nonce_too_low(&self) -> bool {
        match self {
            GuardError::Rpc(msg) => msg.to_lowercase().contains("nonce too low"),
            _ => false,
        }
    }
}

impl From<alloy::transports::RpcError<alloy::transports::TransportErrorKind>> for GuardError {
    fn from(e: alloy::transports::RpcError<alloy::transports::TransportErrorKind>) -> Self {
        GuardError::Rpc(e.to_string())
    }
}

impl From<alloy::signers::Error> for GuardError {
    fn from(e: alloy::signers::Error) -> Self {
        GuardError::Signing(e.to_string())
    }
}

impl From<alloy::sol_types::Error> for GuardError {
    fn from(e: alloy::sol_types::Error) -> Self {
        GuardError::Decode(e.to_string())
    }
}

impl From<alloy::dyn_abi::Error> for GuardError {
    fn from(e: alloy::dyn_abi::Error) -> Self {
        GuardError::Decode(e.to_string())
    }
}
