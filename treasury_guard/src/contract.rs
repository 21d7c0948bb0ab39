use std::sync::LazyLock;

use abi_util::{as_address, as_u64, as_u8};
use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::sol;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes, U256};

use crate::errors::GuardError;

sol! {
    interface ITreasuryGuard {
        #[derive(Debug, PartialEq, Eq)]
        event RequestCreated(
            uint256 indexed id,
            address indexed token,
            address indexed to,
            uint256 amount,
            uint256 approvalsNeeded,
            address createdBy,
            uint64 earliestExec
        );

        function approve(uint256 id) external;

        function executeBatch(uint256[] ids, uint256 gasFloor) external;

        function requests(uint256 requestId) external view returns (
            uint256 id,
            address token,
            address to,
            uint256 amount,
            address createdBy,
            uint256 approvals,
            uint256 approvalsNeeded,
            uint64 createdAt,
            uint64 earliestExec,
            uint64 expiresAt,
            uint8 status
        );
    }
}

pub use ITreasuryGuard::RequestCreated;

pub const APPROVE_GAS_LIMIT: u64 = 120_000;
pub const EXECUTE_BATCH_GAS_LIMIT: u64 = 800_000;

const REQUEST_FIELDS: usize = 11;

static REQUEST_TUPLE: LazyLock<DynSolType> = LazyLock::new(|| {
    DynSolType::Tuple(vec![
        DynSolType::Uint(256),
        DynSolType::Address,
        DynSolType::Address,
        DynSolType::Uint(256),
        DynSolType::Address,
        DynSolType::Uint(256),
        DynSolType::Uint(256),
        DynSolType::Uint(64),
        DynSolType::Uint(64),
        DynSolType::Uint(64),
        DynSolType::Uint(8),
    ])
});

/// On-chain request record as returned by the `requests(uint256)` view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestState {
    pub id: u64,
    pub token: Address,
    pub to: Address,
    pub amount: U256,
    pub created_by: Address,
    pub approvals: u64,
    pub approvals_needed: u64,
    pub created_at: u64,
    pub earliest_exec: u64,
    pub expires_at: u64,
    pub status: u8,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        self.status != 0
    }
}

pub fn approve_calldata(id: u64) -> Bytes {
    ITreasuryGuard::approveCall { id: U256::from(id) }.abi_encode().into()
}

pub fn execute_batch_calldata(ids: &[u64], gas_floor: u64) -> Bytes {
    ITreasuryGuard::executeBatchCall {
        ids: ids.iter().map(|id| U256::from(*id)).collect(),
        gasFloor: U256::from(gas_floor),
    }
    .abi_encode()
    .into()
}

pub fn requests_calldata(id: u64) -> Bytes {
    ITreasuryGuard::requestsCall { requestId: U256::from(id) }.abi_encode().into()
}

/// Decodes the return data of `requests(uint256)`.
///
/// Every integer field is range-checked: counters and timestamps must fit in
/// `u64` and the status in `u8`.
pub fn decode_request(data: &[u8]) -> Result<RequestState, GuardError> {
    let decoded = REQUEST_TUPLE.abi_decode_params(data)?;
    let DynSolValue::Tuple(fields) = decoded else {
        return Err(GuardError::Decode("requests() did not return a tuple".into()));
    };
    if fields.len() != REQUEST_FIELDS {
        return Err(GuardError::Decode(format!(
            "unexpected request fields: got {} expected {}",
            fields.len(),
            REQUEST_FIELDS
        )));
    }

    let int = |idx: usize, name: &str| {
        as_u64(&fields[idx]).ok_or_else(|| GuardError::Decode(format!("invalid {name} value")))
    };
    let addr = |idx: usize, name: &str| {
        as_address(&fields[idx]).ok_or_else(|| GuardError::Decode(format!("invalid {name} value")))
    };

    let amount = fields[3]
        .as_uint()
        .map(|(v, _)| v)
        .ok_or_else(|| GuardError::Decode("invalid amount value".into()))?;
    let status = as_u8(&fields[10]).ok_or_else(|| GuardError::Decode("invalid status value".into()))?;

    Ok(RequestState {
        id: int(0, "id")?,
        token: addr(1, "token")?,
        to: addr(2, "to")?,
        amount,
        created_by: addr(4, "createdBy")?,
        approvals: int(5, "approvals")?,
        approvals_needed: int(6, "approvalsNeeded")?,
        created_at: int(7, "createdAt")?,
        earliest_exec: int(8, "earliestExec")?,
        expires_at: int(9, "expiresAt")?,
        status,
    })
}

/// Test-side counterpart of [`decode_request`].
#[cfg(test)]
pub fn encode_request(req: &RequestState) -> Vec<u8> {
    DynSolValue::Tuple(vec![
        DynSolValue::Uint(U256::from(req.id), 256),
        DynSolValue::Address(req.token),
        DynSolValue::Address(req.to),
        DynSolValue::Uint(req.amount, 256),
        DynSolValue::Address(req.created_by),
        DynSolValue::Uint(U256::from(req.approvals), 256),
        DynSolValue::Uint(U256::from(req.approvals_needed), 256),
        DynSolValue::Uint(U256::from(req.created_at), 64),
        DynSolValue::Uint(U256::from(req.earliest_exec), 64),
        DynSolValue::Uint(U256::from(req.expires_at), 64),
        DynSolValue::Uint(U256::from(req.status), 8),
    ])
    .abi_encode_params()
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, B256};
    use alloy::sol_types::SolEvent;

    use super::*;

    fn sample_request() -> RequestState {
        RequestState {
            id: 1,
            token: address!("1111111111111111111111111111111111111111"),
            to: address!("2222222222222222222222222222222222222222"),
            amount: U256::from(42u64),
            created_by: address!("3333333333333333333333333333333333333333"),
            approvals: 1,
            approvals_needed: 1,
            created_at: 50,
            earliest_exec: 100,
            expires_at: 1000,
            status: 0,
        }
    }

    #[test]
    fn test_decode_request() {
        let req = sample_request();
        let decoded = decode_request(&encode_request(&req)).unwrap();
        assert_eq!(decoded, req);
        assert!(!decoded.is_terminal());
    }

    #[test]
    fn test_decode_request_rejects_short_data() {
        let data = encode_request(&sample_request());
        let result = decode_request(&data[..data.len() - 32]);
        assert!(matches!(result, Err(GuardError::Decode(_))));
    }

    #[test]
    fn test_decode_request_rejects_counter_out_of_range() {
        let mut data = encode_request(&sample_request());
        // approvals lives in the sixth word; set a bit above 2^64.
        let word = 5 * 32;
        data[word + 23] = 1;
        let result = decode_request(&data);
        assert!(matches!(result, Err(GuardError::Decode(_))));
    }

    #[test]
    fn test_decode_request_rejects_timestamp_out_of_range() {
        let mut data = encode_request(&sample_request());
        // earliestExec is declared uint64; any high-order byte is out of domain.
        let word = 8 * 32;
        data[word] = 0xff;
        let result = decode_request(&data);
        assert!(matches!(result, Err(GuardError::Decode(_))));
    }

    #[test]
    fn test_request_created_log_round_trip() {
        let event = RequestCreated {
            id: U256::from(1u64),
            token: address!("1111111111111111111111111111111111111111"),
            to: address!("2222222222222222222222222222222222222222"),
            amount: U256::from(42u64),
            approvalsNeeded: U256::from(1u64),
            createdBy: address!("3333333333333333333333333333333333333333"),
            earliestExec: 100,
        };

        let log_data = event.encode_log_data();
        assert_eq!(log_data.topics().len(), 4);
        assert_eq!(log_data.topics()[0], RequestCreated::SIGNATURE_HASH);
        assert_eq!(log_data.topics()[1], B256::from(U256::from(1u64)));

        let decoded = RequestCreated::decode_log_data(&log_data).unwrap();
        assert_eq!(decoded, event);

        let reencoded = decoded.encode_log_data();
        assert_eq!(reencoded.topics(), log_data.topics());
        assert_eq!(reencoded.data, log_data.data);
    }

    #[test]
    fn test_request_created_signature() {
        assert_eq!(
            RequestCreated::SIGNATURE,
            "RequestCreated(uint256,address,address,uint256,uint256,address,uint64)"
        );
    }

    #[test]
    fn test_calldata_selectors() {
        assert_eq!(&approve_calldata(7)[..4], ITreasuryGuard::approveCall::SELECTOR.as_slice());
        assert_eq!(
            &execute_batch_calldata(&[1, 2], 50_000)[..4],
            ITreasuryGuard::executeBatchCall::SELECTOR.as_slice()
        );
        assert_eq!(&requests_calldata(1)[..4], ITreasuryGuard::requestsCall::SELECTOR.as_slice());
        assert_eq!(ITreasuryGuard::executeBatchCall::SIGNATURE, "executeBatch(uint256[],uint256)");
    }

    #[test]
    fn test_execute_batch_calldata_decodes() {
        let data = execute_batch_calldata(&[3, 9], 50_000);
        let call = ITreasuryGuard::executeBatchCall::abi_decode(&data).unwrap();
        assert_eq!(call.ids, vec![U256::from(3u64), U256::from(9u64)]);
        assert_eq!(call.gasFloor, U256::from(50_000u64));
    }
}
