use alloy::dyn_abi::DynSolValue;
use alloy::primitives::Address;

/// Narrows a decoded ABI integer to `u64`.
///
/// Unsigned values of any width are accepted when they fit. Signed values are
/// accepted only when non-negative and in range. Anything else (negative
/// integers, oversized integers, non-integer values) yields `None`.
pub fn as_u64(value: &DynSolValue) -> Option<u64> {
    match value {
        DynSolValue::Uint(v, _) => u64::try_from(*v).ok(),
        DynSolValue::Int(v, _) => {
            if v.is_negative() {
                return None;
            }
            u64::try_from(v.into_raw()).ok()
        }
        _ => None,
    }
}

pub fn as_u8(value: &DynSolValue) -> Option<u8> {
    as_u64(value).and_then(|v| u8::try_from(v).ok())
}

pub fn as_address(value: &DynSolValue) -> Option<Address> {
    value.as_address()
}
