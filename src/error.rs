use thiserror::Error;

/// Result type alias for the settlement pipeline
pub type SettlementResult<T> = Result<T, SettlementError>;

/// Tagged error taxonomy for the settlement pipeline.
///
/// Classification is by kind only; callers never pattern-match on free
/// text. Transient kinds are retried, everything else is terminal for the
/// intent (including `Unknown`, which stays conservative).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("nonce too low: chain expects {current_nonce}, transaction carried {tx_nonce}")]
    NonceTooLow {
        current_nonce: i64,
        tx_nonce: i64,
        address: String,
    },

    #[error("replacement fee too low: current gas price {current_gas_price:?}, tx gas price {tx_gas_price:?}")]
    ReplacementFeeTooLow {
        tx_hash: Option<String>,
        current_gas_price: Option<u128>,
        tx_gas_price: Option<u128>,
    },

    #[error("network error: {message}")]
    Network {
        message: String,
        code: Option<String>,
    },

    #[error("execution reverted: {reason}")]
    ExecutionReverted {
        reason: String,
        data: Option<String>,
    },

    #[error("insufficient funds (address {address}): required {required}, actual {actual}")]
    InsufficientFunds {
        address: String,
        required: String,
        actual: String,
    },

    #[error("validation failed on {field}: {message}")]
    Validation { message: String, field: String },

    #[error("store error during {operation}: {message}")]
    Store { message: String, operation: String },

    #[error("unclassified settlement error: {cause}")]
    Unknown { cause: String },
}

impl SettlementError {
    /// Whether retrying can succeed without external intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SettlementError::NonceTooLow { .. }
                | SettlementError::ReplacementFeeTooLow { .. }
                | SettlementError::Network { .. }
        )
    }

    pub fn store(operation: &str, source: impl std::fmt::Display) -> Self {
        SettlementError::Store {
            message: source.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        SettlementError::Validation {
            message: message.into(),
            field: field.to_string(),
        }
    }
}

/// Sentinel used when a nonce cannot be recovered from an error message.
pub const UNKNOWN_NONCE: i64 = -1;

/// Maps an arbitrary RPC failure onto the settlement taxonomy.
///
/// Routing is a case-insensitive substring match on the error message plus
/// a normalized error code where the transport exposes one. Anything that
/// matches nothing stays `Unknown`.
pub fn parse_rpc_error(message: &str, code: Option<&str>) -> SettlementError {
    let msg = message.to_lowercase();
    let code = code.map(|c| c.to_lowercase());
    let code_is = |needle: &str| code.as_deref() == Some(needle);

    if msg.contains("nonce too low") || code_is("nonce_too_low") {
        let numbers = extract_integers(message);
        return SettlementError::NonceTooLow {
            current_nonce: numbers.first().copied().unwrap_or(UNKNOWN_NONCE),
            tx_nonce: numbers.get(1).copied().unwrap_or(UNKNOWN_NONCE),
            address: String::new(),
        };
    }

    if msg.contains("replacement fee too low")
        || msg.contains("gas price too low")
        || code_is("replacement_underpriced")
    {
        let numbers = extract_integers(message);
        return SettlementError::ReplacementFeeTooLow {
            tx_hash: extract_hex_token(message),
            current_gas_price: numbers.first().map(|n| *n as u128),
            tx_gas_price: numbers.get(1).map(|n| *n as u128),
        };
    }

    if msg.contains("insufficient funds") || msg.contains("insufficient balance") {
        let numbers = extract_integers(message);
        return SettlementError::InsufficientFunds {
            address: extract_hex_token(message).unwrap_or_default(),
            required: numbers.get(1).map(|n| n.to_string()).unwrap_or_default(),
            actual: numbers.first().map(|n| n.to_string()).unwrap_or_default(),
        };
    }

    if msg.contains("execution reverted") || msg.contains("reverted") {
        return SettlementError::ExecutionReverted {
            reason: message.trim().to_string(),
            data: None,
        };
    }

    if msg.contains("network") || msg.contains("enotfound") || msg.contains("econnrefused") {
        return SettlementError::Network {
            message: message.trim().to_string(),
            code,
        };
    }

    SettlementError::Unknown {
        cause: message.trim().to_string(),
    }
}

/// Pulls decimal integers out of an error message, skipping hex tokens
/// such as addresses and transaction hashes.
fn extract_integers(message: &str) -> Vec<i64> {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .filter(|token| token.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|token| token.parse::<i64>().ok())
        .collect()
}

/// Best-effort extraction of the first 0x-prefixed token in a message.
fn extract_hex_token(message: &str) -> Option<String> {
    message
        .split(|c: char| {
            c.is_whitespace() || c == ',' || c == ':' || c == ';' || c == '(' || c == ')'
        })
        .find(|token| token.len() > 2 && token.starts_with("0x"))
        .map(|token| token.to_string())
}
