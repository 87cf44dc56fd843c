use crate::models::{CreditScoreError, Result};

pub const ADDRESS_LENGTH: usize = 42;

/// Validates an Ethereum address and returns it in lowercase form.
///
/// Accepts `0x`/`0X`-prefixed, 40-hex-digit input in any letter case;
/// surrounding whitespace is ignored.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if trimmed.len() != ADDRESS_LENGTH || !(trimmed.starts_with("0x") || trimmed.starts_with("0X")) {
        return Err(CreditScoreError::InvalidAddress(format!(
            "expected a 42-character hex string starting with 0x, got {:?}",
            address
        )));
    }

    let without_prefix = &trimmed[2..];
    hex::decode(without_prefix).map_err(|_| {
        CreditScoreError::InvalidAddress(format!("Invalid hex in address: {}", address))
    })?;

    Ok(format!("0x{}", without_prefix.to_ascii_lowercase()))
}
