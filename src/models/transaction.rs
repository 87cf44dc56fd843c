use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use chrono::{DateTime, Utc};

use crate::models::{CreditScoreError, Result};

/// Direction of a token transfer relative to the scored wallet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenTransfer {
    /// Token contract address (or any stable token identifier).
    pub token_id: String,
    /// Raw token amount in the token's smallest unit.
    pub amount: Decimal,
    pub direction: TransferDirection,
}

/// A normalized transaction as delivered by the chain data gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub hash: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub from: String,
    /// `None` for contract creation transactions.
    pub to: Option<String>,
    /// Value in wei.
    pub value: Decimal,
    pub gas_used: u64,
    /// Gas price in wei.
    #[serde(default)]
    pub gas_price: u64,
    pub is_contract_call: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
}

impl TransactionRecord {
    /// Checks the gateway contract for this record and returns its timestamp.
    pub fn validated_time(&self) -> Result<DateTime<Utc>> {
        if self.timestamp <= 0 {
            return Err(CreditScoreError::invalid_record(
                &self.hash,
                format!("non-positive timestamp {}", self.timestamp),
            ));
        }
        let time = DateTime::<Utc>::from_timestamp(self.timestamp, 0).ok_or_else(|| {
            CreditScoreError::invalid_record(
                &self.hash,
                format!("timestamp {} out of range", self.timestamp),
            )
        })?;

        if self.value.is_sign_negative() && !self.value.is_zero() {
            return Err(CreditScoreError::invalid_record(
                &self.hash,
                format!("negative value {}", self.value),
            ));
        }

        if let Some(transfer) = self
            .token_transfers
            .iter()
            .find(|t| t.amount.is_sign_negative() && !t.amount.is_zero())
        {
            return Err(CreditScoreError::invalid_record(
                &self.hash,
                format!("negative amount {} for token {}", transfer.amount, transfer.token_id),
            ));
        }

        Ok(time)
    }

    pub fn is_outgoing(&self, wallet: &str) -> bool {
        self.from.eq_ignore_ascii_case(wallet)
    }

    pub fn is_incoming(&self, wallet: &str) -> bool {
        self.to
            .as_deref()
            .map(|to| to.eq_ignore_ascii_case(wallet))
            .unwrap_or(false)
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// One page of gateway results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionPage {
    pub records: Vec<TransactionRecord>,
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: i64, value: i64) -> TransactionRecord {
        TransactionRecord {
            hash: "0xabc".to_string(),
            timestamp,
            from: "0x1".to_string(),
            to: Some("0x2".to_string()),
            value: Decimal::from(value),
            gas_used: 21_000,
            gas_price: 1,
            is_contract_call: false,
            is_error: false,
            token_transfers: Vec::new(),
        }
    }

    #[test]
    fn test_valid_record_passes() {
        let time = record(1_609_459_200, 5).validated_time().unwrap();
        assert_eq!(time.timestamp(), 1_609_459_200);
    }

    #[test]
    fn test_malformed_timestamp_rejected() {
        let err = record(0, 5).validated_time().unwrap_err();
        assert!(matches!(err, CreditScoreError::InvalidRecord { .. }));

        let err = record(i64::MAX, 5).validated_time().unwrap_err();
        assert!(matches!(err, CreditScoreError::InvalidRecord { .. }));
    }

    #[test]
    fn test_negative_value_rejected() {
        let err = record(1_609_459_200, -1).validated_time().unwrap_err();
        assert_eq!(
            err,
            CreditScoreError::invalid_record("0xabc", "negative value -1")
        );
    }

    #[test]
    fn test_negative_token_amount_rejected() {
        let mut tx = record(1_609_459_200, 0);
        tx.token_transfers.push(TokenTransfer {
            token_id: "0xtoken".to_string(),
            amount: Decimal::from(-3),
            direction: TransferDirection::In,
        });
        assert!(tx.validated_time().is_err());
    }

    #[test]
    fn test_direction_is_case_insensitive() {
        let tx = record(1_609_459_200, 1);
        assert!(tx.is_outgoing("0x1"));
        assert!(tx.is_incoming("0X2"));
        assert!(!tx.is_contract_creation());
    }
}
