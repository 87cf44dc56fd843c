use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chains::ChainDataGateway;
use crate::config::GatewaySettings;
use crate::models::{
    CreditScoreError, Result, TokenTransfer, TransactionPage, TransactionRecord, TransferDirection,
};

/// Etherscan caps `page * offset` for list endpoints.
const MAX_TOKEN_TRANSFERS: usize = 10_000;
/// Open upper bound for block ranges.
const LATEST_BLOCK: u64 = 99_999_999;

/// Chain data gateway over the Etherscan v2 account API.
pub struct EtherscanGateway {
    http_client: reqwest::Client,
    settings: GatewaySettings,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    block_number: String,
    time_stamp: String,
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(default)]
    gas_used: String,
    #[serde(default)]
    gas_price: String,
    #[serde(default)]
    is_error: String,
    #[serde(default)]
    input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenTransfer {
    time_stamp: String,
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    contract_address: String,
}

impl EtherscanGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CreditScoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    async fn call_api<T: DeserializeOwned>(&self, params: &[(&str, String)]) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![("chainid", self.settings.chain_id.to_string())];
        query.extend(params.iter().cloned());
        if let Some(key) = &self.settings.api_key {
            query.push(("apikey", key.clone()));
        }

        let response = self
            .http_client
            .get(&self.settings.base_url)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CreditScoreError::GatewayUnavailable(format!(
                "Etherscan HTTP {}",
                status
            )));
        }

        let body: ApiResponse = response.json().await.map_err(|e| {
            CreditScoreError::GatewayUnavailable(format!("Failed to parse response: {}", e))
        })?;
        parse_envelope(body)
    }

    async fn fetch_token_transfers(
        &self,
        address: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<RawTokenTransfer>> {
        self.call_api(&[
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("address", address.to_string()),
            ("startblock", start_block.to_string()),
            ("endblock", end_block.to_string()),
            ("page", "1".to_string()),
            ("offset", MAX_TOKEN_TRANSFERS.to_string()),
            ("sort", "asc".to_string()),
        ])
        .await
    }
}

#[async_trait]
impl ChainDataGateway for EtherscanGateway {
    /// Pages are cut between blocks, and the cursor is the first block of the
    /// next page. Token transfers are fetched for exactly the page's block
    /// range, so each transfer lands on one page only.
    async fn fetch_transactions(&self, address: &str, cursor: Option<String>) -> Result<TransactionPage> {
        let start_block = match cursor.as_deref() {
            None => 0,
            Some(c) => c
                .parse::<u64>()
                .map_err(|_| CreditScoreError::Internal(format!("Invalid block cursor: {}", c)))?,
        };
        debug!("Fetching transactions for {} from block {}", address, start_block);

        let raw: Vec<RawTransaction> = self
            .call_api(&[
                ("module", "account".to_string()),
                ("action", "txlist".to_string()),
                ("address", address.to_string()),
                ("startblock", start_block.to_string()),
                ("endblock", LATEST_BLOCK.to_string()),
                ("page", "1".to_string()),
                ("offset", self.settings.page_size.to_string()),
                ("sort", "asc".to_string()),
            ])
            .await?;

        let full = raw.len() >= self.settings.page_size;
        let mut page = raw.into_iter().map(to_record).collect::<Result<Vec<_>>>()?;
        let (end_block, next_cursor) = if full {
            close_page(&mut page)
        } else {
            (LATEST_BLOCK, None)
        };

        let transfers = self.fetch_token_transfers(address, start_block, end_block).await?;
        if transfers.len() >= MAX_TOKEN_TRANSFERS {
            warn!(
                "Token transfers for {} in blocks {}..={} hit the {} result cap",
                address, start_block, end_block, MAX_TOKEN_TRANSFERS
            );
        }
        let records = page.into_iter().map(|(_, record)| record).collect();
        let records = merge_token_transfers(records, transfers, address)?;

        info!(
            "Fetched {} transactions for {} (blocks {}..={})",
            records.len(),
            address,
            start_block,
            end_block
        );
        Ok(TransactionPage {
            records,
            next_cursor,
        })
    }
}

/// Trims a full page back to its last complete block and returns the page's
/// final block with the cursor for the next one. The dropped tail is fetched
/// again at the start of the next page.
fn close_page(page: &mut Vec<(u64, TransactionRecord)>) -> (u64, Option<String>) {
    let Some(&(last, _)) = page.last() else {
        return (LATEST_BLOCK, None);
    };
    let complete = page.partition_point(|(block, _)| *block < last);
    if complete == 0 {
        warn!(
            "Block {} alone fills a page; transactions beyond the page size are skipped",
            last
        );
        return (last, Some((last + 1).to_string()));
    }
    page.truncate(complete);
    (last - 1, Some(last.to_string()))
}

fn parse_envelope<T: DeserializeOwned>(body: ApiResponse) -> Result<Vec<T>> {
    if body.status != "1" {
        let empty_list = body.result.as_array().map(|r| r.is_empty()).unwrap_or(false);
        let no_records = body.message.contains("No transactions found")
            || body.message.contains("No records found");
        if empty_list || no_records {
            return Ok(Vec::new());
        }
        let detail = body.result.as_str().unwrap_or_default();
        return Err(CreditScoreError::GatewayUnavailable(format!(
            "Etherscan API error: {} {}",
            body.message, detail
        )));
    }

    serde_json::from_value(body.result).map_err(|e| {
        CreditScoreError::GatewayUnavailable(format!("Unexpected Etherscan response format: {}", e))
    })
}

fn parse_number<T: FromStr>(hash: &str, field: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| CreditScoreError::invalid_record(hash, format!("unparseable {} {:?}", field, raw)))
}

/// Blank numeric fields default to zero.
fn parse_optional_number<T: FromStr + Default>(hash: &str, field: &str, raw: &str) -> Result<T> {
    if raw.is_empty() {
        Ok(T::default())
    } else {
        parse_number(hash, field, raw)
    }
}

/// Parses a non-negative integer amount in base units. Amounts beyond the
/// range of `Decimal` saturate at `Decimal::MAX`.
fn parse_amount(hash: &str, field: &str, raw: &str) -> Result<Decimal> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CreditScoreError::invalid_record(
            hash,
            format!("unparseable {} {:?}", field, raw),
        ));
    }
    match Decimal::from_str(raw) {
        Ok(amount) => Ok(amount),
        Err(_) => {
            debug!("{} {} of {} exceeds decimal range, saturating", field, raw, hash);
            Ok(Decimal::MAX)
        }
    }
}

fn to_record(tx: RawTransaction) -> Result<(u64, TransactionRecord)> {
    let block: u64 = parse_number(&tx.hash, "blockNumber", &tx.block_number)?;
    let timestamp: i64 = parse_number(&tx.hash, "timeStamp", &tx.time_stamp)?;
    let value = parse_amount(&tx.hash, "value", &tx.value)?;
    let gas_used = parse_optional_number(&tx.hash, "gasUsed", &tx.gas_used)?;
    let gas_price = parse_optional_number(&tx.hash, "gasPrice", &tx.gas_price)?;

    let record = TransactionRecord {
        timestamp,
        from: tx.from.to_ascii_lowercase(),
        to: (!tx.to.is_empty()).then(|| tx.to.to_ascii_lowercase()),
        value,
        gas_used,
        gas_price,
        is_contract_call: tx.input.len() > 2,
        is_error: tx.is_error == "1",
        token_transfers: Vec::new(),
        hash: tx.hash,
    };
    Ok((block, record))
}

/// Attaches token transfers to the page's records by transaction hash.
///
/// Transfers sent by someone else's transaction never show up in the
/// wallet's own transaction list. Those become zero-value contract-call
/// records so that incoming tokens still count. Transfers not touching the
/// wallet are ignored.
fn merge_token_transfers(
    mut records: Vec<TransactionRecord>,
    transfers: Vec<RawTokenTransfer>,
    wallet: &str,
) -> Result<Vec<TransactionRecord>> {
    let mut index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.hash.to_ascii_lowercase(), i))
        .collect();

    for transfer in transfers {
        let direction = if transfer.to.eq_ignore_ascii_case(wallet) {
            TransferDirection::In
        } else if transfer.from.eq_ignore_ascii_case(wallet) {
            TransferDirection::Out
        } else {
            continue;
        };
        let token_transfer = TokenTransfer {
            token_id: transfer.contract_address.to_ascii_lowercase(),
            amount: parse_amount(&transfer.hash, "token amount", &transfer.value)?,
            direction,
        };

        let key = transfer.hash.to_ascii_lowercase();
        let i = match index.get(&key) {
            Some(&i) => i,
            None => {
                records.push(token_only_record(&transfer)?);
                index.insert(key, records.len() - 1);
                records.len() - 1
            }
        };
        records[i].token_transfers.push(token_transfer);
    }

    records.sort_by_key(|r| r.timestamp);
    Ok(records)
}

fn token_only_record(transfer: &RawTokenTransfer) -> Result<TransactionRecord> {
    Ok(TransactionRecord {
        hash: transfer.hash.clone(),
        timestamp: parse_number(&transfer.hash, "timeStamp", &transfer.time_stamp)?,
        from: transfer.from.to_ascii_lowercase(),
        to: Some(transfer.contract_address.to_ascii_lowercase()),
        value: Decimal::ZERO,
        gas_used: 0,
        gas_price: 0,
        is_contract_call: true,
        is_error: false,
        token_transfers: Vec::new(),
    })
}
