use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{
    FeatureName, FeatureVector, Result, TransactionRecord, TransferDirection,
};

const WEI_PER_ETH: f64 = 1e18;
const SECONDS_PER_DAY: f64 = 86_400.0;
/// Gaps shorter than this between consecutive transactions suggest a bot.
const AUTOMATED_GAP_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorSettings {
    /// Days after which the recency score halves.
    pub recency_half_life_days: f64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            recency_half_life_days: 30.0,
        }
    }
}

impl ExtractorSettings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.recency_half_life_days.is_finite() || self.recency_half_life_days <= 0.0 {
            return Err(format!(
                "recency_half_life_days must be positive, got {}",
                self.recency_half_life_days
            ));
        }
        Ok(())
    }
}

/// Turns a wallet's transaction history into a [`FeatureVector`].
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    settings: ExtractorSettings,
}

struct FeatureBuilder {
    values: [f64; FeatureName::COUNT],
}

impl FeatureBuilder {
    fn new() -> Self {
        Self {
            values: [0.0; FeatureName::COUNT],
        }
    }

    fn set(&mut self, name: FeatureName, value: f64) {
        self.values[name.index()] = if value.is_finite() { value } else { 0.0 };
    }

    fn set_count(&mut self, name: FeatureName, count: usize) {
        self.set(name, count as f64);
    }

    fn set_ratio(&mut self, name: FeatureName, numerator: f64, denominator: f64) {
        self.set(name, clipped_ratio(numerator, denominator));
    }

    fn build(self) -> FeatureVector {
        FeatureVector::from_values(self.values)
    }
}

/// A record paired with its validated timestamp.
struct Timed<'a> {
    time: DateTime<Utc>,
    record: &'a TransactionRecord,
    value_eth: f64,
}

#[derive(Default)]
struct FlowSummary {
    count: usize,
    sent: f64,
    received: f64,
    total: f64,
    largest: f64,
    failed: usize,
    counterparties: HashSet<String>,
}

impl FeatureExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }

    /// Computes every enumerated feature for `wallet` as of `as_of`.
    ///
    /// An empty history yields all zeros. A record violating the gateway
    /// contract fails the whole extraction with `InvalidRecord`.
    pub fn extract(
        &self,
        wallet: &str,
        records: &[TransactionRecord],
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let mut timed = records
            .iter()
            .map(|record| {
                record.validated_time().map(|time| Timed {
                    time,
                    record,
                    value_eth: wei_to_eth(record.value),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut features = FeatureBuilder::new();
        if timed.is_empty() {
            debug!("No transactions for {}, returning zero feature vector", wallet);
            return Ok(features.build());
        }
        timed.sort_by_key(|t| t.time);

        let wallet = wallet.to_ascii_lowercase();
        self.activity_features(&mut features, &timed, as_of);
        value_features(&mut features, &wallet, &timed);
        counterparty_features(&mut features, &wallet, &timed);
        contract_and_failure_features(&mut features, &timed);
        timing_features(&mut features, &timed);
        gas_features(&mut features, &timed);
        token_features(&mut features, &timed);
        window_features(&mut features, &wallet, &timed, as_of);

        debug!("Extracted {} features from {} transactions", FeatureName::COUNT, timed.len());
        Ok(features.build())
    }

    fn activity_features(&self, features: &mut FeatureBuilder, timed: &[Timed], as_of: DateTime<Utc>) {
        let n = timed.len();
        let first = timed[0].time;
        let last = timed[n - 1].time;

        let account_age_days = (last - first).num_days() as f64;
        let days_since_last = (as_of - last).num_days().max(0) as f64;

        features.set(FeatureName::WalletAgeDays, (as_of - first).num_days().max(0) as f64);
        features.set(FeatureName::AccountAgeDays, account_age_days);
        features.set_count(FeatureName::ActivityCount, n);
        features.set(FeatureName::DaysSinceLastTx, days_since_last);
        features.set(
            FeatureName::RecencyScore,
            0.5_f64.powf(days_since_last / self.settings.recency_half_life_days),
        );

        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        let mut months = HashSet::new();
        let mut weekdays = [0usize; 7];
        for t in timed {
            *per_day.entry(t.time.date_naive()).or_insert(0) += 1;
            months.insert((t.time.year(), t.time.month()));
            weekdays[t.time.weekday().num_days_from_monday() as usize] += 1;
        }

        features.set_count(FeatureName::ActiveDays, per_day.len());
        features.set_ratio(
            FeatureName::ActiveDayRatio,
            per_day.len() as f64,
            account_age_days + 1.0,
        );
        features.set_count(FeatureName::MonthsWithTx, months.len());
        features.set(
            FeatureName::AvgTxPerMonth,
            n as f64 / (account_age_days / 30.0).max(1.0),
        );
        features.set_count(
            FeatureName::MaxTxInADay,
            per_day.values().copied().max().unwrap_or(0),
        );

        let longest_gap = gaps_in_seconds(timed).into_iter().fold(0.0, f64::max);
        features.set(FeatureName::MaxInactivityDays, (longest_gap / SECONDS_PER_DAY).floor());

        // First index of the maximum, so ties resolve to the earliest weekday.
        let busiest = weekdays
            .iter()
            .enumerate()
            .fold((0, 0), |best, (day, &count)| if count > best.1 { (day, count) } else { best });
        features.set(FeatureName::MostActiveWeekday, busiest.0 as f64);
        features.set(FeatureName::FirstTxWeekday, first.weekday().num_days_from_monday() as f64);
        features.set(FeatureName::LastTxWeekday, last.weekday().num_days_from_monday() as f64);
    }
}

fn value_features(features: &mut FeatureBuilder, wallet: &str, timed: &[Timed]) {
    let n = timed.len() as f64;
    let values: Vec<f64> = timed.iter().map(|t| t.value_eth).collect();

    let flows = flow_summary(wallet, timed.iter());
    let largest_incoming = timed
        .iter()
        .filter(|t| t.record.is_incoming(wallet))
        .map(|t| t.value_eth)
        .fold(0.0, f64::max);
    let largest_outgoing = timed
        .iter()
        .filter(|t| t.record.is_outgoing(wallet))
        .map(|t| t.value_eth)
        .fold(0.0, f64::max);

    let mean = values.iter().sum::<f64>() / n;
    let median = median(&values);

    features.set(FeatureName::TotalEthSent, flows.sent);
    features.set(FeatureName::TotalEthReceived, flows.received);
    features.set(FeatureName::NetEthChange, flows.received - flows.sent);
    features.set(FeatureName::LargestTxValue, values.iter().copied().fold(0.0, f64::max));
    features.set(FeatureName::AvgTxValue, mean);
    features.set(FeatureName::MedianTxValue, median);
    features.set(FeatureName::LargestIncomingTx, largest_incoming);
    features.set(FeatureName::LargestOutgoingTx, largest_outgoing);
    features.set_ratio(
        FeatureName::ZeroValueTxRatio,
        values.iter().filter(|v| **v == 0.0).count() as f64,
        n,
    );
    features.set_ratio(
        FeatureName::TxAboveMedianRatio,
        values.iter().filter(|v| **v > median).count() as f64,
        n,
    );
    features.set(FeatureName::TxValueSkewness, skewness(&values));
    features.set(FeatureName::TxValueKurtosis, kurtosis(&values));

    let incoming = timed.iter().filter(|t| t.record.is_incoming(wallet)).count();
    let outgoing = timed.iter().filter(|t| t.record.is_outgoing(wallet)).count();
    features.set_count(FeatureName::IncomingTxCount, incoming);
    features.set_count(FeatureName::OutgoingTxCount, outgoing);
    features.set_ratio(FeatureName::IncomingTxShare, incoming as f64, n);
    // Unclipped: a wallet that mostly receives scores above 1.
    features.set(FeatureName::InOutTxCountRatio, incoming as f64 / outgoing.max(1) as f64);
}

fn counterparty_features(features: &mut FeatureBuilder, wallet: &str, timed: &[Timed]) {
    let n = timed.len() as f64;

    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut total_occurrences = 0usize;
    for t in timed {
        if let Some(counterparty) = counterparty_of(wallet, t.record, true) {
            *occurrences.entry(counterparty).or_insert(0) += 1;
            total_occurrences += 1;
        }
        if let Some(counterparty) = counterparty_of(wallet, t.record, false) {
            *occurrences.entry(counterparty).or_insert(0) += 1;
            total_occurrences += 1;
        }
    }

    // Entropy weighs each counterparty by how many transactions touch it.
    let mut touches: HashMap<String, usize> = HashMap::new();
    for t in timed {
        let from = t.record.from.to_ascii_lowercase();
        let to = t.record.to.as_deref().map(str::to_ascii_lowercase);
        if occurrences.contains_key(&from) {
            *touches.entry(from.clone()).or_insert(0) += 1;
        }
        if let Some(to) = to.filter(|to| *to != from && occurrences.contains_key(to)) {
            *touches.entry(to).or_insert(0) += 1;
        }
    }
    let total_touches: usize = touches.values().sum();
    let entropy = if total_touches > 0 {
        touches
            .values()
            .map(|&c| {
                let p = c as f64 / total_touches as f64;
                -p * p.log2()
            })
            .sum()
    } else {
        0.0
    };

    let repeated: usize = occurrences.values().filter(|&&c| c > 1).sum();

    features.set_count(FeatureName::UniqueCounterparties, occurrences.len());
    features.set_ratio(FeatureName::CounterpartyDiversity, occurrences.len() as f64, n);
    features.set(FeatureName::CounterpartyEntropy, entropy);
    features.set_ratio(
        FeatureName::RepeatCounterpartyRate,
        repeated as f64,
        total_occurrences as f64,
    );
}

fn contract_and_failure_features(features: &mut FeatureBuilder, timed: &[Timed]) {
    let n = timed.len() as f64;
    let interactions = timed.iter().filter(|t| t.record.is_contract_call).count();
    let deployments = timed.iter().filter(|t| t.record.is_contract_creation()).count();
    let failed = timed.iter().filter(|t| t.record.is_error).count();

    let mut longest_streak = 0usize;
    let mut streak = 0usize;
    for t in timed {
        if t.record.is_error {
            streak += 1;
            longest_streak = longest_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    features.set_count(FeatureName::ContractInteractions, interactions);
    features.set_ratio(FeatureName::ContractInteractionRatio, interactions as f64, n);
    features.set_count(FeatureName::ContractDeployments, deployments);
    features.set_ratio(
        FeatureName::ContractDeploymentsToInteractions,
        deployments as f64,
        interactions as f64,
    );
    features.set_count(FeatureName::FailedTransactions, failed);
    features.set_ratio(FeatureName::FailedTxRatio, failed as f64, n);
    features.set_count(FeatureName::MaxFailedTxStreak, longest_streak);
}

fn timing_features(features: &mut FeatureBuilder, timed: &[Timed]) {
    let gaps = gaps_in_seconds(timed);
    if gaps.is_empty() {
        return;
    }

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let std = if gaps.len() >= 2 {
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / (gaps.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };
    let shortest = gaps.iter().copied().fold(f64::INFINITY, f64::min);

    features.set(FeatureName::AvgTimeBetweenTxDays, mean / SECONDS_PER_DAY);
    features.set(FeatureName::StdTimeBetweenTxDays, std / SECONDS_PER_DAY);
    features.set(FeatureName::ShortestTimeBetweenTxSeconds, shortest);
    features.set(
        FeatureName::AutomatedActivity,
        if shortest < AUTOMATED_GAP_SECONDS { 1.0 } else { 0.0 },
    );
}

fn gas_features(features: &mut FeatureBuilder, timed: &[Timed]) {
    let n = timed.len() as f64;
    let total_gas: u128 = timed.iter().map(|t| t.record.gas_used as u128).sum();
    let spent_wei: u128 = timed
        .iter()
        .map(|t| (t.record.gas_used as u128).saturating_mul(t.record.gas_price as u128))
        .fold(0u128, |acc, wei| acc.saturating_add(wei));
    let max_price = timed.iter().map(|t| t.record.gas_price).max().unwrap_or(0);
    let at_max_price = if max_price > 0 {
        timed.iter().filter(|t| t.record.gas_price == max_price).count()
    } else {
        0
    };

    features.set(FeatureName::TotalGasUsed, total_gas as f64);
    features.set(FeatureName::AvgGasUsed, total_gas as f64 / n);
    features.set(FeatureName::TotalGasSpentEth, spent_wei as f64 / WEI_PER_ETH);
    features.set_ratio(FeatureName::MaxGasPriceTxRatio, at_max_price as f64, n);
}

fn token_features(features: &mut FeatureBuilder, timed: &[Timed]) {
    let transfers: Vec<_> = timed
        .iter()
        .flat_map(|t| t.record.token_transfers.iter())
        .collect();
    let distinct: HashSet<String> = transfers
        .iter()
        .map(|transfer| transfer.token_id.to_ascii_lowercase())
        .collect();
    let inflow = transfers
        .iter()
        .filter(|transfer| transfer.direction == TransferDirection::In)
        .count();

    features.set_count(FeatureName::TokenTransferCount, transfers.len());
    features.set_count(FeatureName::DistinctTokens, distinct.len());
    features.set_ratio(
        FeatureName::TokenDiversity,
        distinct.len() as f64,
        transfers.len() as f64,
    );
    features.set_count(FeatureName::TokenInflowCount, inflow);
    features.set_count(FeatureName::TokenOutflowCount, transfers.len() - inflow);
}

fn window_features(features: &mut FeatureBuilder, wallet: &str, timed: &[Timed], as_of: DateTime<Utc>) {
    let windows = [
        (
            6,
            [
                FeatureName::TxCount6m,
                FeatureName::TotalEthSent6m,
                FeatureName::TotalEthReceived6m,
                FeatureName::NetEthChange6m,
                FeatureName::LargestTxValue6m,
                FeatureName::AvgTxValue6m,
                FeatureName::FailedTxCount6m,
                FeatureName::UniqueCounterparties6m,
            ],
        ),
        (
            12,
            [
                FeatureName::TxCount12m,
                FeatureName::TotalEthSent12m,
                FeatureName::TotalEthReceived12m,
                FeatureName::NetEthChange12m,
                FeatureName::LargestTxValue12m,
                FeatureName::AvgTxValue12m,
                FeatureName::FailedTxCount12m,
                FeatureName::UniqueCounterparties12m,
            ],
        ),
    ];

    for (months, [count, sent, received, net, largest, average, failed, counterparties]) in windows {
        let cutoff = as_of
            .checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let flows = flow_summary(wallet, timed.iter().filter(|t| t.time >= cutoff));

        features.set_count(count, flows.count);
        features.set(sent, flows.sent);
        features.set(received, flows.received);
        features.set(net, flows.received - flows.sent);
        features.set(largest, flows.largest);
        features.set(average, if flows.count > 0 { flows.total / flows.count as f64 } else { 0.0 });
        features.set_count(failed, flows.failed);
        features.set_count(counterparties, flows.counterparties.len());
    }
}

fn flow_summary<'a, 'r: 'a>(wallet: &str, timed: impl Iterator<Item = &'a Timed<'r>>) -> FlowSummary {
    let mut summary = FlowSummary::default();
    for t in timed {
        summary.count += 1;
        summary.total += t.value_eth;
        summary.largest = summary.largest.max(t.value_eth);
        if t.record.is_outgoing(wallet) {
            summary.sent += t.value_eth;
        }
        if t.record.is_incoming(wallet) {
            summary.received += t.value_eth;
        }
        if t.record.is_error {
            summary.failed += 1;
        }
        summary.counterparties.extend(counterparty_of(wallet, t.record, true));
        summary.counterparties.extend(counterparty_of(wallet, t.record, false));
    }
    summary
}

/// The other side of a transfer: the recipient of an outgoing transaction or
/// the sender of an incoming one.
fn counterparty_of(wallet: &str, record: &TransactionRecord, outgoing: bool) -> Option<String> {
    if outgoing {
        if record.is_outgoing(wallet) {
            return record.to.as_deref().map(str::to_ascii_lowercase);
        }
    } else if record.is_incoming(wallet) {
        return Some(record.from.to_ascii_lowercase());
    }
    None
}

fn gaps_in_seconds(timed: &[Timed]) -> Vec<f64> {
    timed
        .windows(2)
        .map(|pair| (pair[1].time - pair[0].time).num_seconds() as f64)
        .collect()
}

fn wei_to_eth(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0) / WEI_PER_ETH
}

fn clipped_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Central moments (m2, m3, m4) around the mean, or `None` when the sample
/// has no spread.
fn central_moments(values: &[f64]) -> Option<(f64, f64, f64)> {
    let n = values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() || min == max {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n;
    let (m2, m3, m4) = values.iter().fold((0.0, 0.0, 0.0), |(m2, m3, m4), v| {
        let d = v - mean;
        (m2 + d * d, m3 + d * d * d, m4 + d * d * d * d)
    });
    Some((m2 / n, m3 / n, m4 / n))
}

/// Adjusted Fisher-Pearson sample skewness.
fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 3 {
        return 0.0;
    }
    match central_moments(values) {
        Some((m2, m3, _)) => {
            let g1 = m3 / m2.powf(1.5);
            g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
        }
        None => 0.0,
    }
}

/// Unbiased sample excess kurtosis.
fn kurtosis(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 4 {
        return 0.0;
    }
    match central_moments(values) {
        Some((m2, _, m4)) => {
            let g2 = m4 / (m2 * m2) - 3.0;
            ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
        }
        None => 0.0,
    }
}
