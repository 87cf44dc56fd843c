use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! feature_names {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// The fixed, ordered set of features extracted for every wallet.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum FeatureName {
            $($variant),+
        }

        impl FeatureName {
            pub const ALL: &'static [FeatureName] = &[$(FeatureName::$variant),+];
            pub const COUNT: usize = Self::ALL.len();

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(FeatureName::$variant => $name),+
                }
            }

        }

        impl FromStr for FeatureName {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(FeatureName::$variant),)+
                    _ => Err(format!("unknown feature {:?}", s)),
                }
            }
        }
    };
}

feature_names! {
    WalletAgeDays => "wallet_age_days",
    AccountAgeDays => "account_age_days",
    ActivityCount => "activity_count",
    DaysSinceLastTx => "days_since_last_tx",
    RecencyScore => "recency_score",
    ActiveDays => "active_days",
    ActiveDayRatio => "active_day_ratio",
    MonthsWithTx => "months_with_tx",
    AvgTxPerMonth => "avg_tx_per_month",
    MaxTxInADay => "max_tx_in_a_day",
    MaxInactivityDays => "max_inactivity_days",
    MostActiveWeekday => "most_active_weekday",
    FirstTxWeekday => "first_tx_weekday",
    LastTxWeekday => "last_tx_weekday",
    TotalEthSent => "total_eth_sent",
    TotalEthReceived => "total_eth_received",
    NetEthChange => "net_eth_change",
    LargestTxValue => "largest_tx_value",
    AvgTxValue => "avg_tx_value",
    MedianTxValue => "median_tx_value",
    LargestIncomingTx => "largest_incoming_tx",
    LargestOutgoingTx => "largest_outgoing_tx",
    ZeroValueTxRatio => "zero_value_tx_ratio",
    TxAboveMedianRatio => "tx_above_median_ratio",
    TxValueSkewness => "tx_value_skewness",
    TxValueKurtosis => "tx_value_kurtosis",
    IncomingTxCount => "incoming_tx_count",
    OutgoingTxCount => "outgoing_tx_count",
    IncomingTxShare => "incoming_tx_share",
    InOutTxCountRatio => "in_out_tx_count_ratio",
    UniqueCounterparties => "unique_counterparties",
    CounterpartyDiversity => "counterparty_diversity",
    CounterpartyEntropy => "counterparty_entropy",
    RepeatCounterpartyRate => "repeat_counterparty_rate",
    ContractInteractions => "contract_interactions",
    ContractInteractionRatio => "contract_interaction_ratio",
    ContractDeployments => "contract_deployments",
    ContractDeploymentsToInteractions => "contract_deployments_to_interactions",
    FailedTransactions => "failed_transactions",
    FailedTxRatio => "failed_tx_ratio",
    MaxFailedTxStreak => "max_failed_tx_streak",
    AvgTimeBetweenTxDays => "avg_time_between_tx_days",
    StdTimeBetweenTxDays => "std_time_between_tx_days",
    ShortestTimeBetweenTxSeconds => "shortest_time_between_tx_seconds",
    AutomatedActivity => "automated_activity",
    TotalGasUsed => "total_gas_used",
    AvgGasUsed => "avg_gas_used",
    TotalGasSpentEth => "total_gas_spent_eth",
    MaxGasPriceTxRatio => "max_gas_price_tx_ratio",
    TokenTransferCount => "token_transfer_count",
    DistinctTokens => "distinct_tokens",
    TokenDiversity => "token_diversity",
    TokenInflowCount => "token_inflow_count",
    TokenOutflowCount => "token_outflow_count",
    TxCount6m => "tx_count_6m",
    TotalEthSent6m => "total_eth_sent_6m",
    TotalEthReceived6m => "total_eth_received_6m",
    NetEthChange6m => "net_eth_change_6m",
    LargestTxValue6m => "largest_tx_value_6m",
    AvgTxValue6m => "avg_tx_value_6m",
    FailedTxCount6m => "failed_tx_count_6m",
    UniqueCounterparties6m => "unique_counterparties_6m",
    TxCount12m => "tx_count_12m",
    TotalEthSent12m => "total_eth_sent_12m",
    TotalEthReceived12m => "total_eth_received_12m",
    NetEthChange12m => "net_eth_change_12m",
    LargestTxValue12m => "largest_tx_value_12m",
    AvgTxValue12m => "avg_tx_value_12m",
    FailedTxCount12m => "failed_tx_count_12m",
    UniqueCounterparties12m => "unique_counterparties_12m",
}

impl FeatureName {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    pub name: String,
    pub value: f64,
}

/// Named feature values in a stable order.
///
/// Vectors produced by the extractor always carry every [`FeatureName`] in
/// enumeration order. Vectors built with [`FeatureVector::from_pairs`] are
/// taken as-is and checked by the scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct FeatureVector {
    features: Vec<Feature>,
}

impl FeatureVector {
    pub fn from_values(values: [f64; FeatureName::COUNT]) -> Self {
        let features = FeatureName::ALL
            .iter()
            .zip(values)
            .map(|(name, value)| Feature {
                name: name.as_str().to_string(),
                value,
            })
            .collect();
        Self { features }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let features = pairs
            .into_iter()
            .map(|(name, value)| Feature {
                name: name.into(),
                value,
            })
            .collect();
        Self { features }
    }

    pub fn get(&self, name: FeatureName) -> Option<f64> {
        self.get_by_name(name.as_str())
    }

    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_feature_names_are_unique_and_roundtrip() {
        let names: HashSet<&str> = FeatureName::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(names.len(), FeatureName::COUNT);
        assert!(FeatureName::COUNT >= 50);

        for (i, feature) in FeatureName::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i);
            assert_eq!(feature.as_str().parse::<FeatureName>(), Ok(*feature));
        }
        assert!("no_such_feature".parse::<FeatureName>().is_err());
    }

    #[test]
    fn test_vector_preserves_enumeration_order() {
        let mut values = [0.0; FeatureName::COUNT];
        values[FeatureName::ActivityCount.index()] = 7.0;
        let vector = FeatureVector::from_values(values);

        assert_eq!(vector.len(), FeatureName::COUNT);
        assert_eq!(vector.get(FeatureName::ActivityCount), Some(7.0));
        let order: Vec<&str> = vector.iter().map(|f| f.name.as_str()).collect();
        let expected: Vec<&str> = FeatureName::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(order, expected);
    }
}
