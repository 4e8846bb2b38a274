use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::ledger_client::BalanceSummary;
use crate::models::{Address, TransactionRecord};

pub const WEI_PER_ETH: f64 = 1e18;
pub const WEI_PER_GWEI: f64 = 1e9;
/// Token balances below this (after decimal scaling) count as dust.
pub const DUST_THRESHOLD: f64 = 0.00001;
/// Transaction values are rounded to this many decimals before the value entropy.
pub const VALUE_ENTROPY_DECIMALS: i32 = 5;

const SECONDS_PER_DAY: i64 = 86_400;

/// Column names of the feature table, in `FeatureRecord` field order.
pub const FEATURE_COLUMNS: [&str; 30] = [
    "address",
    "tx_count",
    "balance_eth",
    "unique_token_count",
    "total_token_usd_value",
    "spam_token_count",
    "active_days",
    "avg_tx_per_active_day",
    "contract_interactions",
    "first_tx_timestamp",
    "last_tx_timestamp",
    "wallet_age_days",
    "avg_tx_value_eth",
    "std_tx_value_eth",
    "max_tx_value_eth",
    "min_tx_value_eth",
    "unique_interacted_addresses",
    "tx_time_entropy",
    "tx_value_entropy",
    "gas_spent_total_eth",
    "avg_gas_price_gwei",
    "failed_tx_count",
    "failed_tx_ratio",
    "incoming_tx_count",
    "outgoing_tx_count",
    "self_transfer_count",
    "unique_contract_count",
    "nft_token_count",
    "defi_token_count",
    "dust_balance_count",
];

/// One row of the feature table. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub address: String,
    pub tx_count: u64,
    pub balance_eth: f64,
    pub unique_token_count: u64,
    pub total_token_usd_value: f64,
    pub spam_token_count: u64,
    pub active_days: u64,
    pub avg_tx_per_active_day: f64,
    pub contract_interactions: u64,
    /// Seconds since epoch.
    pub first_tx_timestamp: Option<i64>,
    pub last_tx_timestamp: Option<i64>,
    pub wallet_age_days: u64,
    pub avg_tx_value_eth: f64,
    pub std_tx_value_eth: f64,
    pub max_tx_value_eth: f64,
    pub min_tx_value_eth: f64,
    pub unique_interacted_addresses: u64,
    pub tx_time_entropy: f64,
    pub tx_value_entropy: f64,
    pub gas_spent_total_eth: f64,
    pub avg_gas_price_gwei: f64,
    pub failed_tx_count: u64,
    pub failed_tx_ratio: f64,
    pub incoming_tx_count: u64,
    pub outgoing_tx_count: u64,
    pub self_transfer_count: u64,
    pub unique_contract_count: u64,
    pub nft_token_count: u64,
    pub defi_token_count: u64,
    pub dust_balance_count: u64,
}

impl FeatureRecord {
    /// Full row of defaults for a wallet with no history and no holdings.
    pub fn empty(address: &Address) -> Self {
        Self {
            address: address.to_string(),
            tx_count: 0,
            balance_eth: 0.0,
            unique_token_count: 0,
            total_token_usd_value: 0.0,
            spam_token_count: 0,
            active_days: 0,
            avg_tx_per_active_day: 0.0,
            contract_interactions: 0,
            first_tx_timestamp: None,
            last_tx_timestamp: None,
            wallet_age_days: 0,
            avg_tx_value_eth: 0.0,
            std_tx_value_eth: 0.0,
            max_tx_value_eth: 0.0,
            min_tx_value_eth: 0.0,
            unique_interacted_addresses: 0,
            tx_time_entropy: 0.0,
            tx_value_entropy: 0.0,
            gas_spent_total_eth: 0.0,
            avg_gas_price_gwei: 0.0,
            failed_tx_count: 0,
            failed_tx_ratio: 0.0,
            incoming_tx_count: 0,
            outgoing_tx_count: 0,
            self_transfer_count: 0,
            unique_contract_count: 0,
            nft_token_count: 0,
            defi_token_count: 0,
            dust_balance_count: 0,
        }
    }

    fn apply_balances(&mut self, balances: &BalanceSummary) {
        self.balance_eth = balances.native_balance;
        self.unique_token_count = balances.unique_count;
        self.total_token_usd_value = balances.total_quote_value;
        self.spam_token_count = balances.spam_count;
        self.nft_token_count = balances.tokens.iter().filter(|t| t.supports_nft()).count() as u64;
        self.defi_token_count = balances.tokens.iter().filter(|t| t.is_defi_named()).count() as u64;
        self.dust_balance_count = balances
            .tokens
            .iter()
            .filter(|t| t.scaled_balance() < DUST_THRESHOLD)
            .count() as u64;
    }
}

/// Shannon entropy (base 2) of the empirical distribution of `values`.
/// Equal values collapse into one category; empty input gives 0.
pub fn entropy<K, I>(values: I) -> f64
where
    K: Eq + Hash,
    I: IntoIterator<Item = K>,
{
    let mut counts: HashMap<K, u64> = HashMap::new();
    let mut total = 0u64;
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    let h = -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.log2()
        })
        .sum::<f64>();
    // A single category yields -0.0
    h.max(0.0)
}

/// Rounds half to even, then maps to a hashable key. `-0.0` and `0.0` share a key.
fn rounded_key(value: f64, decimals: i32) -> u64 {
    let scale = 10f64.powi(decimals);
    let rounded = (value * scale).round_ties_even() / scale;
    (rounded + 0.0).to_bits()
}

/// Computes the fixed feature row for one wallet. Pure: no I/O, no clock.
pub fn extract_features(
    address: &Address,
    transactions: &[TransactionRecord],
    balances: &BalanceSummary,
) -> FeatureRecord {
    let mut record = FeatureRecord::empty(address);
    record.apply_balances(balances);

    if transactions.is_empty() {
        return record;
    }

    let tx_count = transactions.len() as u64;
    record.tx_count = tx_count;

    // Timing
    let timestamps: Vec<i64> = transactions.iter().filter_map(TransactionRecord::timestamp).collect();
    if let (Some(&first), Some(&last)) = (timestamps.iter().min(), timestamps.iter().max()) {
        record.first_tx_timestamp = Some(first);
        record.last_tx_timestamp = Some(last);
        record.wallet_age_days = ((last - first) / SECONDS_PER_DAY).max(1) as u64;

        let active_days: HashSet<NaiveDate> = timestamps
            .iter()
            .filter_map(|&ts| DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.date_naive())
            .collect();
        record.active_days = active_days.len() as u64;
        record.avg_tx_per_active_day = if active_days.is_empty() {
            tx_count as f64
        } else {
            tx_count as f64 / active_days.len() as f64
        };
        record.tx_time_entropy = entropy(timestamps.iter().copied());
    }

    // Value distribution
    let values: Vec<f64> = transactions.iter().map(|tx| tx.value_wei() / WEI_PER_ETH).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    record.avg_tx_value_eth = mean;
    record.std_tx_value_eth = variance.sqrt();
    record.max_tx_value_eth = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    record.min_tx_value_eth = values.iter().copied().fold(f64::INFINITY, f64::min);
    record.tx_value_entropy = entropy(values.iter().map(|&v| rounded_key(v, VALUE_ENTROPY_DECIMALS)));

    // Cost
    record.gas_spent_total_eth = transactions
        .iter()
        .filter_map(|tx| tx.gas_spent.filter(|&g| g != 0.0))
        .map(|g| g / WEI_PER_ETH)
        .sum();
    let gas_prices: Vec<f64> = transactions
        .iter()
        .filter_map(|tx| tx.gas_price.filter(|&p| p != 0.0))
        .map(|p| p / WEI_PER_GWEI)
        .collect();
    if !gas_prices.is_empty() {
        record.avg_gas_price_gwei = gas_prices.iter().sum::<f64>() / gas_prices.len() as f64;
    }

    // Counterparties. One-sided transactions are left out of everything below.
    let mut interacted: HashSet<String> = HashSet::new();
    let mut contracts: HashSet<String> = HashSet::new();
    for tx in transactions {
        let Some((from, to)) = tx.counterparties() else {
            continue;
        };

        let sent = address.matches(&from);
        let received = address.matches(&to);
        match (sent, received) {
            (true, true) => record.self_transfer_count += 1,
            (true, false) => record.outgoing_tx_count += 1,
            (false, true) => record.incoming_tx_count += 1,
            (false, false) => {}
        }

        if tx.successful == Some(false) {
            record.failed_tx_count += 1;
        }
        if tx.is_contract_call() {
            record.contract_interactions += 1;
            contracts.insert(to.clone());
        }

        interacted.insert(from);
        interacted.insert(to);
    }
    record.unique_interacted_addresses = interacted.len() as u64;
    record.unique_contract_count = contracts.len() as u64;
    record.failed_tx_ratio = record.failed_tx_count as f64 / tx_count as f64;

    record
}
