use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::error::AddressError;

/// Canonical wallet address: `0x` followed by 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub const LEN: usize = 42;

    /// Trims, lowercases and validates an address string.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AddressError::Empty);
        }
        let Some(digits) = normalized.strip_prefix("0x") else {
            return Err(AddressError::MissingPrefix(normalized));
        };
        if normalized.len() != Self::LEN {
            let len = normalized.len();
            return Err(AddressError::BadLength {
                address: normalized,
                len,
            });
        }
        if hex::decode(digits).is_err() {
            return Err(AddressError::NotHex(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw counterparty string.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope shared by every ledger API response: `{"data": {"items": [...], "pagination": {...}}}`.
#[derive(Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub data: Option<ApiData<T>>,
}

#[derive(Deserialize, Debug)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiData<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_as_empty")]
    pub items: Vec<T>,
    pub pagination: Option<Pagination>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Pagination {
    #[serde(default)]
    pub has_more: Option<bool>,
}

/// One historical transaction touching the wallet, as returned by `transactions_v3`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TransactionRecord {
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_address: Option<String>,
    #[serde(default)]
    pub to_address_label: Option<String>,
    /// Wei.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub block_signed_at_ts: Option<i64>,
    #[serde(default)]
    pub block_signed_at: Option<String>,
    #[serde(default)]
    pub successful: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub gas_spent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub gas_price: Option<f64>,
}

impl TransactionRecord {
    /// Seconds since epoch, preferring the numeric field over the RFC 3339 one.
    /// Zero and unparsable timestamps count as missing.
    pub fn timestamp(&self) -> Option<i64> {
        let ts = self.block_signed_at_ts.or_else(|| {
            self.block_signed_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.timestamp())
        })?;
        (ts > 0).then_some(ts)
    }

    pub fn value_wei(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    /// Both counterparties, or `None` when either side is absent or blank.
    pub fn counterparties(&self) -> Option<(String, String)> {
        let from = self.from_address.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let to = self.to_address.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((from.to_lowercase(), to.to_lowercase()))
    }

    pub fn is_contract_call(&self) -> bool {
        self.to_address_label.as_deref() == Some("Contract")
    }
}

/// One balance entry from `balances_v2`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TokenHolding {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_spam: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub quote: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub contract_decimals: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub balance: Option<f64>,
    #[serde(default)]
    pub contract_name: Option<String>,
    #[serde(default)]
    pub supports_erc721: Option<bool>,
    #[serde(default)]
    pub supports_erc: Option<Vec<String>>,
    #[serde(default)]
    pub native_token: Option<bool>,
}

impl TokenHolding {
    pub const DEFAULT_DECIMALS: i64 = 18;

    /// Holding typed as a fungible `cryptocurrency`
    pub fn is_cryptocurrency(&self) -> bool {
        self.kind.as_deref() == Some("cryptocurrency")
    }

    /// Flagged as spam by the service; unknown counts as not spam
    pub fn is_spam(&self) -> bool {
        self.is_spam.unwrap_or(false)
    }

    /// The chain's native asset
    pub fn is_native(&self) -> bool {
        self.native_token.unwrap_or(false)
    }

    /// Advertises ERC-721 support, either flag or interface list
    pub fn supports_nft(&self) -> bool {
        self.supports_erc721.unwrap_or(false)
            || self
                .supports_erc
                .as_ref()
                .is_some_and(|ercs| ercs.iter().any(|e| e.eq_ignore_ascii_case("erc721")))
    }

    /// Contract name contains "defi", any case
    pub fn is_defi_named(&self) -> bool {
        self.contract_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains("defi"))
    }

    /// Balance divided by `10^contract_decimals`. Decimals outside the `i32`
    /// range saturate, so the result goes to zero or infinity instead of wrapping.
    pub fn scaled_balance(&self) -> f64 {
        let decimals = self.contract_decimals.unwrap_or(Self::DEFAULT_DECIMALS);
        let exponent = i32::try_from(decimals).unwrap_or(if decimals < 0 { i32::MIN } else { i32::MAX });
        self.balance.unwrap_or(0.0) / 10f64.powi(exponent)
    }
}

// The API sends big integers as strings and occasionally as numbers or null.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?.map(|v| v as i64))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
