use thiserror::Error;

/// Failure of a single request against the ledger-history API.
///
/// Client errors (4xx) and server errors (5xx) are not distinguished: every
/// variant consumes one retry attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

/// Rejection reasons for a wallet address string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address {0} is missing the 0x prefix")]
    MissingPrefix(String),

    #[error("address {address} has length {len}, expected 42")]
    BadLength { address: String, len: usize },

    #[error("address {0} is not valid hex")]
    NotHex(String),
}
