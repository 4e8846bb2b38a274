use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::features::{FeatureRecord, FEATURE_COLUMNS};

/// Column holding wallet addresses in the input list.
pub const ADDRESS_COLUMN: &str = "address";

/// Reads the input address list: blank cells dropped, lowercased, first occurrence kept.
/// Validation is left to per-address processing.
pub fn load_addresses(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open address list {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let column = headers
        .iter()
        .position(|h| h.trim() == ADDRESS_COLUMN)
        .with_context(|| {
            format!(
                "Address list {} has no '{}' column",
                path.display(),
                ADDRESS_COLUMN
            )
        })?;

    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Bad row {} in {}", line + 2, path.display()))?;
        let Some(address) = row.get(column).map(|a| a.trim().to_lowercase()) else {
            continue;
        };
        if address.is_empty() {
            continue;
        }
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }

    info!("Loaded {} unique addresses from {}", addresses.len(), path.display());
    Ok(addresses)
}

/// Feature table persisted as CSV and rewritten in full on each save.
pub struct FeatureTable {
    path: PathBuf,
}

impl FeatureTable {
    /// Creates a handle for the table at `path`; nothing is read until `load`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the table location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows from the last completed save, or nothing if the file does not exist yet.
    pub fn load(&self) -> Result<Vec<FeatureRecord>> {
        if !self.path.exists() {
            debug!("No feature table at {}, starting fresh", self.path.display());
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open feature table {}", self.path.display()))?;
        let rows = reader
            .deserialize::<FeatureRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse feature table {}", self.path.display()))?;

        info!("Loaded {} checkpointed rows from {}", rows.len(), self.path.display());
        Ok(rows)
    }

    /// Writes every row to a sibling temp file and renames it over the table,
    /// so an interrupted save leaves the previous table intact.
    pub fn save(&self, rows: &[FeatureRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = self.tmp_path();
        {
            let mut writer = csv::Writer::from_path(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            // serialize() only emits the header alongside the first row
            if rows.is_empty() {
                writer
                    .write_record(FEATURE_COLUMNS)
                    .context("Failed to write table header")?;
            }
            for row in rows {
                writer
                    .serialize(row)
                    .with_context(|| format!("Failed to write row for {}", row.address))?;
            }
            writer
                .flush()
                .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            warn!("Failed to move {} into place: {}", tmp_path.display(), e);
            return Err(e).with_context(|| format!("Failed to replace {}", self.path.display()));
        }

        debug!("Saved {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Lowercased addresses already present in a table.
pub fn checkpointed_addresses(rows: &[FeatureRecord]) -> HashSet<String> {
    rows.iter().map(|r| r.address.trim().to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;
    use tempfile::tempdir;

    fn record(address: &str, tx_count: u64) -> FeatureRecord {
        let mut record = FeatureRecord::empty(&Address::parse(address).unwrap());
        record.tx_count = tx_count;
        record.avg_tx_value_eth = 0.25;
        record.first_tx_timestamp = Some(1_700_000_000);
        record
    }

    #[test]
    fn test_load_addresses_dedups_and_drops_blanks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.csv");
        fs::write(
            &path,
            "label,address\n\
             a,0xAAAAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
             b,\n\
             c,0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
             d,0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n",
        )
        .unwrap();

        let addresses = load_addresses(&path).unwrap();

        assert_eq!(
            addresses,
            vec![
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
                "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
            ]
        );
    }

    #[test]
    fn test_load_addresses_requires_address_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.csv");
        fs::write(&path, "wallet\n0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n").unwrap();

        assert!(load_addresses(&path).is_err());
        assert!(load_addresses(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_missing_table_loads_empty() {
        let dir = tempdir().unwrap();
        let table = FeatureTable::new(dir.path().join("features.csv"));
        assert!(table.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_whole_table() {
        let dir = tempdir().unwrap();
        let table = FeatureTable::new(dir.path().join("out").join("features.csv"));
        let first = record("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 4);
        let second = record("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 0);

        table.save(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(table.load().unwrap(), vec![first.clone(), second]);

        table.save(&[first.clone()]).unwrap();
        assert_eq!(table.load().unwrap(), vec![first]);
        assert!(!table.tmp_path().exists());
    }

    #[test]
    fn test_header_matches_record_fields() {
        let dir = tempdir().unwrap();
        let table = FeatureTable::new(dir.path().join("features.csv"));
        table
            .save(&[record("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1)])
            .unwrap();

        let contents = fs::read_to_string(table.path()).unwrap();
        assert_eq!(contents.lines().next().unwrap(), FEATURE_COLUMNS.join(","));
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = tempdir().unwrap();
        let table = FeatureTable::new(dir.path().join("features.csv"));
        table.save(&[]).unwrap();

        let contents = fs::read_to_string(table.path()).unwrap();
        assert_eq!(contents.trim_end(), FEATURE_COLUMNS.join(","));
        assert!(table.load().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_table_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        fs::write(&path, "address,tx_count\n0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa,not-a-number\n").unwrap();

        assert!(FeatureTable::new(path).load().is_err());
    }

    #[test]
    fn test_checkpointed_addresses_are_case_normalized() {
        let mut row = record("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 1);
        row.address = "0xAAAAaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string();

        let done = checkpointed_addresses(&[row]);

        assert!(done.contains("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
    }
}
