use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::holding::{canonical_id, round_amount, HoldingRecord};
use crate::store::storage::Storage;

pub mod storage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} is already in the portfolio")]
    AlreadyExists(String),
    #[error("{0} is not in the portfolio")]
    NotFound(String),
    #[error("invalid invested amount : {0}")]
    InvalidAmount(String),
    #[error("failed to persist the portfolio : {0}")]
    Persistence(anyhow::Error),
}

/// Sole owner of the holding sequence and its durable representation.
/// Every mutation rewrites the full blob; rejections leave both the
/// in-memory sequence and the blob untouched.
pub struct PortfolioStore<S> {
    storage: S,
    records: Vec<HoldingRecord>,
}

impl<S: Storage> PortfolioStore<S> {
    /// Loads persisted state. A missing blob is a normal condition and a
    /// corrupt one is recovered by starting empty, never by failing.
    pub fn open(storage: S) -> Self {
        let records = match storage.load() {
            Ok(Some(blob)) => parse_blob(&blob),
            Ok(None) => vec![],
            Err(err) => {
                warn!("Could not read stored portfolio, starting empty : {}", err);
                vec![]
            }
        };
        Self { storage, records }
    }

    pub fn records(&self) -> &[HoldingRecord] {
        &self.records
    }

    pub fn get(&self, coin_id: &str) -> Option<&HoldingRecord> {
        let coin_id = canonical_id(coin_id);
        self.records.iter().find(|record| record.coin_id == coin_id)
    }

    pub fn contains(&self, coin_id: &str) -> bool {
        self.get(coin_id).is_some()
    }

    pub fn add(
        &mut self,
        coin_id: &str,
        quote_currency: &str,
        invested_amount: Decimal,
    ) -> Result<(), StoreError> {
        if invested_amount < Decimal::ZERO {
            return Err(StoreError::InvalidAmount(invested_amount.to_string()));
        }
        let record = HoldingRecord::new(coin_id, quote_currency, invested_amount);
        if self.contains(&record.coin_id) {
            return Err(StoreError::AlreadyExists(record.coin_id));
        }
        let mut records = self.records.clone();
        records.push(record);
        self.commit(records)
    }

    pub fn remove(&mut self, coin_id: &str) -> Result<(), StoreError> {
        let coin_id = canonical_id(coin_id);
        if !self.contains(&coin_id) {
            return Err(StoreError::NotFound(coin_id));
        }
        let records = self
            .records
            .iter()
            .filter(|record| record.coin_id != coin_id)
            .cloned()
            .collect();
        self.commit(records)
    }

    /// Zero is only ever a creation default. An explicit update must be a
    /// positive amount; anything else is rejected with the prior value kept.
    pub fn update_invested_amount(
        &mut self,
        coin_id: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::InvalidAmount(amount.to_string()));
        }
        let coin_id = canonical_id(coin_id);
        let mut records = self.records.clone();
        let record = records
            .iter_mut()
            .find(|record| record.coin_id == coin_id)
            .ok_or(StoreError::NotFound(coin_id))?;
        record.invested_amount = round_amount(amount);
        self.commit(records)
    }

    pub fn update_currency(
        &mut self,
        coin_id: &str,
        quote_currency: &str,
    ) -> Result<(), StoreError> {
        let coin_id = canonical_id(coin_id);
        let quote_currency = canonical_id(quote_currency);
        let mut records = self.records.clone();
        let record = records
            .iter_mut()
            .find(|record| record.coin_id == coin_id)
            .ok_or(StoreError::NotFound(coin_id))?;
        if record.quote_currency == quote_currency {
            return Ok(());
        }
        record.quote_currency = quote_currency;
        self.commit(records)
    }

    /// Always recomputed from the live sequence. Amounts are clamped at
    /// zero so a corrupt entry cannot drive the total negative.
    pub fn sum_invested(&self) -> Decimal {
        self.records.iter().fold(Decimal::ZERO, |acc, record| {
            acc + record.invested_amount.max(Decimal::ZERO)
        })
    }

    fn commit(&mut self, records: Vec<HoldingRecord>) -> Result<(), StoreError> {
        let blob = serde_json::ser::to_string(&records)
            .map_err(|err| StoreError::Persistence(err.into()))?;
        self.storage.save(&blob).map_err(StoreError::Persistence)?;
        self.records = records;
        Ok(())
    }
}

fn parse_blob(blob: &str) -> Vec<HoldingRecord> {
    let values: Vec<Value> = match serde_json::de::from_str(blob) {
        Ok(values) => values,
        Err(err) => {
            warn!("Stored portfolio is corrupt, starting empty : {}", err);
            return vec![];
        }
    };

    let mut records: Vec<HoldingRecord> = Vec::with_capacity(values.len());
    for value in values {
        let record = match serde_json::from_value::<HoldingRecord>(value) {
            Ok(record) => record.sanitized(),
            Err(err) => {
                warn!("Dropping unreadable portfolio entry : {}", err);
                continue;
            }
        };
        let Some(record) = record else {
            warn!("Dropping portfolio entry without a coin id");
            continue;
        };
        if records.iter().any(|known| known.coin_id == record.coin_id) {
            warn!("Dropping duplicate portfolio entry : {}", record.coin_id);
            continue;
        }
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::storage::MemoryStorage;
    use super::*;
    use rust_decimal_macros::dec;

    fn empty_store() -> PortfolioStore<MemoryStorage> {
        PortfolioStore::open(MemoryStorage::default())
    }

    #[test]
    fn test_add_defaults_to_zero_invested() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", Decimal::ZERO).unwrap();

        assert_eq!(
            store.records(),
            [HoldingRecord::new("bitcoin", "usd", Decimal::ZERO)]
        );
    }

    #[test]
    fn test_add_rejects_duplicate_coin_even_under_other_currency() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", Decimal::ZERO).unwrap();

        let err = store.add("bitcoin", "eur", Decimal::ZERO).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_remove_missing_coin() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", Decimal::ZERO).unwrap();

        let err = store.remove("ethereum").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.records().len(), 1);
    }

    #[test]
    fn test_update_invested_amount_rounds_to_two_decimals() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", dec!(100)).unwrap();

        store.update_invested_amount("bitcoin", dec!(250.5)).unwrap();
        assert_eq!(store.get("bitcoin").unwrap().invested_amount, dec!(250.50));
        assert_eq!(store.sum_invested(), dec!(250.5));
    }

    #[test]
    fn test_update_invested_amount_rejects_non_positive() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", dec!(100)).unwrap();

        for amount in [Decimal::ZERO, dec!(-5)] {
            let err = store.update_invested_amount("bitcoin", amount).unwrap_err();
            assert!(matches!(err, StoreError::InvalidAmount(_)));
            assert_eq!(store.get("bitcoin").unwrap().invested_amount, dec!(100));
        }
    }

    #[test]
    fn test_update_currency_is_idempotent() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", Decimal::ZERO).unwrap();

        store.update_currency("bitcoin", "usd").unwrap();
        store.update_currency("bitcoin", "eur").unwrap();
        assert_eq!(store.get("bitcoin").unwrap().quote_currency, "eur");

        let err = store.update_currency("dogecoin", "usd").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_sum_is_recomputed_after_every_mutation() {
        let mut store = empty_store();
        store.add("bitcoin", "usd", dec!(100)).unwrap();
        store.add("ethereum", "usd", dec!(50)).unwrap();
        assert_eq!(store.sum_invested(), dec!(150));

        store.update_invested_amount("ethereum", dec!(75)).unwrap();
        assert_eq!(store.sum_invested(), dec!(175));

        store.remove("bitcoin").unwrap();
        assert_eq!(store.sum_invested(), dec!(75));
    }

    #[test]
    fn test_round_trip_through_shared_storage() {
        let storage = MemoryStorage::default();
        let mut store = PortfolioStore::open(storage.clone());
        store.add("bitcoin", "usd", dec!(100)).unwrap();
        store.add("ethereum", "eur", Decimal::ZERO).unwrap();
        store.update_invested_amount("bitcoin", dec!(250.5)).unwrap();

        let reloaded = PortfolioStore::open(storage);
        assert_eq!(reloaded.records(), store.records());
    }

    #[test]
    fn test_corrupt_blob_recovers_as_empty() {
        let storage = MemoryStorage::default();
        storage.save("not json at all").unwrap();

        let store = PortfolioStore::open(storage);
        assert!(store.records().is_empty());
        assert_eq!(store.sum_invested(), Decimal::ZERO);
    }

    #[test]
    fn test_load_sanitizes_entries() {
        let storage = MemoryStorage::default();
        storage
            .save(
                r#"[
                    {"coinId":"bitcoin","currency":"usd","investedAmount":"100.5"},
                    {"quoteCurrency":"usd","investedAmount":"3"},
                    {"coinId":"bitcoin","quoteCurrency":"eur"},
                    {"coinId":"ethereum","quoteCurrency":"usd","investedAmount":"-4"},
                    "garbage"
                ]"#,
            )
            .unwrap();

        let store = PortfolioStore::open(storage);
        assert_eq!(
            store.records(),
            [
                HoldingRecord::new("bitcoin", "usd", dec!(100.5)),
                HoldingRecord::new("ethereum", "usd", Decimal::ZERO),
            ]
        );
        assert_eq!(store.sum_invested(), dec!(100.5));
    }
}
