use colored::Colorize;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// One tracked coin/currency pair with its invested amount. The persisted
/// blob is a JSON array of these, camelCase field names on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HoldingRecord {
    pub coin_id: String,
    #[serde(alias = "currency")]
    pub quote_currency: String,
    #[serde(default)]
    pub invested_amount: Decimal,
}

impl HoldingRecord {
    pub fn new(coin_id: &str, quote_currency: &str, invested_amount: Decimal) -> Self {
        Self {
            coin_id: canonical_id(coin_id),
            quote_currency: canonical_id(quote_currency),
            invested_amount: round_amount(invested_amount),
        }
    }

    /// Boundary validation for records read back from storage. Records
    /// without a coin id are dropped; negative amounts clamp to zero.
    pub fn sanitized(self) -> Option<Self> {
        let coin_id = canonical_id(&self.coin_id);
        if coin_id.is_empty() {
            return None;
        }
        Some(Self {
            coin_id,
            quote_currency: canonical_id(&self.quote_currency),
            invested_amount: round_amount(self.invested_amount.max(Decimal::ZERO)),
        })
    }
}

impl Display for HoldingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) : {}",
            self.coin_id.purple(),
            self.quote_currency,
            self.invested_amount.to_string().yellow()
        )
    }
}

pub fn canonical_id(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}
