use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;

pub mod coingecko;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no price data for {coin_id}/{currency}")]
    DataUnavailable { coin_id: String, currency: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response : {0}")]
    Malformed(String),
}

/// One sample of a price history series, timestamp in epoch milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePoint {
    pub time: i64,
    pub price: Decimal,
}

impl TryFrom<Value> for PricePoint {
    type Error = ProviderError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let value = if let Value::Array(value) = value {
            value
        } else {
            return Err(ProviderError::Malformed(
                "expected an array for a price point".to_string(),
            ));
        };
        if value.len() < 2 {
            return Err(ProviderError::Malformed(
                "price point needs a timestamp and a price".to_string(),
            ));
        }
        let time = value[0]
            .as_i64()
            .or_else(|| value[0].as_f64().map(|time| time as i64))
            .ok_or_else(|| ProviderError::Malformed("invalid timestamp".to_string()))?;
        let price = value[1]
            .as_f64()
            .and_then(Decimal::from_f64)
            .ok_or_else(|| ProviderError::Malformed("invalid price".to_string()))?;
        Ok(Self { time, price })
    }
}

/// Spot price with the 24 hour percent change when the API reports one.
#[derive(Clone, Debug, PartialEq)]
pub struct SpotQuote {
    pub price: Decimal,
    pub change_24h: Option<Decimal>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CoinInfo {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<Decimal>,
}

/// Completion of a detached fetch, delivered back to the UI loop.
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    Spot {
        coin_id: String,
        currency: String,
        quote: SpotQuote,
    },
    History {
        coin_id: String,
        currency: String,
        series: Vec<PricePoint>,
    },
    Failed {
        coin_id: String,
        currency: String,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
pub enum TimeFrame {
    #[strum(serialize = "24h")]
    Day,
    #[strum(serialize = "7d")]
    Week,
    #[strum(serialize = "30d")]
    Month,
    #[strum(serialize = "90d")]
    Quarter,
    #[strum(serialize = "1y")]
    Year,
}

impl TimeFrame {
    pub fn days(self) -> u32 {
        match self {
            TimeFrame::Day => 1,
            TimeFrame::Week => 7,
            TimeFrame::Month => 30,
            TimeFrame::Quarter => 90,
            TimeFrame::Year => 365,
        }
    }

    pub fn next(self) -> Self {
        match self {
            TimeFrame::Day => TimeFrame::Week,
            TimeFrame::Week => TimeFrame::Month,
            TimeFrame::Month => TimeFrame::Quarter,
            TimeFrame::Quarter => TimeFrame::Year,
            TimeFrame::Year => TimeFrame::Day,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_price_point_from_json() {
        let point = PricePoint::try_from(json!([1704067200000_i64, 42000.5])).unwrap();
        assert_eq!(point.time, 1704067200000);
        assert_eq!(point.price, dec!(42000.5));

        // CoinGecko sometimes reports timestamps as floats
        let point = PricePoint::try_from(json!([1704067200123.0, 42000.5])).unwrap();
        assert_eq!(point.time, 1704067200123);
    }

    #[test]
    fn test_price_point_rejects_malformed_values() {
        assert!(PricePoint::try_from(json!("nope")).is_err());
        assert!(PricePoint::try_from(json!([1704067200000_i64])).is_err());
        assert!(PricePoint::try_from(json!(["then", 42000.5])).is_err());
    }

    #[test]
    fn test_time_frame_parse_and_cycle() {
        use std::str::FromStr;

        assert_eq!(TimeFrame::from_str("7d").unwrap(), TimeFrame::Week);
        assert_eq!(TimeFrame::Week.to_string(), "7d");
        assert_eq!(TimeFrame::Week.days(), 7);
        assert_eq!(TimeFrame::Year.next(), TimeFrame::Day);
    }
}
