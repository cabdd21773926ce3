use std::env;

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use rust_decimal::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::provider::{CoinInfo, PricePoint, ProviderError, SpotQuote};

const ENDPOINT: &str = "https://api.coingecko.com/api/v3";
const MARKETS_PAGE_SIZE: usize = 250;

#[derive(Deserialize, Debug)]
struct MarketChart {
    prices: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct CoinGecko {
    client: Client,
    endpoint: String,
}

impl CoinGecko {
    pub fn new() -> Self {
        Self::with_endpoint(ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = Client::builder().build().unwrap();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.client.get(url);
        match env::var("COINGECKO_API_KEY") {
            Ok(key) => request.header("x-cg-demo-api-key", key),
            Err(_) => request,
        }
    }

    pub async fn spot(&self, coin_id: &str, currency: &str) -> Result<SpotQuote, ProviderError> {
        let params = [
            ("ids", coin_id.to_string()),
            ("vs_currencies", currency.to_string()),
            ("include_24hr_change", "true".to_string()),
        ];
        let url =
            Url::parse_with_params(format!("{}/simple/price", self.endpoint).as_str(), &params)
                .unwrap();
        debug!("{}", url);

        let r = self.get(url).send().await?.error_for_status()?;
        let body: Value = r.json().await?;

        let price = body
            .get(coin_id)
            .and_then(|coin| coin.get(currency))
            .and_then(Value::as_f64)
            .and_then(Decimal::from_f64)
            .ok_or_else(|| ProviderError::DataUnavailable {
                coin_id: coin_id.to_string(),
                currency: currency.to_string(),
            })?;

        let change_24h = body
            .get(coin_id)
            .and_then(|coin| coin.get(format!("{}_24h_change", currency).as_str()))
            .and_then(Value::as_f64)
            .and_then(Decimal::from_f64)
            .map(|change| change.round_dp(2));

        Ok(SpotQuote { price, change_24h })
    }

    pub async fn history(
        &self,
        coin_id: &str,
        currency: &str,
        days: u32,
    ) -> Result<Vec<PricePoint>, ProviderError> {
        let params = [
            ("vs_currency", currency.to_string()),
            ("days", days.to_string()),
        ];
        let url = Url::parse_with_params(
            format!("{}/coins/{}/market_chart", self.endpoint, coin_id).as_str(),
            &params,
        )
        .unwrap();
        debug!("{}", url);

        let r = self.get(url).send().await?;
        if r.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::DataUnavailable {
                coin_id: coin_id.to_string(),
                currency: currency.to_string(),
            });
        }
        let chart: MarketChart = r.error_for_status()?.json().await?;

        // unparsable points are skipped rather than failing the series
        let points: Vec<PricePoint> = chart
            .prices
            .into_iter()
            .flat_map(PricePoint::try_from)
            .collect();

        if points.is_empty() {
            return Err(ProviderError::DataUnavailable {
                coin_id: coin_id.to_string(),
                currency: currency.to_string(),
            });
        }
        Ok(points)
    }

    pub async fn top_coins(&self, limit: usize) -> Result<Vec<CoinInfo>, ProviderError> {
        let mut coins: Vec<CoinInfo> = Vec::with_capacity(limit);
        let mut page = 1;

        while coins.len() < limit {
            let per_page = (limit - coins.len()).min(MARKETS_PAGE_SIZE);
            let params = [
                ("vs_currency", "usd".to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
                ("sparkline", "false".to_string()),
            ];
            let url = Url::parse_with_params(
                format!("{}/coins/markets", self.endpoint).as_str(),
                &params,
            )
            .unwrap();
            debug!("{}", url);

            let r = self.get(url).send().await?.error_for_status()?;
            let batch: Vec<CoinInfo> = r.json().await?;
            if batch.is_empty() {
                break;
            }
            coins.extend(batch);
            page += 1;
        }

        coins.truncate(limit);
        Ok(coins)
    }
}

impl Default for CoinGecko {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_spot_price_with_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin"))
            .and(query_param("vs_currencies", "usd"))
            .and(query_param("include_24hr_change", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": { "usd": 64250.25, "usd_24h_change": -1.2345 }
            })))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let quote = provider.spot("bitcoin", "usd").await.unwrap();
        assert_eq!(quote.price, dec!(64250.25));
        assert_eq!(quote.change_24h, Some(dec!(-1.23)));
    }

    #[tokio::test]
    async fn test_spot_price_missing_coin_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let err = provider.spot("dogecoin", "usd").await.unwrap_err();
        assert!(matches!(err, ProviderError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_history_skips_malformed_points() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin/market_chart"))
            .and(query_param("vs_currency", "usd"))
            .and(query_param("days", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prices": [
                    [1704067200000_i64, 42000.5],
                    ["broken"],
                    [1704070800000_i64, 42100.0]
                ]
            })))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let series = provider.history("bitcoin", "usd", 7).await.unwrap();
        assert_eq!(
            series,
            [
                PricePoint {
                    time: 1704067200000,
                    price: dec!(42000.5)
                },
                PricePoint {
                    time: 1704070800000,
                    price: dec!(42100.0)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_history_empty_series_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/bitcoin/market_chart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prices": [] })))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let err = provider.history("bitcoin", "usd", 7).await.unwrap_err();
        assert!(matches!(err, ProviderError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_history_unknown_coin_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/nonsense/market_chart"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let err = provider.history("nonsense", "usd", 7).await.unwrap_err();
        assert!(matches!(err, ProviderError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_top_coins_pages_until_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "current_price": 64250.25 },
                { "id": "ethereum", "symbol": "eth", "name": "Ethereum", "current_price": 3120.0 }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "tether", "symbol": "usdt", "name": "Tether", "current_price": 1.0 }
            ])))
            .mount(&server)
            .await;

        let provider = CoinGecko::with_endpoint(server.uri());
        let coins = provider.top_coins(3).await.unwrap();
        assert_eq!(coins.len(), 3);
        assert_eq!(coins[0].id, "bitcoin");
        assert_eq!(coins[2].id, "tether");
    }
}
