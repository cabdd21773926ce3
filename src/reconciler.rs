use std::fmt::Display;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::debug;

use crate::holding::{canonical_id, HoldingRecord};
use crate::provider::{PricePoint, ProviderEvent, SpotQuote, TimeFrame};
use crate::store::storage::Storage;
use crate::store::{PortfolioStore, StoreError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PanelKey {
    pub coin_id: String,
    pub currency: String,
}

impl PanelKey {
    pub fn new(coin_id: &str, currency: &str) -> Self {
        Self {
            coin_id: canonical_id(coin_id),
            currency: canonical_id(currency),
        }
    }
}

impl Display for PanelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.coin_id, self.currency)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PanelStatus {
    Loading,
    Ready,
    Failed(String),
}

/// One on-screen coin section: spot price, chart series, portfolio
/// affordance. Keyed by coin and quote currency.
#[derive(Clone, Debug)]
pub struct Panel {
    pub key: PanelKey,
    pub time_frame: TimeFrame,
    pub status: PanelStatus,
    pub tracked: bool,
    pub spot: Option<SpotQuote>,
    pub series: Vec<PricePoint>,
}

impl Panel {
    pub fn title(&self) -> String {
        match &self.status {
            PanelStatus::Loading => "Loading...".to_string(),
            PanelStatus::Failed(_) => format!("Error loading {}", self.key.coin_id),
            PanelStatus::Ready => capitalize(&self.key.coin_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: PanelKey,
    pub days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created(FetchRequest),
    AlreadyOpen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Tracked,
    NotTracked,
}

/// Keeps the on-screen panels consistent with the store: no duplicate
/// panels, affordances in sync with membership, summary and list
/// projections re-derived after every mutation.
pub struct Reconciler<S> {
    store: PortfolioStore<S>,
    panels: Vec<Panel>,
    holdings: Vec<HoldingRecord>,
    total_invested: Decimal,
}

impl<S: Storage> Reconciler<S> {
    pub fn new(store: PortfolioStore<S>) -> Self {
        let mut reconciler = Self {
            store,
            panels: vec![],
            holdings: vec![],
            total_invested: Decimal::ZERO,
        };
        reconciler.rebuild_list();
        reconciler.refresh_summary();
        reconciler
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn holdings(&self) -> &[HoldingRecord] {
        &self.holdings
    }

    pub fn total_invested(&self) -> Decimal {
        self.total_invested
    }

    /// Opens a panel for `(coin, currency)` unless one is already on
    /// screen. A tracked coin shown under a new currency updates the
    /// stored record in place.
    pub fn ensure_panel(
        &mut self,
        coin_id: &str,
        currency: &str,
        time_frame: TimeFrame,
    ) -> Result<EnsureOutcome, StoreError> {
        let key = PanelKey::new(coin_id, currency);
        if self.panels.iter().any(|panel| panel.key == key) {
            return Ok(EnsureOutcome::AlreadyOpen);
        }

        if self
            .store
            .get(&key.coin_id)
            .is_some_and(|record| record.quote_currency != key.currency)
        {
            self.store.update_currency(&key.coin_id, &key.currency)?;
            self.rebuild_list();
        }

        let tracked = self.store.contains(&key.coin_id);
        self.panels.push(Panel {
            key: key.clone(),
            time_frame,
            status: PanelStatus::Loading,
            tracked,
            spot: None,
            series: vec![],
        });

        Ok(EnsureOutcome::Created(FetchRequest {
            key,
            days: time_frame.days(),
        }))
    }

    /// The single membership transition point: absent coins are added
    /// with a zero invested amount, present ones are removed.
    pub fn toggle_membership(
        &mut self,
        coin_id: &str,
        currency: &str,
    ) -> Result<Membership, StoreError> {
        let key = PanelKey::new(coin_id, currency);
        let membership = if self.store.contains(&key.coin_id) {
            self.store.remove(&key.coin_id)?;
            Membership::NotTracked
        } else {
            self.store.add(&key.coin_id, &key.currency, Decimal::ZERO)?;
            Membership::Tracked
        };

        let tracked = membership == Membership::Tracked;
        for panel in self
            .panels
            .iter_mut()
            .filter(|panel| panel.key.coin_id == key.coin_id)
        {
            panel.tracked = tracked;
        }

        self.rebuild_list();
        self.refresh_summary();
        Ok(membership)
    }

    /// Raw input is parsed here so the store only ever sees numbers;
    /// anything unparsable is rejected as an invalid amount.
    pub fn set_invested_amount(&mut self, coin_id: &str, raw: &str) -> Result<(), StoreError> {
        let amount = Decimal::from_str(raw.trim())
            .map_err(|_| StoreError::InvalidAmount(raw.trim().to_string()))?;
        self.store.update_invested_amount(coin_id, amount)?;
        self.rebuild_list();
        self.refresh_summary();
        Ok(())
    }

    pub fn refresh_summary(&mut self) {
        self.total_invested = self.store.sum_invested();
    }

    pub fn rebuild_list(&mut self) {
        self.holdings = self.store.records().to_vec();
    }

    pub fn close_panel(&mut self, key: &PanelKey) {
        self.panels.retain(|panel| panel.key != *key);
    }

    /// Changes the selected panel's range and asks for a fresh fetch.
    pub fn retime_panel(&mut self, key: &PanelKey, time_frame: TimeFrame) -> Option<FetchRequest> {
        let panel = self.panels.iter_mut().find(|panel| panel.key == *key)?;
        panel.time_frame = time_frame;
        panel.status = PanelStatus::Loading;
        Some(FetchRequest {
            key: key.clone(),
            days: time_frame.days(),
        })
    }

    /// Applies a fetch completion to its panel. Results for panels that
    /// were closed in the meantime are discarded; a failure only marks
    /// the affected panel.
    pub fn apply_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Spot {
                coin_id,
                currency,
                quote,
            } => {
                let key = PanelKey::new(&coin_id, &currency);
                match self.panel_mut(&key) {
                    Some(panel) => {
                        panel.spot = Some(quote);
                        panel.status = PanelStatus::Ready;
                    }
                    None => debug!("Discarding spot result for closed panel {}", key),
                }
            }
            ProviderEvent::History {
                coin_id,
                currency,
                series,
            } => {
                let key = PanelKey::new(&coin_id, &currency);
                match self.panel_mut(&key) {
                    // the new series replaces whatever was rendered before
                    Some(panel) => panel.series = series,
                    None => debug!("Discarding history result for closed panel {}", key),
                }
            }
            ProviderEvent::Failed {
                coin_id,
                currency,
                message,
            } => {
                let key = PanelKey::new(&coin_id, &currency);
                match self.panel_mut(&key) {
                    Some(panel) => panel.status = PanelStatus::Failed(message),
                    None => debug!("Discarding fetch error for closed panel {}", key),
                }
            }
        }
    }

    fn panel_mut(&mut self, key: &PanelKey) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|panel| panel.key == *key)
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
