use anyhow::Result;
use chrono::DateTime;
use crossterm::event::{Event, EventStream, KeyCode};
use futures_util::StreamExt;
use itertools::{Itertools, MinMaxResult};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, List, ListItem, Paragraph},
    Frame,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::holding::HoldingRecord;
use crate::provider::coingecko::CoinGecko;
use crate::provider::{ProviderEvent, TimeFrame};
use crate::reconciler::{
    EnsureOutcome, FetchRequest, Membership, Panel, PanelStatus, Reconciler,
};
use crate::store::storage::JsonFileStorage;
use crate::AppEvent;

enum InputMode {
    Normal,
    AddCoin(String),
    EditAmount(String),
}

pub struct App {
    should_quit: bool,
    rx: Receiver<AppEvent>,
    tx: Sender<AppEvent>,
    provider: CoinGecko,
    reconciler: Reconciler<JsonFileStorage>,
    currency: String,
    time_frame: TimeFrame,
    selected: usize,
    input: InputMode,
    notice: Option<String>,
}

impl App {
    pub fn new(
        rx: Receiver<AppEvent>,
        tx: Sender<AppEvent>,
        provider: CoinGecko,
        reconciler: Reconciler<JsonFileStorage>,
        currency: String,
        time_frame: TimeFrame,
    ) -> Self {
        Self {
            should_quit: false,
            rx,
            tx,
            provider,
            reconciler,
            currency,
            time_frame,
            selected: 0,
            input: InputMode::Normal,
            notice: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.open_stored_holdings();

        let mut terminal = ratatui::init();
        let _ = terminal.clear();

        let mut events = EventStream::new();

        let period = Duration::from_secs_f64(1.0 / 20.0);
        let mut interval = tokio::time::interval(period);

        while !self.should_quit {
            tokio::select! {
                _ = interval.tick() => { terminal.draw(|frame| self.render(frame))?; },
                Some(Ok(event)) = events.next() => self.handle_events(event),
                Some(event) = self.rx.recv() =>
                    self.handle_app_events(event)
            }
        }

        Ok(())
    }

    // every stored holding gets its panel back on startup
    fn open_stored_holdings(&mut self) {
        let holdings: Vec<HoldingRecord> = self.reconciler.holdings().to_vec();
        for record in holdings {
            if let Ok(EnsureOutcome::Created(request)) = self.reconciler.ensure_panel(
                &record.coin_id,
                &record.quote_currency,
                self.time_frame,
            ) {
                self.spawn_fetch(request);
            }
        }
    }

    fn handle_app_events(&mut self, event: AppEvent) {
        match event {
            AppEvent::Provider(event) => self.reconciler.apply_event(event),
        }
    }

    fn handle_events(&mut self, event: Event) {
        let Some(key) = event.as_key_press_event() else {
            return;
        };

        match &mut self.input {
            InputMode::AddCoin(buffer) => match key.code {
                KeyCode::Enter => {
                    let raw = buffer.clone();
                    self.input = InputMode::Normal;
                    self.open_panel(&raw);
                }
                KeyCode::Esc => self.input = InputMode::Normal,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            },
            InputMode::EditAmount(buffer) => match key.code {
                KeyCode::Enter => {
                    let raw = buffer.clone();
                    self.input = InputMode::Normal;
                    self.set_amount(&raw);
                }
                KeyCode::Esc => self.input = InputMode::Normal,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            },
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('a') => {
                    self.notice = None;
                    self.input = InputMode::AddCoin(String::new());
                }
                KeyCode::Char('e') => {
                    if self.selected_panel().is_some() {
                        self.notice = None;
                        self.input = InputMode::EditAmount(String::new());
                    }
                }
                KeyCode::Char('p') => self.toggle_selected(),
                KeyCode::Char('t') => self.cycle_selected_time_frame(),
                KeyCode::Char('d') => self.close_selected(),
                KeyCode::Up => self.selected = self.selected.saturating_sub(1),
                KeyCode::Down => {
                    if self.selected + 1 < self.reconciler.panels().len() {
                        self.selected += 1;
                    }
                }
                _ => {}
            },
        }
    }

    fn selected_panel(&self) -> Option<&Panel> {
        self.reconciler.panels().get(self.selected)
    }

    fn open_panel(&mut self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        let (coin_id, currency) = match raw.split_once('/') {
            Some((coin_id, currency)) => (coin_id, currency),
            None => (raw, self.currency.as_str()),
        };

        match self
            .reconciler
            .ensure_panel(coin_id, currency, self.time_frame)
        {
            Ok(EnsureOutcome::Created(request)) => {
                self.selected = self.reconciler.panels().len() - 1;
                self.spawn_fetch(request);
            }
            Ok(EnsureOutcome::AlreadyOpen) => {
                self.notice = Some(format!("{} is already on screen", raw));
            }
            Err(err) => self.notice = Some(err.to_string()),
        }
    }

    fn set_amount(&mut self, raw: &str) {
        let Some(panel) = self.selected_panel() else {
            return;
        };
        let coin_id = panel.key.coin_id.clone();
        match self.reconciler.set_invested_amount(&coin_id, raw) {
            Ok(()) => self.notice = Some(format!("Updated invested amount for {}", coin_id)),
            Err(err) => self.notice = Some(err.to_string()),
        }
    }

    fn toggle_selected(&mut self) {
        let Some(panel) = self.selected_panel() else {
            return;
        };
        let key = panel.key.clone();
        match self
            .reconciler
            .toggle_membership(&key.coin_id, &key.currency)
        {
            Ok(Membership::Tracked) => {
                self.notice = Some(format!("Tracking {}", key.coin_id));
            }
            Ok(Membership::NotTracked) => {
                self.notice = Some(format!("Removed {} from the portfolio", key.coin_id));
            }
            Err(err) => self.notice = Some(err.to_string()),
        }
    }

    fn cycle_selected_time_frame(&mut self) {
        let Some(panel) = self.selected_panel() else {
            return;
        };
        let key = panel.key.clone();
        let next = panel.time_frame.next();
        if let Some(request) = self.reconciler.retime_panel(&key, next) {
            self.spawn_fetch(request);
        }
    }

    fn close_selected(&mut self) {
        let Some(panel) = self.selected_panel() else {
            return;
        };
        let key = panel.key.clone();
        self.reconciler.close_panel(&key);
        if self.selected >= self.reconciler.panels().len() {
            self.selected = self.reconciler.panels().len().saturating_sub(1);
        }
    }

    fn spawn_fetch(&self, request: FetchRequest) {
        let provider = self.provider.clone();
        let tx = self.tx.clone();
        tokio::task::spawn(async move {
            let FetchRequest { key, days } = request;

            match provider.spot(&key.coin_id, &key.currency).await {
                Ok(quote) => {
                    let _ = tx
                        .send(AppEvent::Provider(ProviderEvent::Spot {
                            coin_id: key.coin_id.clone(),
                            currency: key.currency.clone(),
                            quote,
                        }))
                        .await;
                }
                Err(err) => {
                    let _ = tx
                        .send(AppEvent::Provider(ProviderEvent::Failed {
                            coin_id: key.coin_id.clone(),
                            currency: key.currency.clone(),
                            message: err.to_string(),
                        }))
                        .await;
                    return;
                }
            }

            match provider.history(&key.coin_id, &key.currency, days).await {
                Ok(series) => {
                    let _ = tx
                        .send(AppEvent::Provider(ProviderEvent::History {
                            coin_id: key.coin_id.clone(),
                            currency: key.currency.clone(),
                            series,
                        }))
                        .await;
                }
                Err(err) => {
                    let _ = tx
                        .send(AppEvent::Provider(ProviderEvent::Failed {
                            coin_id: key.coin_id.clone(),
                            currency: key.currency.clone(),
                            message: err.to_string(),
                        }))
                        .await;
                }
            }
        });
    }

    fn render(&self, frame: &mut Frame) {
        let [header_area, main_area, footer_area] = Layout::vertical([
            Constraint::Length(2),
            Constraint::Fill(1),
            Constraint::Length(3),
        ])
        .areas(frame.area());

        let [left_area, right_area] =
            Layout::horizontal([Constraint::Max(40), Constraint::Fill(1)]).areas(main_area);

        let [panels_area, holdings_area] =
            Layout::vertical([Constraint::Fill(1), Constraint::Fill(1)]).areas(left_area);

        self.render_header(frame, header_area);
        self.render_panels(frame, panels_area);
        self.render_holdings(frame, holdings_area);
        self.render_selected(frame, right_area);
        self.render_footer(frame, footer_area);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!(
                "Coinfolio ({} / {})",
                self.currency.to_uppercase(),
                self.time_frame
            ))
            .borders(Borders::ALL);
        frame.render_widget(block, area);
    }

    fn render_panels(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Coins").borders(Borders::ALL);

        let items: Vec<ListItem> = self
            .reconciler
            .panels()
            .iter()
            .enumerate()
            .map(|(i, panel)| {
                let marker = if i == self.selected { "> " } else { "  " };
                let title_style = if i == self.selected {
                    Style::default().fg(Color::Cyan)
                } else {
                    Style::default()
                };
                let top_line = Line::from(vec![
                    Span::raw(marker),
                    Span::styled(panel.title(), title_style),
                ]);
                let affordance = if panel.tracked {
                    "in portfolio"
                } else {
                    "watching"
                };
                let bot_line = Line::from(vec![
                    Span::raw("  "),
                    Span::styled(
                        format!(
                            "{}  {}  {}",
                            panel.key.currency, panel.time_frame, affordance
                        ),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]);
                ListItem::new(vec![top_line, bot_line])
            })
            .collect();

        let list = List::new(items).block(block);
        frame.render_widget(list, area);
    }

    fn render_holdings(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(format!("Portfolio ~ {}", self.reconciler.total_invested()))
            .borders(Borders::ALL);

        let items: Vec<ListItem> = self
            .reconciler
            .holdings()
            .iter()
            .map(ListItem::from)
            .collect();
        let list = List::new(items).block(block);
        frame.render_widget(list, area);
    }

    fn render_selected(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Graph").borders(Borders::ALL);

        let Some(panel) = self.selected_panel() else {
            let p = Paragraph::new(Line::from("Press 'a' to add a coin")).block(block);
            frame.render_widget(p, area);
            return;
        };

        let [spot_area, chart_area] =
            Layout::vertical([Constraint::Length(4), Constraint::Fill(1)]).areas(area);

        self.render_spot(frame, spot_area, panel);
        self.render_chart(frame, chart_area, panel);
    }

    fn render_spot(&self, frame: &mut Frame, area: Rect, panel: &Panel) {
        let title_style = match panel.status {
            PanelStatus::Failed(_) => Style::default().fg(Color::Red),
            _ => Style::default().fg(Color::Blue),
        };
        let block = Block::default()
            .title(Span::styled(panel.title(), title_style))
            .borders(Borders::ALL);

        let lines = match &panel.status {
            PanelStatus::Failed(message) => {
                vec![Line::styled(
                    message.clone(),
                    Style::default().fg(Color::Red),
                )]
            }
            _ => match &panel.spot {
                Some(quote) => {
                    let change = match quote.change_24h {
                        Some(change) => {
                            let color = if change < Decimal::ZERO {
                                Color::Red
                            } else {
                                Color::Green
                            };
                            Span::styled(
                                format!("24h change : {}%", change),
                                Style::default().fg(color),
                            )
                        }
                        None => Span::raw("24h change : n/a".to_string()),
                    };
                    vec![
                        Line::from(Span::styled(
                            format!(
                                "Current price : {} {}",
                                quote.price,
                                panel.key.currency.to_uppercase()
                            ),
                            Style::default().fg(Color::Yellow),
                        )),
                        Line::from(change),
                    ]
                }
                None => vec![Line::from("Fetching price...")],
            },
        };

        let p = Paragraph::new(lines).block(block);
        frame.render_widget(p, area);
    }

    fn render_chart(&self, frame: &mut Frame, area: Rect, panel: &Panel) {
        let block = Block::default()
            .title(format!(
                "{} price in {}",
                panel.key.coin_id.to_uppercase(),
                panel.key.currency.to_uppercase()
            ))
            .borders(Borders::ALL);

        let data: Vec<(f64, f64)> = panel
            .series
            .iter()
            .map(|point| (point.time as f64, point.price.to_f64().unwrap_or(0.0)))
            .collect();

        if data.is_empty() {
            let message = match panel.status {
                PanelStatus::Failed(_) => "No chart data",
                _ => "Loading chart...",
            };
            let p = Paragraph::new(Line::from(message)).block(block);
            frame.render_widget(p, area);
            return;
        }

        let (start, end) = match data.iter().map(|point| point.0).minmax() {
            MinMaxResult::MinMax(min, max) => (min, max),
            MinMaxResult::OneElement(only) => (only, only),
            MinMaxResult::NoElements => (0.0, 0.0),
        };
        let (min_price, max_price) = match data.iter().map(|point| point.1).minmax() {
            MinMaxResult::MinMax(min, max) => (min, max),
            MinMaxResult::OneElement(only) => (only, only),
            MinMaxResult::NoElements => (0.0, 0.0),
        };

        let dataset = Dataset::default()
            .data(&data)
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Blue))
            .graph_type(ratatui::widgets::GraphType::Line);

        let chart = Chart::new(vec![dataset])
            .x_axis(
                Axis::default()
                    .title("Date")
                    .bounds([start, end])
                    .labels([
                        Span::raw(date_label(start as i64)),
                        Span::raw(date_label(((start + end) / 2.0) as i64)),
                        Span::raw(date_label(end as i64)),
                    ]),
            )
            .y_axis(
                Axis::default()
                    .title("Price")
                    .bounds([min_price, max_price])
                    .labels([
                        Span::raw(format!("{:.2}", min_price)),
                        Span::raw(format!("{:.2}", max_price)),
                    ]),
            )
            .block(block);

        frame.render_widget(chart, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL);
        let line = match &self.input {
            InputMode::AddCoin(buffer) => format!("coin id (or coin/currency) : {}_", buffer),
            InputMode::EditAmount(buffer) => format!("invested amount : {}_", buffer),
            InputMode::Normal => self.notice.clone().unwrap_or_else(|| {
                "q quit / a add / p track / e amount / t range / d close".to_string()
            }),
        };
        let p = Paragraph::new(Line::from(line)).block(block);
        frame.render_widget(p, area);
    }
}

fn date_label(time_millis: i64) -> String {
    DateTime::from_timestamp_millis(time_millis)
        .map(|date| date.format("%m-%d").to_string())
        .unwrap_or_default()
}

impl From<&HoldingRecord> for ListItem<'_> {
    fn from(record: &HoldingRecord) -> Self {
        let top_line = Line::from(vec![
            Span::styled(record.coin_id.clone(), Style::new().fg(Color::Blue)),
            Span::raw(" "),
            Span::styled(
                format!(
                    "{} {}",
                    record.invested_amount,
                    record.quote_currency.to_uppercase()
                ),
                Style::default().fg(Color::Yellow),
            ),
        ]);
        ListItem::new(vec![top_line])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_label() {
        assert_eq!(date_label(1704067200000), "01-01");
        assert_eq!(date_label(i64::MAX), "");
    }
}
