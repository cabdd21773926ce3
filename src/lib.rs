use provider::ProviderEvent;

pub mod holding;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod tui;

#[derive(Clone, Debug)]
pub enum AppEvent {
    Provider(ProviderEvent),
}
