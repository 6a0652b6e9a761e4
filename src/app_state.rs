//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::service::{GuildService, ReminderScheduler};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Guild lifecycle, aggregates and membership.
    pub guilds: Arc<GuildService>,
    /// Armed and persisted reminders.
    pub reminders: Arc<ReminderScheduler>,
    /// Outbound bot events.
    pub event_bus: EventBus,
}
