//! Admin endpoint handlers organized by resource.

pub mod reminders;
pub mod stats;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(system::routes())
        .merge(stats::routes())
        .merge(reminders::routes())
}
