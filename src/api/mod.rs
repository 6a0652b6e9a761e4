//! Admin HTTP surface: health, usage statistics and reminders.

pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete admin router.
pub fn build_router() -> Router<AppState> {
    handlers::routes()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::{EventBus, Snowflake};
    use crate::persistence::PersistenceClient;
    use crate::persistence::models::Guild;
    use crate::service::{GuildAggregate, GuildService, ReminderScheduler, SchedulerConfig};

    fn state() -> AppState {
        let db = PersistenceClient::unreachable();
        let event_bus = EventBus::new(16);
        AppState {
            guilds: Arc::new(GuildService::new(db.clone(), event_bus.clone())),
            reminders: Arc::new(ReminderScheduler::new(
                db.clone(),
                db.generator(),
                event_bus.clone(),
                SchedulerConfig::default(),
            )),
            event_bus,
        }
    }

    async fn call(state: AppState, method: Method, uri: &str) -> (StatusCode, Value) {
        let Ok(request) = Request::builder().method(method).uri(uri).body(Body::empty()) else {
            panic!("request should build");
        };
        let Ok(response) = build_router().with_state(state).oneshot(request).await else {
            panic!("router is infallible");
        };
        let status = response.status();
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body should be readable");
        };
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_registry_and_scheduler() {
        let state = state();
        let _ = state
            .guilds
            .registry()
            .insert(GuildAggregate::new(Guild::new(Snowflake::new(1))))
            .await;

        let (status, body) = call(state, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.get("status").and_then(Value::as_str), Some("healthy"));
        assert_eq!(body.get("guilds").and_then(Value::as_u64), Some(1));
        assert_eq!(body.get("active_reminders").and_then(Value::as_u64), Some(0));
        assert_eq!(body.get("populated").and_then(Value::as_bool), Some(false));
    }

    #[tokio::test]
    async fn unknown_guild_stats_are_not_found() {
        let (status, body) = call(state(), Method::GET, "/guilds/42/stats/commands").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let code = body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_u64);
        assert_eq!(code, Some(2002));
    }

    #[tokio::test]
    async fn unreachable_store_is_service_unavailable() {
        let (status, _) = call(state(), Method::GET, "/stats/commands").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = call(state(), Method::DELETE, "/reminders/7").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
