//! # teabot
//!
//! Persistence and scheduling core of a chat-community bot.
//!
//! Entities map onto PostgreSQL tables through static schema descriptors,
//! each guild's scoped state is cached in an aggregate that only changes
//! after a committed write, and reminders are armed on a single timer queue
//! that is periodically reconciled with storage. A small admin HTTP
//! surface exposes health and usage statistics.
//!
//! ## Architecture
//!
//! ```text
//! Admin clients (HTTP)
//!     │
//!     ├── Handlers (api/)
//!     │
//!     ├── GuildService / ReminderScheduler (service/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── GuildRegistry → GuildAggregate (domain/, service/)
//!     │
//!     └── PersistenceClient → PostgreSQL (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
