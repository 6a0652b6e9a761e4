//! Service layer: business logic orchestration.
//!
//! [`GuildService`] owns the registry of [`GuildAggregate`]s and the guild
//! lifecycle, [`ReminderScheduler`] owns armed reminders, [`stats`] reads
//! usage statistics and [`tasks`] keeps per-user task lists. All of them write through the
//! [`crate::persistence::PersistenceClient`] and publish on the
//! [`crate::domain::EventBus`].

pub mod guild_aggregate;
pub mod guild_service;
pub mod reminder_scheduler;
pub mod stats;
pub mod tasks;

pub use guild_aggregate::{GuildAggregate, TagIndexEntry};
pub use guild_service::{GuildService, PopulationReport};
pub use reminder_scheduler::{ReconcileReport, ReminderScheduler, ReminderStore, SchedulerConfig};
pub use stats::{CommandCount, CommandStats, TagStats, UserCount};
