//! Domain layer: identifiers, events, readiness and the guild registry.
//!
//! This module contains the process-wide identifier generator, the
//! outbound event types and their broadcast bus, the readiness gate for
//! initial population, and the registry that owns every live guild
//! aggregate.

pub mod bot_event;
pub mod event_bus;
pub mod guild_registry;
pub mod readiness;
pub mod snowflake;

pub use bot_event::BotEvent;
pub use event_bus::EventBus;
pub use guild_registry::GuildRegistry;
pub use readiness::{ReadySignal, ReadyTrigger, readiness};
pub use snowflake::{Snowflake, SnowflakeGenerator};
