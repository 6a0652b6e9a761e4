//! Persistence layer: entity mapping over PostgreSQL.
//!
//! Entity types describe their table with a static [`Schema`]; the
//! [`SchemaRegistry`] validates those descriptors at startup and builds
//! the generic statements once. [`PersistenceClient`] owns the pool and
//! executes everything through `sqlx`.

pub mod entity;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod value;

pub use entity::Entity;
pub use postgres::{PersistenceClient, RetryPolicy, ensure_account, ensure_member};
pub use schema::{Schema, SchemaRegistry, SchemaRegistryBuilder, Statements};
pub use value::{BindValues, SqlValue};
