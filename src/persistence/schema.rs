//! Static schema descriptors and the statements generated from them.
//!
//! Every entity type carries a `const` [`Schema`]: its table, the ordered
//! list of persisted columns, the primary-key columns, the tables it
//! references and its DDL. The [`SchemaRegistry`] validates those
//! descriptors once at startup, builds the generic statements for each
//! type and computes the order in which tables must be created so that
//! referenced tables exist before the tables referencing them.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use super::entity::Entity;
use super::value::SqlValue;
use crate::error::StoreError;

/// Static description of one entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Table name.
    pub table: &'static str,
    /// Persisted columns, in the order [`Entity::values`] yields them.
    pub columns: &'static [&'static str],
    /// Primary-key columns. Defaults to `["id"]`.
    pub primary_key: &'static [&'static str],
    /// Tables this table holds foreign keys into.
    pub depends_on: &'static [&'static str],
    /// `CREATE TABLE` statement (plus any indexes).
    pub ddl: &'static str,
}

impl Schema {
    /// Describes a table keyed by its `id` column.
    #[must_use]
    pub const fn new(
        table: &'static str,
        columns: &'static [&'static str],
        ddl: &'static str,
    ) -> Self {
        Self {
            table,
            columns,
            primary_key: &["id"],
            depends_on: &[],
            ddl,
        }
    }

    /// Replaces the primary key with a (possibly composite) column set.
    #[must_use]
    pub const fn with_primary_key(self, primary_key: &'static [&'static str]) -> Self {
        Self {
            primary_key,
            ..self
        }
    }

    /// Declares the tables this table references.
    #[must_use]
    pub const fn depends_on(self, depends_on: &'static [&'static str]) -> Self {
        Self { depends_on, ..self }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.table.trim().is_empty() {
            return Err(StoreError::Schema("table name is empty".to_string()));
        }
        if self.ddl.trim().is_empty() {
            return Err(StoreError::Schema(format!("{}: DDL is empty", self.table)));
        }
        if self.columns.is_empty() {
            return Err(StoreError::Schema(format!("{}: no columns", self.table)));
        }
        let mut seen = HashSet::new();
        for column in self.columns {
            if !seen.insert(*column) {
                return Err(StoreError::Schema(format!(
                    "{}: duplicate column {column}",
                    self.table
                )));
            }
        }
        if self.primary_key.is_empty() {
            return Err(StoreError::Schema(format!(
                "{}: primary key is empty",
                self.table
            )));
        }
        if let Some(missing) = self.primary_key.iter().find(|k| !seen.contains(*k)) {
            return Err(StoreError::Schema(format!(
                "{}: key column {missing} is not a persisted column",
                self.table
            )));
        }
        Ok(())
    }
}

/// Statements generated once per registered entity type.
#[derive(Debug, Clone)]
pub struct Statements {
    table: &'static str,
    column_list: String,
    select_all: String,
    select_by_key: String,
    upsert: String,
    delete: String,
    key_positions: Vec<usize>,
    column_count: usize,
}

impl Statements {
    fn build(schema: &Schema) -> Self {
        let key_predicate = schema
            .primary_key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{k} = ${}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let column_list = schema.columns.join(", ");

        let select_all = format!("SELECT {column_list} FROM {}", schema.table);
        let select_by_key = format!("{select_all} WHERE {key_predicate}");
        let delete = format!("DELETE FROM {} WHERE {key_predicate}", schema.table);

        let placeholders = (1..=schema.columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut upsert = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders}) ON CONFLICT ({})",
            schema.table,
            schema.primary_key.join(", ")
        );
        let updates = schema
            .columns
            .iter()
            .filter(|c| !schema.primary_key.contains(*c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            upsert.push_str(" DO NOTHING");
        } else {
            let _ = write!(upsert, " DO UPDATE SET {}", updates.join(", "));
        }

        let key_positions = schema
            .primary_key
            .iter()
            .filter_map(|k| schema.columns.iter().position(|c| c == k))
            .collect();

        Self {
            table: schema.table,
            column_list,
            select_all,
            select_by_key,
            upsert,
            delete,
            key_positions,
            column_count: schema.columns.len(),
        }
    }

    /// Table these statements target.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Comma-separated column list in declaration order, for `RETURNING`
    /// clauses.
    #[must_use]
    pub fn column_list(&self) -> &str {
        &self.column_list
    }

    /// `SELECT <columns> FROM <table>`, for callers appending their own
    /// filter.
    #[must_use]
    pub fn select_all(&self) -> &str {
        &self.select_all
    }

    /// `SELECT <columns> FROM <table> WHERE <key> = $1 AND ...`.
    #[must_use]
    pub fn select_by_key(&self) -> &str {
        &self.select_by_key
    }

    /// `INSERT ... ON CONFLICT (<key>) DO UPDATE SET <non-key> = EXCLUDED.<non-key>`.
    #[must_use]
    pub fn upsert(&self) -> &str {
        &self.upsert
    }

    /// `DELETE FROM <table> WHERE <key> = $1 AND ...`.
    #[must_use]
    pub fn delete(&self) -> &str {
        &self.delete
    }

    /// Picks the key tuple out of a column-ordered value list.
    #[must_use]
    pub fn key_values(&self, values: &[SqlValue]) -> Vec<SqlValue> {
        self.key_positions
            .iter()
            .filter_map(|&i| values.get(i).cloned())
            .collect()
    }

    /// Checks a value list against the column count and key completeness.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] when the number of values does not
    /// match the column list and [`StoreError::IncompleteKey`] when any key
    /// column is `NULL`.
    pub fn check(&self, values: &[SqlValue]) -> Result<(), StoreError> {
        if values.len() != self.column_count {
            return Err(StoreError::Schema(format!(
                "{}: expected {} values, got {}",
                self.table,
                self.column_count,
                values.len()
            )));
        }
        let incomplete = self
            .key_positions
            .iter()
            .any(|&i| values.get(i).is_none_or(SqlValue::is_null));
        if incomplete {
            return Err(StoreError::IncompleteKey { table: self.table });
        }
        Ok(())
    }
}

/// Collects entity types before validation.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    entries: Vec<(TypeId, Schema)>,
}

impl SchemaRegistryBuilder {
    /// Adds an entity type. Registering the same type twice is a no-op.
    #[must_use]
    pub fn register<T: Entity>(mut self) -> Self {
        let type_id = TypeId::of::<T>();
        if !self.entries.iter().any(|(id, _)| *id == type_id) {
            self.entries.push((type_id, T::SCHEMA));
        }
        self
    }

    /// Validates every descriptor and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] when a descriptor is incomplete, two
    /// types share a table, a dependency is not registered, or the
    /// dependencies form a cycle.
    pub fn build(self) -> Result<SchemaRegistry, StoreError> {
        let mut tables = HashSet::new();
        for (_, schema) in &self.entries {
            schema.validate()?;
            if !tables.insert(schema.table) {
                return Err(StoreError::Schema(format!(
                    "table {} registered by two entity types",
                    schema.table
                )));
            }
        }
        for (_, schema) in &self.entries {
            if let Some(missing) = schema.depends_on.iter().find(|d| !tables.contains(*d)) {
                return Err(StoreError::Schema(format!(
                    "{} depends on unregistered table {missing}",
                    schema.table
                )));
            }
        }

        let creation_order = creation_order(self.entries.iter().map(|(_, s)| *s).collect())?;
        let statements = self
            .entries
            .iter()
            .map(|(id, schema)| (*id, Statements::build(schema)))
            .collect();

        Ok(SchemaRegistry {
            statements,
            creation_order,
        })
    }
}

/// Orders schemas so every table follows the tables it depends on.
///
/// Among tables whose dependencies are satisfied, registration order is
/// kept.
fn creation_order(mut pending: Vec<Schema>) -> Result<Vec<Schema>, StoreError> {
    let mut created: HashSet<&'static str> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let Some(next) = pending
            .iter()
            .position(|s| s.depends_on.iter().all(|d| created.contains(d)))
        else {
            let stuck = pending.iter().map(|s| s.table).collect::<Vec<_>>();
            return Err(StoreError::Schema(format!(
                "dependency cycle between tables: {}",
                stuck.join(", ")
            )));
        };
        let schema = pending.remove(next);
        created.insert(schema.table);
        ordered.push(schema);
    }
    Ok(ordered)
}

/// Validated descriptors plus their generated statements.
#[derive(Debug)]
pub struct SchemaRegistry {
    statements: HashMap<TypeId, Statements>,
    creation_order: Vec<Schema>,
}

impl SchemaRegistry {
    /// Starts a new registry.
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Registry of every entity family the bot persists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Schema`] if any built-in descriptor is invalid.
    pub fn standard() -> Result<Self, StoreError> {
        use super::models::{
            Account, Activity, ChannelBlock, CommandCall, Faq, Guild, Member, Nickname, Prefix,
            ReactionRole, Reminder, Tag, TagCall, TagLookup, Task,
        };

        Self::builder()
            .register::<Account>()
            .register::<Guild>()
            .register::<Member>()
            .register::<Prefix>()
            .register::<Faq>()
            .register::<Activity>()
            .register::<ChannelBlock>()
            .register::<ReactionRole>()
            .register::<Nickname>()
            .register::<Tag>()
            .register::<TagLookup>()
            .register::<Reminder>()
            .register::<CommandCall>()
            .register::<TagCall>()
            .register::<Task>()
            .build()
    }

    /// Statements for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unregistered`] when `T` was not registered.
    pub fn statements<T: Entity>(&self) -> Result<&Statements, StoreError> {
        self.statements
            .get(&TypeId::of::<T>())
            .ok_or(StoreError::Unregistered(T::SCHEMA.table))
    }

    /// Schemas in table-creation order.
    #[must_use]
    pub fn creation_order(&self) -> &[Schema] {
        &self.creation_order
    }

    /// Number of registered entity types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
