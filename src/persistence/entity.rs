//! The entity contract shared by every persisted record type.

use std::future::Future;

use sqlx::FromRow;
use sqlx::postgres::PgRow;

use super::postgres::PersistenceClient;
use super::schema::Schema;
use super::value::SqlValue;
use crate::domain::Snowflake;
use crate::error::StoreError;

/// A schema-described record type.
///
/// Implementors declare their table through [`Entity::SCHEMA`] and expose
/// their fields, in column order, through [`Entity::values`]. Hydration
/// from a row goes through `sqlx::FromRow`.
///
/// The identifier returned by [`Entity::id`] is assigned when the value is
/// constructed and never changes afterwards. Equality and hashing of
/// entity types depend on it alone (see [`impl_entity_identity`]), so
/// entities can be cached by identity while their other fields mutate.
pub trait Entity: for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin + 'static {
    /// Static descriptor of the backing table.
    const SCHEMA: Schema;

    /// Identifier assigned at construction.
    fn id(&self) -> Snowflake;

    /// Field values in the order of `SCHEMA.columns`.
    fn values(&self) -> Vec<SqlValue>;

    /// Read-only `(column, value)` view of the persisted fields.
    fn field_map(&self) -> Vec<(&'static str, SqlValue)> {
        Self::SCHEMA
            .columns
            .iter()
            .copied()
            .zip(self.values())
            .collect()
    }

    /// Values of the primary-key columns, in key order.
    fn key_values(&self) -> Vec<SqlValue> {
        let fields = self.field_map();
        Self::SCHEMA
            .primary_key
            .iter()
            .filter_map(|key| {
                fields
                    .iter()
                    .find(|(column, _)| column == key)
                    .map(|(_, value)| value.clone())
            })
            .collect()
    }

    /// Inserts the row, or updates every non-key column if it exists.
    ///
    /// # Errors
    ///
    /// Propagates [`PersistenceClient::upsert`] failures.
    fn save<'a>(
        &'a self,
        db: &'a PersistenceClient,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'a
    where
        Self: Sized,
    {
        db.upsert(self)
    }

    /// Deletes the row by primary key. Returns `false` if nothing matched.
    ///
    /// # Errors
    ///
    /// Propagates [`PersistenceClient::delete`] failures.
    fn delete<'a>(
        &'a self,
        db: &'a PersistenceClient,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send + 'a
    where
        Self: Sized,
    {
        db.delete(self)
    }
}

/// Implements `PartialEq`, `Eq` and `Hash` for entity types in terms of
/// [`Entity::id`] only.
#[macro_export]
macro_rules! impl_entity_identity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ::std::cmp::PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    $crate::persistence::Entity::id(self) == $crate::persistence::Entity::id(other)
                }
            }

            impl ::std::cmp::Eq for $ty {}

            impl ::std::hash::Hash for $ty {
                fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                    ::std::hash::Hash::hash(&$crate::persistence::Entity::id(self), state);
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::persistence::models::{Member, Prefix};

    #[test]
    fn identity_ignores_field_values() {
        let guild = Snowflake::new(10);
        let a = Prefix::new(Snowflake::new(1), guild, "!", None);
        let mut b = a.clone();
        b.prefix = "?".to_string();
        b.uses = 40;
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn mutating_fields_keeps_identifier() {
        let mut prefix = Prefix::new(Snowflake::new(5), Snowflake::new(10), "!", None);
        prefix.uses += 1;
        assert_eq!(prefix.id(), Snowflake::new(5));
    }

    #[test]
    fn field_map_pairs_columns_with_values() {
        let prefix = Prefix::new(Snowflake::new(1), Snowflake::new(2), "!!", None);
        let map = prefix.field_map();
        let columns: Vec<&str> = map.iter().map(|(c, _)| *c).collect();
        assert_eq!(columns, Prefix::SCHEMA.columns);
        assert!(
            map.iter()
                .any(|(c, v)| *c == "prefix" && *v == SqlValue::from("!!"))
        );
    }

    #[test]
    fn composite_key_values() {
        let member = Member::new(Snowflake::new(7), Snowflake::new(8));
        assert_eq!(
            member.key_values(),
            vec![SqlValue::BigInt(Some(7)), SqlValue::BigInt(Some(8))]
        );
    }
}
