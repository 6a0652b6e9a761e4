//! Dynamically-typed bind values.
//!
//! Generic statements (upsert, delete by key, select by key) are built
//! from a schema descriptor, so their arguments cannot be bound with
//! statically-typed `.bind()` chains at the call site. Entities instead
//! expose their fields as a column-ordered list of [`SqlValue`]s and the
//! [`BindValues`] trait folds them into any sqlx query builder.

use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::{Query, QueryAs, QueryScalar};

use crate::domain::Snowflake;

/// A single statement argument. `None` binds a typed SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `BIGINT` (identifiers, counters).
    BigInt(Option<i64>),
    /// `INTEGER`.
    Int(Option<i32>),
    /// `TEXT`.
    Text(Option<String>),
    /// `BOOLEAN`.
    Bool(Option<bool>),
    /// `TIMESTAMPTZ`.
    Timestamp(Option<DateTime<Utc>>),
    /// `BIGINT[]`, used for bulk statements via `UNNEST`.
    BigIntArray(Vec<i64>),
}

impl SqlValue {
    /// Returns `true` when the value binds SQL `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::BigInt(None)
                | Self::Int(None)
                | Self::Text(None)
                | Self::Bool(None)
                | Self::Timestamp(None)
        )
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(Some(v))
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(Some(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(Some(v))
    }
}

impl From<Snowflake> for SqlValue {
    fn from(v: Snowflake) -> Self {
        Self::BigInt(Some(v.get()))
    }
}

impl From<Option<Snowflake>> for SqlValue {
    fn from(v: Option<Snowflake>) -> Self {
        Self::BigInt(v.map(Snowflake::get))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(Some(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(Some(v.to_owned()))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<&[Snowflake]> for SqlValue {
    fn from(v: &[Snowflake]) -> Self {
        Self::BigIntArray(v.iter().map(|id| id.get()).collect())
    }
}

/// Binds [`SqlValue`]s onto a sqlx query builder, in order.
pub trait BindValues: Sized {
    /// Binds one value as the next positional argument.
    #[must_use]
    fn bind_value(self, value: SqlValue) -> Self;

    /// Binds every value, in order.
    #[must_use]
    fn bind_values(self, values: Vec<SqlValue>) -> Self {
        values.into_iter().fold(self, Self::bind_value)
    }
}

macro_rules! bind_sql_value {
    ($query:expr, $value:expr) => {
        match $value {
            SqlValue::BigInt(v) => $query.bind(v),
            SqlValue::Int(v) => $query.bind(v),
            SqlValue::Text(v) => $query.bind(v),
            SqlValue::Bool(v) => $query.bind(v),
            SqlValue::Timestamp(v) => $query.bind(v),
            SqlValue::BigIntArray(v) => $query.bind(v),
        }
    };
}

impl<'q> BindValues for Query<'q, Postgres, PgArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

impl<'q, O> BindValues for QueryAs<'q, Postgres, O, PgArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

impl<'q, O> BindValues for QueryScalar<'q, Postgres, O, PgArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        bind_sql_value!(self, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_detection() {
        assert!(SqlValue::from(None::<Snowflake>).is_null());
        assert!(SqlValue::from(None::<String>).is_null());
        assert!(!SqlValue::from(Snowflake::new(1)).is_null());
        assert!(!SqlValue::BigIntArray(Vec::new()).is_null());
    }

    #[test]
    fn snowflakes_bind_as_bigint() {
        assert_eq!(SqlValue::from(Snowflake::new(77)), SqlValue::BigInt(Some(77)));
        let ids = [Snowflake::new(1), Snowflake::new(2)];
        assert_eq!(SqlValue::from(&ids[..]), SqlValue::BigIntArray(vec![1, 2]));
    }
}
