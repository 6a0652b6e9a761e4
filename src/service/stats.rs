//! Usage statistics read straight from the audit tables.
//!
//! Nothing here is cached. Every call runs its aggregate queries against
//! storage, scoped to one guild or across all of them.

use serde::Serialize;

use crate::domain::Snowflake;
use crate::error::StoreError;
use crate::persistence::{PersistenceClient, SqlValue};

/// Entries returned by each leaderboard.
pub const LEADERBOARD_SIZE: i64 = 5;

/// Filters `command_calls` to one guild when `$1` is non-NULL.
const GUILD_SCOPE: &str = "($1::BIGINT IS NULL OR guild_id = $1)";

/// Restricts `command_calls` to the current UTC day.
const TODAY: &str = "called_at >= date_trunc('day', now() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC'";

/// Invocation count of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CommandCount {
    /// Qualified command name.
    pub command: String,
    /// Number of recorded invocations.
    pub count: i64,
}

/// Activity count attributed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserCount {
    /// The user.
    pub author_id: Snowflake,
    /// Number of matching rows.
    pub count: i64,
}

/// Tag lookup totals for a guild or one of its members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TagStats {
    /// Number of lookups (canonical titles and aliases).
    pub lookups: i64,
    /// Sum of uses across those lookups.
    pub uses: i64,
}

/// Command usage summary, all time and for the current day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    /// Most used commands.
    pub top_commands: Vec<CommandCount>,
    /// Users who ran the most commands.
    pub top_command_users: Vec<UserCount>,
    /// Most used commands today.
    pub top_commands_today: Vec<CommandCount>,
    /// Users who ran the most commands today.
    pub top_command_users_today: Vec<UserCount>,
    /// Total invocations recorded.
    pub total_commands_used: i64,
    /// Invocations recorded today.
    pub total_commands_used_today: i64,
}

/// Gathers [`CommandStats`] for one guild, or globally when `guild_id` is
/// `None`.
///
/// # Errors
///
/// Returns [`StoreError`] if any of the underlying queries fails.
pub async fn command_stats(
    db: &PersistenceClient,
    guild_id: Option<Snowflake>,
) -> Result<CommandStats, StoreError> {
    let scope: SqlValue = guild_id.into();
    let all_time = GUILD_SCOPE.to_string();
    let today = format!("{GUILD_SCOPE} AND {TODAY}");

    Ok(CommandStats {
        top_commands: db
            .get_vec(&top_commands_query(&all_time), vec![scope.clone()])
            .await?,
        top_command_users: db
            .get_vec(&top_users_query(&all_time), vec![scope.clone()])
            .await?,
        top_commands_today: db
            .get_vec(&top_commands_query(&today), vec![scope.clone()])
            .await?,
        top_command_users_today: db
            .get_vec(&top_users_query(&today), vec![scope.clone()])
            .await?,
        total_commands_used: db
            .get_scalar::<i64>(&total_query(&all_time), vec![scope.clone()])
            .await?
            .unwrap_or(0),
        total_commands_used_today: db
            .get_scalar::<i64>(&total_query(&today), vec![scope])
            .await?
            .unwrap_or(0),
    })
}

fn top_commands_query(filter: &str) -> String {
    format!(
        "SELECT command, COUNT(*) AS count FROM command_calls WHERE {filter} \
         GROUP BY command ORDER BY count DESC, command LIMIT {LEADERBOARD_SIZE}"
    )
}

fn top_users_query(filter: &str) -> String {
    format!(
        "SELECT author_id, COUNT(*) AS count FROM command_calls WHERE {filter} \
         GROUP BY author_id ORDER BY count DESC, author_id LIMIT {LEADERBOARD_SIZE}"
    )
}

fn total_query(filter: &str) -> String {
    format!("SELECT COUNT(*) FROM command_calls WHERE {filter}")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn queries_share_the_guild_scope() {
        let today = format!("{GUILD_SCOPE} AND {TODAY}");
        for query in [
            top_commands_query(GUILD_SCOPE),
            top_users_query(&today),
            total_query(&today),
        ] {
            assert!(query.contains("$1::BIGINT IS NULL OR guild_id = $1"));
            assert!(query.contains("FROM command_calls"));
        }
        assert!(top_users_query(&today).contains("date_trunc('day'"));
        assert!(top_commands_query(GUILD_SCOPE).ends_with("LIMIT 5"));
    }

    #[test]
    fn empty_stats_serialize_with_every_field() {
        let Ok(json) = serde_json::to_value(CommandStats::default()) else {
            panic!("stats should serialize");
        };
        assert_eq!(json.get("total_commands_used"), Some(&serde_json::json!(0)));
        assert_eq!(json.get("top_commands_today"), Some(&serde_json::json!([])));
        assert!(json.get("top_command_users").is_some());
    }
}
