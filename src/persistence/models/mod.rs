//! Concrete entity families.
//!
//! Rows that mirror platform objects ([`Account`], [`Guild`], [`Member`])
//! reuse the platform's identifiers. Every other row is keyed by a
//! [`Snowflake`](crate::domain::Snowflake) minted by the bot.

mod account;
mod audit;
mod guild;
mod reminder;
mod tag;
mod task;

pub use account::{Account, Member, Nickname};
pub use audit::{CommandCall, TagCall};
pub use guild::{Activity, ChannelBlock, Faq, Guild, GuildSettings, Prefix, ReactionRole};
pub use reminder::{Reminder, ReminderPayload, REMINDER_COMPLETE_EVENT};
pub use tag::{ResolvedTag, Tag, TagLookup};
pub use task::Task;
