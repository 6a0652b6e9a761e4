//! Fan-out of reminder completions and guild lifecycle changes.
//!
//! The timer loop publishes a [`BotEvent::ReminderCompleted`] for every
//! reminder it fires, and the guild service publishes joins and removals.
//! The notifier that delivers reminders, the startup event logger and the
//! scheduler's own guild watcher each hold a separate receiver.

use tokio::sync::broadcast;

use super::BotEvent;

/// Cloneable publishing handle shared by the scheduler and guild service.
///
/// Receivers that fall more than `capacity` events behind skip the oldest
/// ones and observe [`broadcast::error::RecvError::Lagged`]. A reminder
/// completion missed that way is not redelivered.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BotEvent>,
}

impl EventBus {
    /// A bus buffering up to `capacity` undelivered events per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event. Returns how many receivers it reached; with none
    /// subscribed the event is dropped and `0` is returned.
    pub fn publish(&self, event: BotEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// A receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;
    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::domain::Snowflake;
    use crate::persistence::models::{Reminder, ReminderPayload};

    fn completed(id: i64, guild_id: Option<Snowflake>) -> BotEvent {
        let payload = ReminderPayload::new(Snowflake::new(7), guild_id, Snowflake::new(8), "tea");
        BotEvent::ReminderCompleted {
            reminder: Reminder::new(Snowflake::new(id), Utc::now(), payload),
            fired_at: Utc::now(),
        }
    }

    #[test]
    fn completion_without_notifier_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(completed(1, None)), 0);
    }

    #[tokio::test]
    async fn notifier_and_logger_both_see_a_completion() {
        let bus = EventBus::new(16);
        let mut notifier = bus.subscribe();
        let mut logger = bus.subscribe();

        let guild = Snowflake::new(30);
        assert_eq!(bus.publish(completed(2, Some(guild))), 2);

        for rx in [&mut notifier, &mut logger] {
            let Ok(BotEvent::ReminderCompleted { reminder, .. }) = rx.recv().await else {
                panic!("expected the completed reminder");
            };
            assert_eq!(reminder.id, Snowflake::new(2));
            assert_eq!(reminder.guild_id, Some(guild));
        }
    }

    #[tokio::test]
    async fn guild_lifecycle_arrives_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let guild_id = Snowflake::new(31);
        bus.publish(BotEvent::GuildJoined {
            guild_id,
            timestamp: Utc::now(),
        });
        bus.publish(BotEvent::GuildRemoved {
            guild_id,
            timestamp: Utc::now(),
        });

        let mut kinds = Vec::new();
        for _ in 0..2 {
            let Ok(event) = rx.recv().await else {
                panic!("expected a lifecycle event");
            };
            assert_eq!(event.guild_id(), Some(guild_id));
            kinds.push(event.event_type_str());
        }
        assert_eq!(kinds, vec!["guild_joined", "guild_removed"]);
    }

    #[tokio::test]
    async fn slow_notifier_skips_oldest_completions() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for id in 1..=4 {
            bus.publish(completed(id, None));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        let Ok(BotEvent::ReminderCompleted { reminder, .. }) = rx.recv().await else {
            panic!("expected the oldest retained completion");
        };
        assert_eq!(reminder.id, Snowflake::new(3));
    }

    #[test]
    fn dropped_receivers_stop_counting() {
        let bus = EventBus::new(4);
        let notifier = bus.subscribe();
        let _logger = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);
        drop(notifier);
        assert_eq!(bus.receiver_count(), 1);
    }
}
