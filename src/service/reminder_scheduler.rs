//! Durable reminder scheduling.
//!
//! Armed reminders live in one due-time-ordered queue processed by a
//! single timer loop, which always sleeps until the earliest entry is due
//! and is woken early whenever the queue changes. A second task runs
//! [`ReminderScheduler::reconcile`] on a fixed interval to re-derive the
//! queue from storage after restarts.
//!
//! Reminders further out than the durability threshold are persisted
//! before they are armed; nearer ones stay in memory only and are lost if
//! the process dies before they fire.
//!
//! Stored-row deletes (cancel, fire) and reconciliation are serialized, and
//! an id whose row is being deleted cannot be re-armed, so a reconciliation
//! sweep never resurrects a reminder that is on its way out.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::BotConfig;
use crate::domain::{BotEvent, EventBus, Snowflake, SnowflakeGenerator};
use crate::error::StoreError;
use crate::persistence::PersistenceClient;
use crate::persistence::models::{Reminder, ReminderPayload};

/// Most reminders returned by [`ReminderScheduler::list_for`].
pub const LIST_LIMIT: usize = 10;

/// Durable storage for reminder rows.
pub trait ReminderStore: Send + Sync + 'static {
    /// Stores a reminder, creating its owning account if needed.
    fn persist(&self, reminder: &Reminder) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a reminder. Returns `false` if it was not stored.
    fn remove(&self, id: Snowflake) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Deletes every reminder due at or before `now`, except those in
    /// `keep`. Returns the number deleted.
    fn purge_overdue(
        &self,
        now: DateTime<Utc>,
        keep: &[Snowflake],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Reminders due at or before `until`, earliest first.
    fn due_before(
        &self,
        until: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Reminder>, StoreError>> + Send;

    /// A user's stored reminders, optionally limited to one channel,
    /// earliest first.
    fn list_for(
        &self,
        user_id: Snowflake,
        channel_id: Option<Snowflake>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Reminder>, StoreError>> + Send;
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Reminders due further out than this are persisted before arming.
    pub durability_threshold: Duration,
    /// Period of the reconciliation task.
    pub reconcile_interval: Duration,
    /// How far ahead each reconciliation arms stored reminders.
    pub lookahead: Duration,
    /// Fire reminders that fell due while nothing was armed, instead of
    /// deleting them.
    pub fire_missed: bool,
}

impl SchedulerConfig {
    /// Builds the scheduler settings from `REMINDER_*` keys.
    #[must_use]
    pub const fn from_config(config: &BotConfig) -> Self {
        Self {
            durability_threshold: Duration::from_secs(config.reminder_durability_threshold_secs),
            reconcile_interval: Duration::from_secs(config.reminder_reconcile_interval_secs),
            lookahead: Duration::from_secs(config.reminder_lookahead_secs),
            fire_missed: config.reminder_fire_missed,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            durability_threshold: Duration::from_secs(600),
            reconcile_interval: Duration::from_secs(3 * 60 * 60),
            lookahead: Duration::from_secs(3 * 60 * 60),
            fire_missed: false,
        }
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Overdue stored reminders deleted without firing.
    pub expired: u64,
    /// Stored reminders newly armed.
    pub armed: usize,
}

#[derive(Debug)]
struct Armed {
    reminder: Reminder,
    persisted: bool,
}

/// Active-timer table: one queue entry per armed reminder.
#[derive(Debug, Default)]
struct TimerTable {
    queue: BTreeSet<(DateTime<Utc>, Snowflake)>,
    active: HashMap<Snowflake, Armed>,
    /// Disarmed ids whose stored row is still being deleted.
    removing: HashSet<Snowflake>,
}

impl TimerTable {
    /// Arms a reminder. Returns `false` if it was already armed or its row
    /// is being deleted.
    fn arm(&mut self, reminder: Reminder, persisted: bool) -> bool {
        if self.active.contains_key(&reminder.id) || self.removing.contains(&reminder.id) {
            return false;
        }
        self.queue.insert((reminder.fire_at, reminder.id));
        self.active.insert(
            reminder.id,
            Armed {
                reminder,
                persisted,
            },
        );
        true
    }

    fn disarm(&mut self, id: Snowflake) -> Option<Armed> {
        let armed = self.active.remove(&id)?;
        self.queue.remove(&(armed.reminder.fire_at, id));
        Some(armed)
    }

    /// Disarms a reminder and blocks re-arming until
    /// [`finish_removal`](Self::finish_removal).
    fn begin_removal(&mut self, id: Snowflake) -> Option<Armed> {
        self.removing.insert(id);
        self.disarm(id)
    }

    fn finish_removal(&mut self, id: Snowflake) {
        self.removing.remove(&id);
    }

    /// Disarms every reminder set in `guild_id`.
    fn disarm_guild(&mut self, guild_id: Snowflake) -> Vec<Snowflake> {
        let ids: Vec<Snowflake> = self
            .active
            .values()
            .filter(|armed| armed.reminder.guild_id == Some(guild_id))
            .map(|armed| armed.reminder.id)
            .collect();
        for id in &ids {
            self.disarm(*id);
        }
        ids
    }

    fn next_due(&self) -> Option<(DateTime<Utc>, Snowflake)> {
        self.queue.first().copied()
    }
}

/// Handles of the background tasks spawned by
/// [`ReminderScheduler::start`].
#[derive(Debug)]
struct SchedulerTasks {
    timers: JoinHandle<()>,
    reconciler: JoinHandle<()>,
    guild_watcher: JoinHandle<()>,
}

/// Schedules reminders and fires them through the [`EventBus`].
///
/// A reminder is either armed (present in the active-timer table) or
/// gone: fired, cancelled, or expired during reconciliation.
#[derive(Debug)]
pub struct ReminderScheduler<S = PersistenceClient> {
    store: S,
    ids: Arc<SnowflakeGenerator>,
    events: EventBus,
    config: SchedulerConfig,
    table: Mutex<TimerTable>,
    /// Held across reconciliation and across every stored-row delete.
    sweep: Mutex<()>,
    wake: Notify,
    tasks: Mutex<Option<SchedulerTasks>>,
}

impl<S: ReminderStore> ReminderScheduler<S> {
    /// Creates an idle scheduler. Nothing fires until [`start`](Self::start).
    #[must_use]
    pub fn new(
        store: S,
        ids: Arc<SnowflakeGenerator>,
        events: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            ids,
            events,
            config,
            table: Mutex::new(TimerTable::default()),
            sweep: Mutex::new(()),
            wake: Notify::new(),
            tasks: Mutex::new(None),
        }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Creates and arms a reminder firing at `fire_at`.
    ///
    /// A `fire_at` in the past fires as soon as the timer loop runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reminder had to be persisted and the
    /// write failed. Nothing is armed in that case.
    pub async fn create(
        &self,
        fire_at: DateTime<Utc>,
        payload: ReminderPayload,
    ) -> Result<Reminder, StoreError> {
        let reminder = Reminder::new(self.ids.next_id(), fire_at, payload);
        let lead = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let persisted = lead > self.config.durability_threshold;
        if persisted {
            self.store.persist(&reminder).await?;
        }

        self.table.lock().await.arm(reminder.clone(), persisted);
        self.wake.notify_one();

        tracing::info!(
            reminder_id = %reminder.id,
            user_id = %reminder.user_id,
            %fire_at,
            persisted,
            "reminder armed"
        );
        Ok(reminder)
    }

    /// Cancels a reminder, disarming it and deleting its stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReminderNotFound`] if the reminder is neither
    /// armed nor stored, or a storage error if the delete failed (the
    /// reminder stays armed in that case).
    pub async fn cancel(&self, id: Snowflake) -> Result<(), StoreError> {
        let _sweep = self.sweep.lock().await;
        let disarmed = self.table.lock().await.begin_removal(id);
        let removed = self.store.remove(id).await;

        let deleted = {
            let mut table = self.table.lock().await;
            table.finish_removal(id);
            match removed {
                Ok(deleted) => deleted,
                Err(err) => {
                    if let Some(Armed {
                        reminder,
                        persisted,
                    }) = disarmed
                    {
                        table.arm(reminder, persisted);
                    }
                    return Err(err);
                }
            }
        };
        if disarmed.is_none() && !deleted {
            return Err(StoreError::ReminderNotFound(id));
        }
        self.wake.notify_one();
        tracing::info!(reminder_id = %id, "reminder cancelled");
        Ok(())
    }

    /// Re-derives armed timers from storage.
    ///
    /// Deletes stored reminders whose fire time has passed (unless missed
    /// reminders are configured to fire), then arms every stored reminder
    /// due within the lookahead window that is not armed yet. Running it
    /// repeatedly never arms a reminder twice.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let _sweep = self.sweep.lock().await;
        let now = Utc::now();
        let expired = if self.config.fire_missed {
            0
        } else {
            let keep: Vec<Snowflake> = self.table.lock().await.active.keys().copied().collect();
            self.store.purge_overdue(now, &keep).await?
        };

        let lookahead = chrono::Duration::from_std(self.config.lookahead)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let due = self.store.due_before(now + lookahead).await?;

        let armed = {
            let mut table = self.table.lock().await;
            due.into_iter()
                .map(|reminder| table.arm(reminder, true))
                .filter(|newly_armed| *newly_armed)
                .count()
        };
        if armed > 0 {
            self.wake.notify_one();
        }

        tracing::info!(expired, armed, "reminders reconciled");
        Ok(ReconcileReport { expired, armed })
    }

    /// Disarms every reminder set in `guild_id` and returns their ids.
    ///
    /// Stored rows are not touched: they go with the guild row when the
    /// guild is deleted.
    pub async fn cancel_guild(&self, guild_id: Snowflake) -> Vec<Snowflake> {
        let ids = self.table.lock().await.disarm_guild(guild_id);
        if !ids.is_empty() {
            self.wake.notify_one();
            tracing::info!(%guild_id, count = ids.len(), "guild reminders disarmed");
        }
        ids
    }

    /// A user's reminders, stored or armed, earliest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub async fn list_for(
        &self,
        user_id: Snowflake,
        channel_id: Option<Snowflake>,
    ) -> Result<Vec<Reminder>, StoreError> {
        let limit = i64::try_from(LIST_LIMIT).unwrap_or(i64::MAX);
        let mut reminders = self.store.list_for(user_id, channel_id, limit).await?;
        {
            let table = self.table.lock().await;
            let extra = table
                .active
                .values()
                .map(|armed| &armed.reminder)
                .filter(|r| r.user_id == user_id)
                .filter(|r| channel_id.is_none_or(|c| r.channel_id == c))
                .filter(|r| !reminders.iter().any(|stored| stored.id == r.id))
                .cloned()
                .collect::<Vec<_>>();
            reminders.extend(extra);
        }
        reminders.sort_by_key(|r| (r.fire_at, r.id));
        reminders.truncate(LIST_LIMIT);
        Ok(reminders)
    }

    /// Number of armed reminders.
    pub async fn active_count(&self) -> usize {
        self.table.lock().await.active.len()
    }

    /// Returns `true` if the reminder is armed.
    pub async fn is_armed(&self, id: Snowflake) -> bool {
        self.table.lock().await.active.contains_key(&id)
    }

    /// Spawns the timer loop, the reconciliation task and a listener that
    /// disarms a guild's reminders when the guild is removed. The first
    /// reconciliation runs immediately. Calling it again while running has
    /// no effect.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return;
        }
        *tasks = Some(SchedulerTasks {
            timers: tokio::spawn(Arc::clone(self).run_timers()),
            reconciler: tokio::spawn(Arc::clone(self).run_reconciler()),
            guild_watcher: tokio::spawn(Arc::clone(self).watch_guilds(self.events.subscribe())),
        });
        tracing::info!("reminder scheduler started");
    }

    /// Stops both background tasks. Armed reminders are kept but do not
    /// fire until the scheduler is started again.
    pub async fn shutdown(&self) {
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.timers.abort();
            tasks.reconciler.abort();
            tasks.guild_watcher.abort();
            tracing::info!("reminder scheduler stopped");
        }
    }

    async fn run_timers(self: Arc<Self>) {
        loop {
            let next = self.table.lock().await.next_due();
            let Some((fire_at, id)) = next else {
                self.wake.notified().await;
                continue;
            };
            match (fire_at - Utc::now()).to_std() {
                Ok(wait) if !wait.is_zero() => {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = self.wake.notified() => {}
                    }
                }
                _ => self.fire(id).await,
            }
        }
    }

    async fn fire(&self, id: Snowflake) {
        let disarmed = {
            let mut table = self.table.lock().await;
            match table.active.get(&id).map(|armed| armed.persisted) {
                Some(true) => table.begin_removal(id),
                Some(false) => table.disarm(id),
                None => None,
            }
        };
        let Some(Armed {
            reminder,
            persisted,
        }) = disarmed
        else {
            return;
        };
        let fired_at = Utc::now();
        tracing::info!(reminder_id = %id, user_id = %reminder.user_id, "reminder fired");
        let _ = self.events.publish(BotEvent::ReminderCompleted {
            reminder,
            fired_at,
        });
        if persisted {
            let _sweep = self.sweep.lock().await;
            if let Err(err) = self.store.remove(id).await {
                tracing::warn!(reminder_id = %id, error = %err, "failed to delete fired reminder");
            }
            self.table.lock().await.finish_removal(id);
        }
    }

    async fn watch_guilds(self: Arc<Self>, mut rx: broadcast::Receiver<BotEvent>) {
        loop {
            match rx.recv().await {
                Ok(BotEvent::GuildRemoved { guild_id, .. }) => {
                    self.cancel_guild(guild_id).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "reminder guild watcher lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn run_reconciler(self: Arc<Self>) {
        let period = self.config.reconcile_interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(err) = self.reconcile().await {
                tracing::error!(error = %err, "reminder reconciliation failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    #[derive(Debug, Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<Snowflake, Reminder>>,
        remove_delay: Duration,
    }

    impl MemoryStore {
        fn with_remove_delay(remove_delay: Duration) -> Self {
            Self {
                remove_delay,
                ..Self::default()
            }
        }

        async fn len(&self) -> usize {
            self.rows.lock().await.len()
        }

        async fn contains(&self, id: Snowflake) -> bool {
            self.rows.lock().await.contains_key(&id)
        }

        async fn insert(&self, reminder: Reminder) {
            self.rows.lock().await.insert(reminder.id, reminder);
        }
    }

    impl ReminderStore for MemoryStore {
        async fn persist(&self, reminder: &Reminder) -> Result<(), StoreError> {
            self.insert(reminder.clone()).await;
            Ok(())
        }

        async fn remove(&self, id: Snowflake) -> Result<bool, StoreError> {
            if !self.remove_delay.is_zero() {
                tokio::time::sleep(self.remove_delay).await;
            }
            Ok(self.rows.lock().await.remove(&id).is_some())
        }

        async fn purge_overdue(
            &self,
            now: DateTime<Utc>,
            keep: &[Snowflake],
        ) -> Result<u64, StoreError> {
            let mut rows = self.rows.lock().await;
            let before = rows.len();
            rows.retain(|id, r| r.fire_at > now || keep.contains(id));
            Ok(u64::try_from(before - rows.len()).unwrap_or(0))
        }

        async fn due_before(&self, until: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError> {
            let rows = self.rows.lock().await;
            let mut due: Vec<Reminder> =
                rows.values().filter(|r| r.fire_at <= until).cloned().collect();
            due.sort_by_key(|r| r.fire_at);
            Ok(due)
        }

        async fn list_for(
            &self,
            user_id: Snowflake,
            channel_id: Option<Snowflake>,
            limit: i64,
        ) -> Result<Vec<Reminder>, StoreError> {
            let rows = self.rows.lock().await;
            let mut found: Vec<Reminder> = rows
                .values()
                .filter(|r| r.user_id == user_id && channel_id.is_none_or(|c| r.channel_id == c))
                .cloned()
                .collect();
            found.sort_by_key(|r| r.fire_at);
            found.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(found)
        }
    }

    const USER: Snowflake = Snowflake::new(100);
    const CHANNEL: Snowflake = Snowflake::new(200);

    fn payload(message: &str) -> ReminderPayload {
        ReminderPayload::new(USER, None, CHANNEL, message)
    }

    type Fixture = (Arc<ReminderScheduler<MemoryStore>>, broadcast::Receiver<BotEvent>);

    fn scheduler_over(store: MemoryStore, events: EventBus, config: SchedulerConfig) -> Fixture {
        let rx = events.subscribe();
        let scheduler =
            ReminderScheduler::new(store, Arc::new(SnowflakeGenerator::default()), events, config);
        (Arc::new(scheduler), rx)
    }

    fn scheduler_with(config: SchedulerConfig) -> Fixture {
        scheduler_over(MemoryStore::default(), EventBus::new(64), config)
    }

    fn slow_removal(config: SchedulerConfig) -> Fixture {
        scheduler_over(
            MemoryStore::with_remove_delay(Duration::from_millis(200)),
            EventBus::new(64),
            config,
        )
    }

    fn scheduler() -> Fixture {
        scheduler_with(SchedulerConfig::default())
    }

    fn stored(id: i64, fire_at: DateTime<Utc>) -> Reminder {
        Reminder::new(Snowflake::new(id), fire_at, payload("stored"))
    }

    async fn next_completion(rx: &mut broadcast::Receiver<BotEvent>, within: Duration) -> Reminder {
        match tokio::time::timeout(within, rx.recv()).await {
            Ok(Ok(BotEvent::ReminderCompleted { reminder, .. })) => reminder,
            other => panic!("expected a completion event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn near_term_reminders_stay_in_memory() {
        let (scheduler, _rx) = scheduler();
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::seconds(60), payload("tea"))
            .await
        else {
            panic!("create failed");
        };
        assert!(scheduler.is_armed(reminder.id).await);
        assert_eq!(scheduler.store().len().await, 0);
    }

    #[tokio::test]
    async fn far_reminders_are_persisted_before_arming() {
        let (scheduler, _rx) = scheduler();
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::hours(1), payload("tea"))
            .await
        else {
            panic!("create failed");
        };
        assert!(scheduler.store().contains(reminder.id).await);
        assert!(scheduler.is_armed(reminder.id).await);
    }

    #[tokio::test]
    async fn fires_exactly_once_then_disappears() {
        let (scheduler, mut rx) = scheduler();
        scheduler.start().await;
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::milliseconds(200), payload("tea"))
            .await
        else {
            panic!("create failed");
        };

        let fired = next_completion(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(fired.id, reminder.id);
        assert_eq!(fired.message, "tea");
        assert!(!scheduler.is_armed(reminder.id).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.active_count().await, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn fired_persisted_reminder_is_deleted_from_store() {
        let (scheduler, mut rx) = scheduler_with(SchedulerConfig {
            durability_threshold: Duration::ZERO,
            ..SchedulerConfig::default()
        });
        scheduler.start().await;
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::milliseconds(100), payload("tea"))
            .await
        else {
            panic!("create failed");
        };
        assert!(scheduler.store().contains(reminder.id).await);

        let fired = next_completion(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(fired.id, reminder.id);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!scheduler.store().contains(reminder.id).await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_reminder_never_fires() {
        let (scheduler, mut rx) = scheduler_with(SchedulerConfig {
            durability_threshold: Duration::ZERO,
            ..SchedulerConfig::default()
        });
        scheduler.start().await;
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::milliseconds(300), payload("tea"))
            .await
        else {
            panic!("create failed");
        };
        assert!(scheduler.cancel(reminder.id).await.is_ok());
        assert!(!scheduler.is_armed(reminder.id).await);
        assert!(!scheduler.store().contains(reminder.id).await);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_unknown_reminder_is_not_found() {
        let (scheduler, _rx) = scheduler();
        let result = scheduler.cancel(Snowflake::new(404)).await;
        assert!(matches!(
            result,
            Err(StoreError::ReminderNotFound(id)) if id == Snowflake::new(404)
        ));
    }

    #[tokio::test]
    async fn cancelling_stored_but_unarmed_reminder_succeeds() {
        let (scheduler, _rx) = scheduler();
        scheduler
            .store()
            .insert(stored(7, Utc::now() + ChronoDuration::days(2)))
            .await;
        assert!(scheduler.cancel(Snowflake::new(7)).await.is_ok());
        assert_eq!(scheduler.store().len().await, 0);
    }

    #[tokio::test]
    async fn reconcile_discards_overdue_without_firing() {
        let (scheduler, mut rx) = scheduler();
        scheduler.start().await;
        let now = Utc::now();
        for id in 1..=3 {
            scheduler
                .store()
                .insert(stored(id, now - ChronoDuration::minutes(id)))
                .await;
        }
        scheduler
            .store()
            .insert(stored(10, now + ChronoDuration::hours(1)))
            .await;

        let Ok(report) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        // The startup sweep may have run first; either way every overdue
        // row is gone and the future one is armed exactly once.
        assert!(report.expired <= 3);
        assert_eq!(scheduler.store().len().await, 1);
        assert!(scheduler.is_armed(Snowflake::new(10)).await);
        assert_eq!(scheduler.active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn reconcile_counts_overdue_rows() {
        let (scheduler, _rx) = scheduler();
        let now = Utc::now();
        for id in 1..=4 {
            scheduler
                .store()
                .insert(stored(id, now - ChronoDuration::seconds(id)))
                .await;
        }
        let Ok(report) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        assert_eq!(report, ReconcileReport { expired: 4, armed: 0 });
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let (scheduler, _rx) = scheduler();
        let now = Utc::now();
        scheduler
            .store()
            .insert(stored(1, now + ChronoDuration::minutes(30)))
            .await;
        scheduler
            .store()
            .insert(stored(2, now + ChronoDuration::hours(2)))
            .await;
        scheduler
            .store()
            .insert(stored(3, now + ChronoDuration::days(3)))
            .await;

        let Ok(first) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        assert_eq!(first.armed, 2);
        let Ok(second) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        assert_eq!(second.armed, 0);
        assert_eq!(scheduler.active_count().await, 2);
        assert!(!scheduler.is_armed(Snowflake::new(3)).await);
    }

    #[tokio::test]
    async fn past_fire_time_fires_immediately() {
        let (scheduler, mut rx) = scheduler();
        scheduler.start().await;
        let Ok(reminder) = scheduler
            .create(Utc::now() - ChronoDuration::seconds(5), payload("late"))
            .await
        else {
            panic!("create failed");
        };
        let fired = next_completion(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(fired.id, reminder.id);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn missed_reminders_fire_when_configured() {
        let (scheduler, mut rx) = scheduler_with(SchedulerConfig {
            fire_missed: true,
            ..SchedulerConfig::default()
        });
        let now = Utc::now();
        scheduler
            .store()
            .insert(stored(1, now - ChronoDuration::minutes(5)))
            .await;
        scheduler.start().await;

        let fired = next_completion(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(fired.id, Snowflake::new(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.store().len().await, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn list_merges_stored_and_armed() {
        let (scheduler, _rx) = scheduler();
        let now = Utc::now();
        scheduler
            .store()
            .insert(stored(1, now + ChronoDuration::days(2)))
            .await;
        let Ok(armed) = scheduler
            .create(now + ChronoDuration::seconds(30), payload("soon"))
            .await
        else {
            panic!("create failed");
        };
        let Ok(far) = scheduler
            .create(now + ChronoDuration::hours(1), payload("later"))
            .await
        else {
            panic!("create failed");
        };

        let Ok(list) = scheduler.list_for(USER, Some(CHANNEL)).await else {
            panic!("list failed");
        };
        let ids: Vec<Snowflake> = list.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![armed.id, far.id, Snowflake::new(1)]);

        let Ok(other) = scheduler.list_for(Snowflake::new(1), None).await else {
            panic!("list failed");
        };
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn reconcile_during_cancel_does_not_rearm() {
        let (scheduler, mut rx) = slow_removal(SchedulerConfig {
            durability_threshold: Duration::ZERO,
            ..SchedulerConfig::default()
        });
        let Ok(reminder) = scheduler
            .create(Utc::now() + ChronoDuration::milliseconds(400), payload("tea"))
            .await
        else {
            panic!("create failed");
        };

        let cancelling = Arc::clone(&scheduler);
        let id = reminder.id;
        let cancel = tokio::spawn(async move { cancelling.cancel(id).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let Ok(report) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        let Ok(Ok(())) = cancel.await else {
            panic!("cancel failed");
        };
        assert_eq!(report.armed, 0);
        assert!(!scheduler.is_armed(id).await);
        assert!(!scheduler.store().contains(id).await);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn missed_reminder_fires_once_while_its_row_is_deleted() {
        let (scheduler, mut rx) = slow_removal(SchedulerConfig {
            fire_missed: true,
            ..SchedulerConfig::default()
        });
        scheduler
            .store()
            .insert(stored(1, Utc::now() - ChronoDuration::minutes(5)))
            .await;
        scheduler.start().await;

        let fired = next_completion(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(fired.id, Snowflake::new(1));
        let Ok(report) = scheduler.reconcile().await else {
            panic!("reconcile failed");
        };
        assert_eq!(report.armed, 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.store().len().await, 0);
        assert_eq!(scheduler.active_count().await, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_guild_disarms_only_that_guild() {
        let (scheduler, _rx) = scheduler();
        let guild = Snowflake::new(500);
        let at = Utc::now() + ChronoDuration::minutes(1);
        let Ok(in_guild) = scheduler
            .create(at, ReminderPayload::new(USER, Some(guild), CHANNEL, "guild"))
            .await
        else {
            panic!("create failed");
        };
        let Ok(direct) = scheduler.create(at, payload("dm")).await else {
            panic!("create failed");
        };

        assert_eq!(scheduler.cancel_guild(guild).await, vec![in_guild.id]);
        assert!(!scheduler.is_armed(in_guild.id).await);
        assert!(scheduler.is_armed(direct.id).await);
        assert!(scheduler.cancel_guild(guild).await.is_empty());
    }

    #[tokio::test]
    async fn guild_removal_event_disarms_its_reminders() {
        let events = EventBus::new(64);
        let (scheduler, mut rx) =
            scheduler_over(MemoryStore::default(), events.clone(), SchedulerConfig::default());
        scheduler.start().await;
        let guild = Snowflake::new(501);
        let Ok(reminder) = scheduler
            .create(
                Utc::now() + ChronoDuration::milliseconds(300),
                ReminderPayload::new(USER, Some(guild), CHANNEL, "gone"),
            )
            .await
        else {
            panic!("create failed");
        };

        events.publish(BotEvent::GuildRemoved {
            guild_id: guild,
            timestamp: Utc::now(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!scheduler.is_armed(reminder.id).await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, BotEvent::ReminderCompleted { .. }),
                "removed guild's reminder fired"
            );
        }
        scheduler.shutdown().await;
    }
}
