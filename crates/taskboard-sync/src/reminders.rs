//! Due-date reminders.
//!
//! Scheduling a task spawns a one-shot timer. When it fires the task is read
//! again and a `TaskDue` notification goes to each associated user, but only
//! if the task still exists with the due date the timer was armed for.
//! Users whose notification preference is `none` are skipped.
//! Rescheduling a task replaces its pending timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use taskboard_domain::{NotificationPreference, Task, TaskId};
use taskboard_store::BoardStore;
use tokio::task::AbortHandle;

use crate::services::{Notification, NotificationService};

#[derive(Clone)]
pub struct ReminderScheduler {
    store: Arc<dyn BoardStore>,
    notifier: Arc<dyn NotificationService>,
    lead: ChronoDuration,
    pending: Arc<DashMap<TaskId, PendingReminder>>,
}

struct PendingReminder {
    handle: AbortHandle,
    due_date: DateTime<Utc>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn BoardStore>,
        notifier: Arc<dyn NotificationService>,
        lead_minutes: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            lead: ChronoDuration::minutes(i64::from(lead_minutes)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Arm (or re-arm) the reminder for `task`. Returns whether a timer was started.
    pub fn schedule(&self, task: &Task) -> bool {
        self.cancel(task.id);

        let Some(due_date) = task.due_date else {
            return false;
        };
        if task.associated_users.is_empty() {
            return false;
        }
        let fire_at = due_date - self.lead;
        let Ok(delay) = (fire_at - Utc::now()).to_std() else {
            tracing::debug!(task_id = %task.id, %due_date, "due date already passed, no reminder");
            return false;
        };

        let task_id = task.id;
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler
                .pending
                .remove_if(&task_id, |_, pending| pending.due_date == due_date);
            scheduler.fire(task_id, due_date).await;
        });
        self.pending.insert(
            task_id,
            PendingReminder {
                handle: handle.abort_handle(),
                due_date,
            },
        );
        tracing::debug!(%task_id, %fire_at, "reminder scheduled");
        true
    }

    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.pending.remove(&task_id) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.pending.iter() {
            entry.value().handle.abort();
        }
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Due date the pending timer for `task_id` was armed for.
    pub fn armed_for(&self, task_id: TaskId) -> Option<DateTime<Utc>> {
        self.pending.get(&task_id).map(|pending| pending.due_date)
    }

    async fn fire(&self, task_id: TaskId, armed_for: DateTime<Utc>) {
        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::debug!(%task_id, "task gone before reminder fired");
                return;
            }
            Err(error) => {
                tracing::warn!(%task_id, %error, "failed to load task for reminder");
                return;
            }
        };
        if task.due_date != Some(armed_for) {
            tracing::debug!(%task_id, "due date changed, stale reminder skipped");
            return;
        }

        for user_id in &task.associated_users {
            let user = match self.store.get_user(*user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%task_id, %user_id, %error, "failed to load user for reminder");
                    continue;
                }
            };
            if user.notification_preference == NotificationPreference::None {
                tracing::debug!(%task_id, %user_id, "reminders disabled by preference");
                continue;
            }
            let notification = Notification::TaskDue {
                task_id,
                title: task.title.clone(),
                due_date: armed_for,
                priority: task.priority,
                preference: user.notification_preference,
                timezone: user.effective_timezone().to_string(),
            };
            if let Err(error) = self.notifier.send(*user_id, notification).await {
                tracing::warn!(%task_id, %user_id, %error, "failed to send reminder");
            }
        }
    }
}
