//! Notifier gateway
//!
//! Accepts a notification intent and dispatches it per recipient preference:
//! a disabled category skips, quiet hours suppress, the channel mask selects
//! delivery paths. Delivery is best-effort; one successful channel counts as
//! delivered, failures are logged and picked up later by the worker's
//! re-attempt job.

pub mod channels;

use serde::Serialize;
use sqlx::PgPool;
use time::Time;
use uuid::Uuid;

use crate::error::ApiResult;
use channels::{ChannelMessage, Channels};

/// Notification category, keyed together with the user in preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Subscription,
    Wallet,
    Health,
    Geofence,
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Wallet => "wallet",
            Self::Health => "health",
            Self::Geofence => "geofence",
            Self::System => "system",
        }
    }
}

/// Who an intent addresses
#[derive(Debug, Clone, Copy)]
pub enum Audience {
    User(Uuid),
    Family(Uuid),
}

/// A notification intent; rendering and delivery are channel concerns
#[derive(Debug, Clone)]
pub struct NotificationIntent {
    pub audience: Audience,
    pub category: Category,
    pub title: String,
    pub body: String,
    pub target_url: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    user_id: Uuid,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PreferenceRow {
    enabled: bool,
    quiet_hours_start: Option<Time>,
    quiet_hours_end: Option<Time>,
    channel_mask: i32,
}

impl Default for PreferenceRow {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            channel_mask: channels::CHANNEL_PUSH
                | channels::CHANNEL_MESSENGER
                | channels::CHANNEL_SMS
                | channels::CHANNEL_EMAIL,
        }
    }
}

/// Notifier gateway service
#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
    channels: Channels,
}

impl Notifier {
    pub fn new(pool: PgPool, channels: Channels) -> Self {
        Self { pool, channels }
    }

    /// Dispatch an intent to its audience, best-effort. Never returns a
    /// delivery error; the event ledger records what went out.
    pub async fn dispatch(&self, intent: &NotificationIntent) {
        let recipients = match self.resolve_audience(intent.audience).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "Notifier could not resolve audience");
                return;
            }
        };

        for recipient in recipients {
            if let Err(e) = self.dispatch_to(&recipient, intent).await {
                tracing::error!(
                    user_id = %recipient.user_id,
                    category = intent.category.as_str(),
                    error = %e,
                    "Notification dispatch failed"
                );
            }
        }
    }

    async fn dispatch_to(
        &self,
        recipient: &RecipientRow,
        intent: &NotificationIntent,
    ) -> ApiResult<()> {
        let preference = self
            .preference(recipient.user_id, intent.category)
            .await?
            .unwrap_or_default();

        if !preference.enabled {
            tracing::debug!(
                user_id = %recipient.user_id,
                category = intent.category.as_str(),
                "Notification skipped: category disabled"
            );
            return Ok(());
        }

        let now = time::OffsetDateTime::now_utc().time();
        if in_quiet_hours(now, preference.quiet_hours_start, preference.quiet_hours_end) {
            // Recorded undelivered; the worker re-attempts after the window
            self.record_event(recipient.user_id, intent, false, 0).await?;
            return Ok(());
        }

        let delivered = self
            .channels
            .deliver(
                preference.channel_mask,
                &ChannelMessage {
                    user_id: recipient.user_id,
                    email: recipient.email.as_deref(),
                    phone: recipient.phone.as_deref(),
                    title: &intent.title,
                    body: &intent.body,
                    target_url: intent.target_url.as_deref(),
                },
            )
            .await;

        self.record_event(recipient.user_id, intent, delivered, 1).await?;
        Ok(())
    }

    async fn resolve_audience(&self, audience: Audience) -> ApiResult<Vec<RecipientRow>> {
        let rows: Vec<RecipientRow> = match audience {
            Audience::User(user_id) => {
                sqlx::query_as("SELECT id AS user_id, email, phone FROM users WHERE id = $1")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            Audience::Family(family_id) => {
                sqlx::query_as(
                    r#"
                    SELECT u.id AS user_id, u.email, u.phone
                    FROM family_members m
                    JOIN users u ON u.id = m.user_id
                    WHERE m.family_id = $1 AND m.user_id IS NOT NULL
                    "#,
                )
                .bind(family_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn preference(
        &self,
        user_id: Uuid,
        category: Category,
    ) -> ApiResult<Option<PreferenceRow>> {
        let row: Option<PreferenceRow> = sqlx::query_as(
            r#"
            SELECT enabled, quiet_hours_start, quiet_hours_end, channel_mask
            FROM notification_preferences
            WHERE user_id = $1 AND category = $2
            "#,
        )
        .bind(user_id)
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_event(
        &self,
        user_id: Uuid,
        intent: &NotificationIntent,
        delivered: bool,
        attempts: i32,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_events
                (user_id, category, title, body, target_url, notified, attempts, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $6 THEN NOW() ELSE NULL END)
            "#,
        )
        .bind(user_id)
        .bind(intent.category.as_str())
        .bind(&intent.title)
        .bind(&intent.body)
        .bind(intent.target_url.as_deref())
        .bind(delivered)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-attempt undelivered events; called by the worker on a schedule.
    /// Quiet hours are re-evaluated at attempt time.
    pub async fn retry_undelivered(&self, limit: i64) -> ApiResult<u64> {
        #[derive(sqlx::FromRow)]
        struct EventRow {
            id: Uuid,
            user_id: Uuid,
            category: String,
            title: String,
            body: String,
            target_url: Option<String>,
            attempts: i32,
        }

        let events: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT e.id, e.user_id, e.category, e.title, e.body, e.target_url, e.attempts
            FROM notification_events e
            WHERE e.notified = FALSE AND e.attempts < 5
            ORDER BY e.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut delivered_count = 0u64;
        for event in events {
            let recipient: Option<RecipientRow> =
                sqlx::query_as("SELECT id AS user_id, email, phone FROM users WHERE id = $1")
                    .bind(event.user_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let Some(recipient) = recipient else {
                continue;
            };

            let preference: PreferenceRow = sqlx::query_as(
                r#"
                SELECT enabled, quiet_hours_start, quiet_hours_end, channel_mask
                FROM notification_preferences
                WHERE user_id = $1 AND category = $2
                "#,
            )
            .bind(event.user_id)
            .bind(&event.category)
            .fetch_optional(&self.pool)
            .await?
            .unwrap_or_default();

            let now = time::OffsetDateTime::now_utc().time();
            if !preference.enabled
                || in_quiet_hours(now, preference.quiet_hours_start, preference.quiet_hours_end)
            {
                continue;
            }

            let delivered = self
                .channels
                .deliver(
                    preference.channel_mask,
                    &ChannelMessage {
                        user_id: recipient.user_id,
                        email: recipient.email.as_deref(),
                        phone: recipient.phone.as_deref(),
                        title: &event.title,
                        body: &event.body,
                        target_url: event.target_url.as_deref(),
                    },
                )
                .await;

            sqlx::query(
                r#"
                UPDATE notification_events
                SET attempts = $2,
                    notified = $3,
                    delivered_at = CASE WHEN $3 THEN NOW() ELSE delivered_at END
                WHERE id = $1
                "#,
            )
            .bind(event.id)
            .bind(event.attempts + 1)
            .bind(delivered)
            .execute(&self.pool)
            .await?;

            if delivered {
                delivered_count += 1;
            }
        }

        Ok(delivered_count)
    }
}

/// Quiet hours suppress delivery; a window may wrap past midnight.
/// A missing bound means no quiet hours.
pub fn in_quiet_hours(now: Time, start: Option<Time>, end: Option<Time>) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };
    if start == end {
        return false;
    }
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn t(h: u8, m: u8) -> Time {
        Time::from_hms(h, m, 0).unwrap()
    }

    #[test]
    fn quiet_hours_plain_window() {
        let start = Some(t(13, 0));
        let end = Some(t(15, 0));
        assert!(in_quiet_hours(t(14, 0), start, end));
        assert!(!in_quiet_hours(t(12, 59), start, end));
        assert!(!in_quiet_hours(t(15, 0), start, end));
    }

    #[test]
    fn quiet_hours_wrap_past_midnight() {
        let start = Some(t(22, 0));
        let end = Some(t(7, 0));
        assert!(in_quiet_hours(t(23, 30), start, end));
        assert!(in_quiet_hours(t(2, 0), start, end));
        assert!(!in_quiet_hours(t(12, 0), start, end));
    }

    #[test]
    fn missing_bounds_mean_no_quiet_hours() {
        assert!(!in_quiet_hours(t(3, 0), None, None));
        assert!(!in_quiet_hours(t(3, 0), Some(t(1, 0)), None));
        assert!(!in_quiet_hours(t(3, 0), Some(t(3, 0)), Some(t(3, 0))));
    }
}
