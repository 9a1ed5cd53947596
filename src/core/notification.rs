//! Notifications - In-app notification rows and outbound push delivery.
//!
//! Delivery is best-effort: callers notify after their financial work has committed, and
//! a failure for one user is logged and never propagated.

use crate::{
    entities::{Notification, notification},
    errors::Result,
};
use sea_orm::{QueryOrder, Set, prelude::*};
use std::future::Future;
use tracing::{info, warn};

/// A push message addressed to one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// Recipient
    pub user_id: i64,
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
    /// Machine-readable kind, e.g. `hsi_warning`
    pub kind: String,
}

/// Outbound push delivery
pub trait PushNotifier: Send + Sync {
    /// Delivers one message.
    fn send(&self, message: &PushMessage) -> impl Future<Output = Result<()>> + Send;
}

/// Push notifier that only writes the message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPushNotifier;

impl PushNotifier for LogPushNotifier {
    async fn send(&self, message: &PushMessage) -> Result<()> {
        info!(
            user_id = message.user_id,
            kind = %message.kind,
            "Push: {} - {}",
            message.title,
            message.body
        );
        Ok(())
    }
}

/// Stores an unread in-app notification.
pub async fn create_in_app_notification<C>(
    db: &C,
    user_id: i64,
    kind: &str,
    title: &str,
    message: &str,
) -> Result<notification::Model>
where
    C: ConnectionTrait,
{
    let model = notification::ActiveModel {
        user_id: Set(user_id),
        kind: Set(kind.to_string()),
        title: Set(title.to_string()),
        message: Set(message.to_string()),
        is_read: Set(false),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model)
}

/// Notifications of a user, newest first.
pub async fn get_notifications<C>(db: &C, user_id: i64) -> Result<Vec<notification::Model>>
where
    C: ConnectionTrait,
{
    Notification::find()
        .filter(notification::Column::UserId.eq(user_id))
        .order_by_desc(notification::Column::CreatedAt)
        .order_by_desc(notification::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sends an in-app notification and a push to each user.
///
/// Returns the number of users for whom both steps succeeded.
pub async fn notify_users<C, N>(
    db: &C,
    notifier: &N,
    user_ids: &[i64],
    kind: &str,
    title: &str,
    body: &str,
) -> usize
where
    C: ConnectionTrait,
    N: PushNotifier,
{
    let mut delivered = 0;
    for &user_id in user_ids {
        if let Err(e) = create_in_app_notification(db, user_id, kind, title, body).await {
            warn!(user_id, kind, "Failed to store notification: {e}");
            continue;
        }
        let message = PushMessage {
            user_id,
            title: title.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
        };
        match notifier.send(&message).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(user_id, kind, "Failed to send push notification: {e}"),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_notify_users_stores_and_pushes() -> Result<()> {
        let db = setup_test_db().await?;
        let notifier = RecordingNotifier::default();

        let delivered = notify_users(&db, &notifier, &[1, 2], "hsi_warning", "Heads up", "Score dropped").await;
        assert_eq!(delivered, 2);
        assert_eq!(notifier.sent().len(), 2);

        let stored = get_notifications(&db, 2).await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, "hsi_warning");
        assert!(!stored[0].is_read);
        Ok(())
    }

    #[tokio::test]
    async fn test_push_failures_are_swallowed() -> Result<()> {
        let db = setup_test_db().await?;
        let notifier = RecordingNotifier::failing();

        let delivered = notify_users(&db, &notifier, &[1, 2, 3], "hsi_warning", "t", "b").await;
        assert_eq!(delivered, 0);
        // In-app rows are still written
        assert_eq!(get_notifications(&db, 3).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let message = PushMessage {
            user_id: 1,
            title: "t".to_string(),
            body: "b".to_string(),
            kind: "k".to_string(),
        };
        assert!(LogPushNotifier.send(&message).await.is_ok());
    }
}
