//! Chat log and its in-process broadcast hub.
//!
//! Every committed mutation emits one `ChatEvent` on the feed, in commit
//! order. The feed only carries deltas going forward: a subscriber that
//! was away must call `history()` to resynchronise before resuming.

use std::sync::Arc;

use log::info;
use sqlx::Row;
use tokio::sync::broadcast;

use crate::common::error::HouseError;
use crate::common::models::{ChatEvent, ChatMessage};
use crate::server::config::ServerConfig;
use crate::server::database::Database;

pub struct ChatFeed {
    sender: broadcast::Sender<ChatEvent>,
}

impl ChatFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    // A send error only means no subscriber is connected right now
    fn emit(&self, event: ChatEvent) {
        let _ = self.sender.send(event);
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        author_id: row.get("author_id"),
        text: row.get("text"),
        image_ref: row.get("image_ref"),
        created_at: row.get("created_at"),
        edited: row.get::<i64, _>("edited") != 0,
    }
}

async fn fetch(db: &Database, message_id: &str) -> Result<ChatMessage, HouseError> {
    let row = sqlx::query(
        "SELECT id, author_id, text, image_ref, created_at, edited FROM chat_messages WHERE id = ?",
    )
    .bind(message_id)
    .fetch_optional(&db.pool)
    .await?;
    row.map(|r| message_from_row(&r)).ok_or(HouseError::NotFound("message"))
}

/// Full re-fetch in commit order, the reconciliation path for clients that
/// missed feed events.
pub async fn history(db: Arc<Database>) -> Result<Vec<ChatMessage>, HouseError> {
    let rows = sqlx::query(
        "SELECT id, author_id, text, image_ref, created_at, edited FROM chat_messages ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(&db.pool)
    .await?;
    Ok(rows.iter().map(message_from_row).collect())
}

/// Posts a message; at least one of text/image must be present.
pub async fn post(
    db: Arc<Database>,
    feed: &ChatFeed,
    config: &ServerConfig,
    author_id: &str,
    text: Option<&str>,
    image_ref: Option<&str>,
) -> Result<ChatMessage, HouseError> {
    let text = text.map(|t| t.trim()).filter(|t| !t.is_empty());
    let image_ref = image_ref.map(|i| i.trim()).filter(|i| !i.is_empty());
    if text.is_none() && image_ref.is_none() {
        return Err(HouseError::Validation(
            "a message needs text or an image".to_string(),
        ));
    }
    if let Some(t) = text {
        if t.len() > config.max_message_length {
            return Err(HouseError::Validation(format!(
                "message too long (max {} chars)",
                config.max_message_length
            )));
        }
    }

    let message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        author_id: author_id.to_string(),
        text: text.map(|t| t.to_string()),
        image_ref: image_ref.map(|i| i.to_string()),
        created_at: chrono::Utc::now().timestamp(),
        edited: false,
    };
    sqlx::query(
        "INSERT INTO chat_messages (id, author_id, text, image_ref, created_at, edited) VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(&message.id)
    .bind(&message.author_id)
    .bind(&message.text)
    .bind(&message.image_ref)
    .bind(message.created_at)
    .execute(&db.pool)
    .await?;

    info!("[CHAT] Message posted by {}", author_id);
    feed.emit(ChatEvent::Inserted { message: message.clone() });
    Ok(message)
}

/// Edits the text of an own message and marks it edited.
pub async fn edit(
    db: Arc<Database>,
    feed: &ChatFeed,
    config: &ServerConfig,
    message_id: &str,
    caller: &str,
    new_text: &str,
) -> Result<ChatMessage, HouseError> {
    let new_text = new_text.trim();
    if new_text.is_empty() {
        return Err(HouseError::Validation("edited text must not be empty".to_string()));
    }
    if new_text.len() > config.max_message_length {
        return Err(HouseError::Validation(format!(
            "message too long (max {} chars)",
            config.max_message_length
        )));
    }

    let message = fetch(&db, message_id).await?;
    if message.author_id != caller {
        return Err(HouseError::NotAuthor);
    }

    sqlx::query("UPDATE chat_messages SET text = ?, edited = 1 WHERE id = ?")
        .bind(new_text)
        .bind(message_id)
        .execute(&db.pool)
        .await?;

    let message = fetch(&db, message_id).await?;
    info!("[CHAT] Message {} edited by {}", message_id, caller);
    feed.emit(ChatEvent::Updated { message: message.clone() });
    Ok(message)
}

/// Deletes an own message. The emitted event carries the last-known field
/// values, since the row is gone by the time subscribers see it.
pub async fn delete(
    db: Arc<Database>,
    feed: &ChatFeed,
    message_id: &str,
    caller: &str,
) -> Result<ChatMessage, HouseError> {
    let message = fetch(&db, message_id).await?;
    if message.author_id != caller {
        return Err(HouseError::NotAuthor);
    }

    sqlx::query("DELETE FROM chat_messages WHERE id = ?")
        .bind(message_id)
        .execute(&db.pool)
        .await?;

    info!("[CHAT] Message {} deleted by {}", message_id, caller);
    feed.emit(ChatEvent::Deleted { message: message.clone() });
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (Arc<Database>, ChatFeed, ServerConfig) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database { pool };
        db.migrate().await.unwrap();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            max_clients: 4,
            log_level: "info".to_string(),
            max_message_length: 2048,
            feed_channel_capacity: 16,
        };
        (Arc::new(db), ChatFeed::new(16), config)
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (db, feed, config) = setup().await;
        let err = post(db.clone(), &feed, &config, "m1", None, None).await.unwrap_err();
        assert!(matches!(err, HouseError::Validation(_)));
        let err = post(db, &feed, &config, "m1", Some("   "), Some("")).await.unwrap_err();
        assert!(matches!(err, HouseError::Validation(_)));
    }

    #[tokio::test]
    async fn image_only_message_is_valid() {
        let (db, feed, config) = setup().await;
        let msg = post(db, &feed, &config, "m1", None, Some("img/receipt.png")).await.unwrap();
        assert!(msg.text.is_none());
        assert_eq!(msg.image_ref.as_deref(), Some("img/receipt.png"));
    }

    #[tokio::test]
    async fn post_emits_inserted_in_commit_order() {
        let (db, feed, config) = setup().await;
        let mut rx = feed.subscribe();

        let first = post(db.clone(), &feed, &config, "m1", Some("hello"), None).await.unwrap();
        let second = post(db, &feed, &config, "m2", Some("hi"), None).await.unwrap();

        match rx.recv().await.unwrap() {
            ChatEvent::Inserted { message } => assert_eq!(message.id, first.id),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ChatEvent::Inserted { message } => assert_eq!(message.id, second.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn only_the_author_may_edit_or_delete() {
        let (db, feed, config) = setup().await;
        let msg = post(db.clone(), &feed, &config, "m1", Some("hello"), None).await.unwrap();

        let err = edit(db.clone(), &feed, &config, &msg.id, "m2", "hijack").await.unwrap_err();
        assert!(matches!(err, HouseError::NotAuthor));
        let err = delete(db.clone(), &feed, &msg.id, "m2").await.unwrap_err();
        assert!(matches!(err, HouseError::NotAuthor));

        let unchanged = history(db).await.unwrap();
        assert_eq!(unchanged[0].text.as_deref(), Some("hello"));
        assert!(!unchanged[0].edited);
    }

    #[tokio::test]
    async fn edit_updates_text_and_marks_edited() {
        let (db, feed, config) = setup().await;
        let msg = post(db.clone(), &feed, &config, "m1", Some("helo"), None).await.unwrap();
        let mut rx = feed.subscribe();

        let edited = edit(db.clone(), &feed, &config, &msg.id, "m1", "hello").await.unwrap();
        assert_eq!(edited.text.as_deref(), Some("hello"));
        assert!(edited.edited);

        match rx.recv().await.unwrap() {
            ChatEvent::Updated { message } => {
                assert_eq!(message.id, msg.id);
                assert_eq!(message.text.as_deref(), Some("hello"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn delete_emits_last_known_fields_and_empties_history() {
        let (db, feed, config) = setup().await;
        let msg = post(db.clone(), &feed, &config, "m1", Some("oops"), None).await.unwrap();
        let mut rx = feed.subscribe();

        delete(db.clone(), &feed, &msg.id, "m1").await.unwrap();

        match rx.recv().await.unwrap() {
            ChatEvent::Deleted { message } => {
                assert_eq!(message.id, msg.id);
                assert_eq!(message.text.as_deref(), Some("oops"));
                assert_eq!(message.author_id, "m1");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Absent from a fresh full re-fetch
        assert!(history(db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let (db, feed, config) = setup().await;
        let mut rx_a = feed.subscribe();
        let mut rx_b = feed.subscribe();

        let msg = post(db, &feed, &config, "m1", Some("hello"), None).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                ChatEvent::Inserted { message } => assert_eq!(message.id, msg.id),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
