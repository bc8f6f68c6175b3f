//! Per-user realtime rooms
//!
//! A client joins the room keyed by its own user id and receives every
//! notification stored for that user while it stays connected. Rooms are
//! created on first join and dropped once their last receiver is gone.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::db::Notification;

/// SSE event name carrying a notification
pub const NOTIFICATION_EVENT: &str = "notification";

/// Buffered notifications per room before a slow client starts lagging
const ROOM_CAPACITY: usize = 100;

/// Registry of per-user broadcast rooms
#[derive(Clone, Default)]
pub struct RealtimeHub {
    rooms: Arc<Mutex<HashMap<i64, broadcast::Sender<Notification>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the room of `user_id`
    pub fn join(&self, user_id: i64) -> broadcast::Receiver<Notification> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        let room = rooms
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0);
        room.subscribe()
    }

    /// Push to the recipient's room; returns how many clients received it
    pub fn push(&self, notification: &Notification) -> usize {
        let Some(user_id) = notification.user_id else {
            return 0;
        };
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };

        let delivered = match rooms.get(&user_id) {
            Some(room) => room.send(notification.clone()).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            rooms.remove(&user_id);
        }
        debug!(user_id, delivered, "Realtime push");
        delivered
    }

    /// Number of rooms with at least one joined client at last push
    pub fn room_count(&self) -> usize {
        self.rooms.lock().map(|rooms| rooms.len()).unwrap_or(0)
    }

    /// SSE response for one client of `user_id`
    ///
    /// The room is joined before the response is returned, so nothing pushed
    /// after this call is missed.
    pub fn stream(&self, user_id: i64) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let rx = self.join(user_id);
        info!(user_id, "Realtime client connected");

        let stream = async_stream::stream! {
            yield Ok(Event::default()
                .event("ConnectionStatus")
                .data("connected"));

            let mut notifications = BroadcastStream::new(rx);
            while let Some(next) = notifications.next().await {
                match next {
                    Ok(notification) => match Event::default()
                        .event(NOTIFICATION_EVENT)
                        .json_data(&notification)
                    {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(error = %e, "Failed to encode notification event"),
                    },
                    Err(e) => warn!(user_id, "Realtime client lagged: {:?}", e),
                }
            }
        };

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(user_id: Option<i64>) -> Notification {
        Notification {
            id: 1,
            service: "progress-service".to_string(),
            kind: "progress.updated".to_string(),
            message: "hi".to_string(),
            user_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_push_reaches_only_the_users_room() {
        let hub = RealtimeHub::new();
        let mut mine = hub.join(12);
        let mut other = hub.join(13);

        assert_eq!(hub.push(&notification(Some(12))), 1);
        assert_eq!(mine.recv().await.unwrap().user_id, Some(12));
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_push_without_clients_is_dropped() {
        let hub = RealtimeHub::new();
        assert_eq!(hub.push(&notification(Some(12))), 0);
        assert_eq!(hub.push(&notification(None)), 0);
    }

    #[test]
    fn test_empty_rooms_are_removed() {
        let hub = RealtimeHub::new();
        let rx = hub.join(12);
        assert_eq!(hub.room_count(), 1);

        drop(rx);
        hub.push(&notification(Some(12)));
        assert_eq!(hub.room_count(), 0);
    }
}
