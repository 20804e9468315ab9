// Event delivery
//
// Sends one event through the chat transport and acks it in storage. A failed
// ack write leaves the event pending, so it is delivered again on the next
// retry pass (at-least-once).

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::chat::{escape_html, ChatTransport, InlineButton, InlineKeyboard};
use crate::models::{Event, EventType};
use crate::store::NotifyStore;

/// Human-readable action label of an event type
pub fn event_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::PrOpened => "📖 PR OPENED",
        EventType::PrApproved => "✅ PR APPROVED",
        EventType::PrRejected => "❌ PR DECLINED",
        EventType::PrMerged => "◀️ PR MERGED",
        EventType::Comment => "💬 COMMENTED",
        EventType::PrUpdated => "👥 PR UPDATED (reviewers changed)",
    }
}

/// Render an event into HTML message text and an "Open PR" button
pub fn render_event(event: &Event) -> (String, InlineKeyboard) {
    let text = format!(
        "<b>Project:</b> {}/{}\n<b>PR:</b> {} [{}]\n<b>{}</b>: {}\n<b>Time:</b> {}",
        escape_html(&event.repo_project),
        escape_html(&event.repo_name),
        escape_html(&event.pr_title),
        event.pr_id,
        escape_html(&event.sender_name),
        event_label(event.event_type),
        event.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    let keyboard = InlineKeyboard::single_row(vec![InlineButton::url("Open PR", &event.pr_url)]);
    (text, keyboard)
}

/// Delivers events and records the ack
pub struct EventSender {
    store: Arc<dyn NotifyStore>,
    transport: Arc<dyn ChatTransport>,
}

impl EventSender {
    pub fn new(store: Arc<dyn NotifyStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { store, transport }
    }

    /// Deliver one event, returns true if the transport accepted it
    ///
    /// Transport failures leave storage untouched. A failed ack write is
    /// logged and still counts as delivered.
    pub async fn send(&self, event: &Event) -> bool {
        let (text, keyboard) = render_event(event);

        if let Err(e) = self
            .transport
            .send_message(event.recipient_chat_id, &text, Some(&keyboard))
            .await
        {
            warn!(event_id = event.id, event = %event, error = %e, "Sending event failed");
            return false;
        }

        if let Err(e) = self.store.set_event_sent(event.id, Utc::now()).await {
            error!(event_id = event.id, error = %e, "Marking event as sent failed");
        } else {
            debug!(event_id = event.id, event = %event, "Event sent");
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::memory::InMemoryStore;
    use crate::models::NewEvent;
    use crate::store::InsertOutcome;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            _keyboard: Option<&InlineKeyboard>,
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Http("connection refused".to_string()));
            }
            self.sent.lock().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn candidate(event_type: EventType) -> NewEvent {
        NewEvent {
            hash: String::new(),
            event_type,
            recipient_tg_id: 1001,
            recipient_chat_id: 42,
            sender_name: "Bob".to_string(),
            repo_project: "TEAM".to_string(),
            repo_name: "app".to_string(),
            pr_id: 7,
            pr_title: "Fix <bug>".to_string(),
            pr_url: "https://bb/pr/7".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        }
        .sealed()
    }

    async fn stored(store: &InMemoryStore, event_type: EventType) -> Event {
        match store
            .create_event_if_absent(candidate(event_type))
            .await
            .unwrap()
        {
            InsertOutcome::Created(event) => event,
            InsertOutcome::AlreadyExists => panic!("expected created"),
        }
    }

    #[test]
    fn test_render_event() {
        let event = Event::from_new(1, candidate(EventType::PrApproved));
        let (text, keyboard) = render_event(&event);

        assert_eq!(
            text,
            "<b>Project:</b> TEAM/app\n<b>PR:</b> Fix &lt;bug&gt; [7]\n<b>Bob</b>: ✅ PR APPROVED\n<b>Time:</b> 2024-03-01 12:30:00 UTC"
        );
        assert_eq!(
            keyboard.rows,
            vec![vec![InlineButton::url("Open PR", "https://bb/pr/7")]]
        );
    }

    #[test]
    fn test_rejected_and_merged_labels_are_distinct() {
        assert_eq!(event_label(EventType::PrRejected), "❌ PR DECLINED");
        assert_eq!(event_label(EventType::PrMerged), "◀️ PR MERGED");
    }

    #[tokio::test]
    async fn test_send_acks_on_success() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let sender = EventSender::new(store.clone(), transport.clone());

        let event = stored(&store, EventType::Comment).await;
        assert!(sender.send(&event).await);

        assert_eq!(transport.sent.lock()[0].0, 42);
        let after = &store.events()[0];
        assert!(after.send_ack);
        assert!(after.send_at.is_some());
    }

    #[tokio::test]
    async fn test_send_failure_leaves_event_pending() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let sender = EventSender::new(store.clone(), transport);

        let event = stored(&store, EventType::Comment).await;
        assert!(!sender.send(&event).await);

        let after = &store.events()[0];
        assert!(!after.send_ack);
        assert!(after.send_at.is_none());
    }
}
