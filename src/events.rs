use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::models::{DeliveryLocation, LocationSuggestion};

/// Which feed produced the current suggestion list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SuggestionSource {
    Popular,
    Recent,
    Search,
}

/// Events emitted while the picker is open. Consumers drive UI updates
/// from these instead of polling the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PickerEvent {
    SuggestionsChanged {
        source: SuggestionSource,
        items: Vec<LocationSuggestion>,
    },
    CandidateReady(LocationSuggestion),
    EligibilityRejected {
        reason: String,
    },
    Confirmed(DeliveryLocation),
}

/// Cloneable handle for emitting picker events.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<PickerEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<PickerEvent>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: PickerEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Send, logging instead of failing when the receiver is gone. Used on
    /// paths where a dropped listener must not abort the flow.
    pub async fn send_or_log(&self, event: PickerEvent) {
        if let Err(e) = self.send(event).await {
            error!("Failed to send event: {}", e);
        }
    }
}

pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<PickerEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &PickerEvent);
}

/// Logs every event at info level.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &PickerEvent) {
        match event {
            PickerEvent::SuggestionsChanged { source, items } => {
                info!(source = %source, count = items.len(), "Suggestions changed");
            }
            PickerEvent::CandidateReady(suggestion) => {
                info!(title = %suggestion.title, kind = %suggestion.kind, "Candidate ready");
            }
            PickerEvent::EligibilityRejected { reason } => {
                info!(reason = %reason, "Eligibility rejected");
            }
            PickerEvent::Confirmed(location) => {
                info!(title = %location.title(), source = %location.source(), "Location confirmed");
            }
        }
    }
}

/// Fan each received event out to every handler until the channel closes.
pub async fn process_events(
    mut receiver: mpsc::Receiver<PickerEvent>,
    handlers: Vec<std::sync::Arc<dyn EventHandler>>,
) {
    while let Some(event) = receiver.recv().await {
        join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
    }
    info!("Event channel closed, stopping event processing");
}
