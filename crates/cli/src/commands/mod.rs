pub mod chat;
pub mod doctor;
pub mod init;
pub mod run;
pub mod templates;

use koboldcord_core::event::{DomainEvent, EventBus};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Log every domain event at `debug` until the bus is dropped.
pub fn spawn_event_logger(events: &Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.as_ref() {
                    DomainEvent::ErrorOccurred { context, error_message, .. } => {
                        warn!(context = %context, error = %error_message, "Error event");
                    }
                    other => debug!(event = ?other, "Domain event"),
                },
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
