//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                       | Key Methods       |
// |-----------------|---------------------------------------------------|-------------------|
// | EventDispatcher | Routes events to registered handlers              | register_handler  |
// |                 |                                                   | start             |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use super::event_bus::EventBus;
use super::handlers::EventHandler;

/// Dispatches events to registered handlers.
///
/// Each handler sees its events in publication order.
pub struct EventDispatcher {
    event_bus: EventBus,
    /// Map of event types to handlers
    handlers: Arc<RwLock<HashMap<&'static str, Vec<Arc<dyn EventHandler>>>>>,
    buffer_size: usize,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("buffer_size", &self.buffer_size)
            .field("event_bus", &self.event_bus)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            buffer_size: 100,
        }
    }

    /// Registers a handler for the event types it declares in `event_types()`.
    pub async fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        for event_type in handler.event_types() {
            handlers
                .entry(event_type)
                .or_insert_with(Vec::new)
                .push(Arc::clone(&handler));
        }
        debug!(
            "Registered handler for event types: {:?}",
            handler.event_types()
        );
    }

    /// Starts the dispatcher to process events in the background.
    ///
    /// The subscription is taken before this returns, so every event published afterwards is
    /// delivered. The task ends once every `EventBus` clone has been dropped.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let handlers = Arc::clone(&self.handlers);
        let mut receiver = self.event_bus.subscribe();
        let buffer_size = self.buffer_size;
        drop(self.event_bus);

        tokio::spawn(async move {
            info!("Event dispatcher started");

            let (tx, mut rx) = mpsc::channel(buffer_size);

            let receiver_task = tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if let Err(e) = tx.send(event).await {
                                error!("Failed to send event to processing buffer: {}", e);
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event dispatcher lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            while let Some(event) = rx.recv().await {
                let event_type = event.event_type();
                let targets = handlers
                    .read()
                    .await
                    .get(event_type)
                    .cloned()
                    .unwrap_or_default();

                if targets.is_empty() {
                    debug!("No handlers registered for event type: {}", event_type);
                }
                for handler in targets {
                    if let Err(e) = handler.handle_event(event.clone()).await {
                        error!("Handler failed to process event: {}", e);
                    }
                }
            }

            if let Err(e) = receiver_task.await {
                error!("Receiver task failed: {}", e);
            }

            info!("Event dispatcher stopped");
        })
    }

    /// Sets the buffer size for event processing.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}
