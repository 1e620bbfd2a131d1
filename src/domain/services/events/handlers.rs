//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                       | Key Methods       |
// |-----------------|---------------------------------------------------|-------------------|
// | EventHandler    | Trait for event handling                          | handle_event      |
// | EventLogger     | Bounded in-memory history of events               | get_history       |
//--------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::event_types::{EventResult, ExchangeEvent};

/// Event handler trait for processing events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the types of events this handler processes
    fn event_types(&self) -> Vec<&'static str>;

    async fn handle_event(&self, event: ExchangeEvent) -> EventResult<()>;
}

/// A simple in-memory event logger that keeps the latest `max_history` events.
pub struct EventLogger {
    max_history: usize,
    history: Arc<RwLock<VecDeque<ExchangeEvent>>>,
}

impl EventLogger {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history))),
        }
    }

    /// Returns the event history, oldest first
    pub async fn get_history(&self) -> Vec<ExchangeEvent> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for EventLogger {
    fn event_types(&self) -> Vec<&'static str> {
        ExchangeEvent::ALL_TYPES.to_vec()
    }

    async fn handle_event(&self, event: ExchangeEvent) -> EventResult<()> {
        info!(
            event_type = event.event_type(),
            instrument_id = %event.instrument_id(),
            "exchange event"
        );

        let mut history = self.history.write().await;
        if history.len() >= self.max_history {
            history.pop_front();
        }
        if self.max_history > 0 {
            history.push_back(event);
        }
        Ok(())
    }
}
