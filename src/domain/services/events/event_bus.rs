//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Central event bus for the exchange using tokio's broadcast channel.
// Publishing never blocks; the exchange publishes while holding the instrument lock.
//
// | Component     | Description                                                 |
// |---------------|-------------------------------------------------------------|
// | EventBus      | Central event bus for publishing and subscribing to events  |
//--------------------------------------------------------------------------------------------------

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::event_types::{EventError, EventResult, ExchangeEvent};

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Central event bus for publishing and subscribing to events throughout the system.
///
/// Events are distributed to all active subscribers when published. A slow subscriber that falls
/// more than `capacity` events behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExchangeEvent>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a new event bus with the specified capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of events that can be queued before
    ///   older events are dropped. Zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        info!("Created new EventBus with capacity: {}", capacity);
        Self { sender, capacity }
    }

    /// Publishes an event to all subscribers.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the event was published or there were no subscribers.
    /// * `Err(EventError)` - If the channel rejected the event.
    pub fn publish(&self, event: ExchangeEvent) -> EventResult<()> {
        if self.sender.receiver_count() == 0 {
            debug!(event_type = event.event_type(), "no subscribers for event");
            return Ok(());
        }

        debug!(event_type = event.event_type(), "publishing event");
        self.sender.send(event).map(|_| ()).map_err(|e| {
            error!("Failed to publish event: {}", e);
            EventError::PublishError(e.to_string())
        })
    }

    /// Publishes events in order, stopping at the first failure.
    pub fn publish_all<I>(&self, events: I) -> EventResult<()>
    where
        I: IntoIterator<Item = ExchangeEvent>,
    {
        events.into_iter().try_for_each(|event| self.publish(event))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        debug!(
            "New subscriber added to EventBus (total: {})",
            self.sender.receiver_count() + 1
        );
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
