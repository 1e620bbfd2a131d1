//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Post-commit notifications for collaborators that observe the exchange
// (persistence, push updates). Nothing here is on the matching path.
//
// | Component        | Description                                                |
// |------------------|------------------------------------------------------------|
// | ExchangeEvent    | Enum representing all committed mutations                  |
// | EventBus         | Central hub for publishing and subscribing to events       |
// | EventHandler     | Trait for components that can handle events                |
// | EventDispatcher  | Component that routes events to registered handlers        |
//--------------------------------------------------------------------------------------------------

mod dispatcher;
mod event_bus;
mod event_types;
mod handlers;

#[cfg(test)]
mod tests;

// Re-exports
pub use dispatcher::EventDispatcher;
pub use event_bus::{EventBus, DEFAULT_CAPACITY};
pub use event_types::{EventError, EventResult, ExchangeEvent};
pub use handlers::{EventHandler, EventLogger};
