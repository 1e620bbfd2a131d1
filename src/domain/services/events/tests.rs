#[cfg(test)]
pub mod tests {
    use crate::domain::models::instrument::LifecycleState;
    use crate::domain::models::types::{Order, OrderSource, Side, Trade, HOUSE_ACCOUNT};
    use crate::domain::services::events::{
        EventBus, EventDispatcher, EventError, EventHandler, EventLogger, EventResult,
        ExchangeEvent,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    // Helper to create a test order
    fn create_test_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Side::Bid,
            dec!(55),
            1,
            OrderSource::LimitOrder,
        )
    }

    // Helper to create a test trade
    fn create_test_trade() -> Trade {
        Trade {
            id: Uuid::new_v4(),
            instrument_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: HOUSE_ACCOUNT,
            buy_order_id: None,
            sell_order_id: None,
            price: dec!(60),
            quantity: 1,
            created_at: Utc::now(),
        }
    }

    /// Waits until `logger` holds `expected` events or a second has passed.
    async fn wait_for_history(logger: &EventLogger, expected: usize) -> Vec<ExchangeEvent> {
        for _ in 0..100 {
            let history = logger.get_history().await;
            if history.len() >= expected {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        logger.get_history().await
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::default();
        let mut subscriber = event_bus.subscribe();

        let order = create_test_order();
        event_bus
            .publish(ExchangeEvent::OrderAccepted {
                order: order.clone(),
                timestamp: Utc::now(),
            })
            .unwrap();

        match subscriber.recv().await.unwrap() {
            ExchangeEvent::OrderAccepted {
                order: received, ..
            } => assert_eq!(received.id, order.id),
            other => panic!("Received unexpected event type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_subscribers_is_not_an_error() {
        let event_bus = EventBus::default();
        assert_eq!(event_bus.subscriber_count(), 0);

        let result = event_bus.publish(ExchangeEvent::TradeExecuted {
            trade: create_test_trade(),
            timestamp: Utc::now(),
        });
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_event_logger_keeps_order_and_bound() {
        let event_bus = EventBus::default();
        let logger = Arc::new(EventLogger::new(2));

        let dispatcher = EventDispatcher::new(event_bus.clone());
        dispatcher.register_handler(logger.clone()).await;
        let _handle = dispatcher.start();

        let instrument_id = Uuid::new_v4();
        let transitions = [
            (LifecycleState::Upcoming, LifecycleState::Live),
            (LifecycleState::Live, LifecycleState::Final),
        ];
        event_bus
            .publish(ExchangeEvent::OrderAccepted {
                order: create_test_order(),
                timestamp: Utc::now(),
            })
            .unwrap();
        event_bus
            .publish_all(transitions.iter().map(|(from, to)| {
                ExchangeEvent::LifecycleChanged {
                    instrument_id,
                    from: *from,
                    to: *to,
                    timestamp: Utc::now(),
                }
            }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let history = wait_for_history(&logger, 2).await;

        assert_eq!(history.len(), 2);
        let seen: Vec<(LifecycleState, LifecycleState)> = history
            .iter()
            .filter_map(|event| match event {
                ExchangeEvent::LifecycleChanged { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(seen, transitions.to_vec());
    }

    /// Counts the events it is registered for, failing on every other one.
    struct FlakyTradeCounter {
        processed_count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler for FlakyTradeCounter {
        fn event_types(&self) -> Vec<&'static str> {
            vec!["TradeExecuted"]
        }

        async fn handle_event(&self, event: ExchangeEvent) -> EventResult<()> {
            let seen = self.processed_count.fetch_add(1, Ordering::SeqCst);
            if seen % 2 == 1 {
                return Err(EventError::ProcessingError(format!(
                    "Simulated failure processing {}",
                    event.event_type()
                )));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatcher_routes_by_type_and_survives_failures() {
        let event_bus = EventBus::default();
        let counter = Arc::new(FlakyTradeCounter {
            processed_count: AtomicUsize::new(0),
        });
        let logger = Arc::new(EventLogger::new(10));

        let dispatcher = EventDispatcher::new(event_bus.clone()).with_buffer_size(4);
        dispatcher.register_handler(counter.clone()).await;
        dispatcher.register_handler(logger.clone()).await;
        let _handle = dispatcher.start();

        for _ in 0..3 {
            event_bus
                .publish(ExchangeEvent::TradeExecuted {
                    trade: create_test_trade(),
                    timestamp: Utc::now(),
                })
                .unwrap();
        }
        event_bus
            .publish(ExchangeEvent::OrderCancelled {
                order: create_test_order(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let history = wait_for_history(&logger, 4).await;
        assert_eq!(history.len(), 4);
        assert_eq!(counter.processed_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_routing_keys() {
        let order = create_test_order();
        let event = ExchangeEvent::OrderAccepted {
            order: order.clone(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "OrderAccepted");
        assert_eq!(event.instrument_id(), order.instrument_id);
        assert!(ExchangeEvent::ALL_TYPES.contains(&event.event_type()));
    }
}
