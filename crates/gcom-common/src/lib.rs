//! Shared plumbing for the ground station links.
//!
//! - [`EventBus`]: fan-out of link events to any number of subscribers
//! - [`Endpoint`]: a host/port pair as it appears in configuration

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event Fan-out
// ============================================================================

/// Delivers each published event once to every live subscriber.
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// publish.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        EventBus {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Send `event` to every subscriber.
    pub fn publish(&mut self, event: E) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Network endpoint from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Endpoint {
            address: address.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_subscriber_gets_one_copy() {
        let mut bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7u32);

        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![7]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish("hello".to_string());

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_endpoint_from_yaml() {
        let endpoint: Endpoint = serde_yaml::from_str("address: 127.0.0.1\nport: 14550\n").unwrap();
        assert_eq!(endpoint, Endpoint::new("127.0.0.1", 14550));
        assert_eq!(endpoint.to_string(), "127.0.0.1:14550");
    }
}
