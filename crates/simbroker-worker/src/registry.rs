//! Per-worker table of registered brokers.
//!
//! Several brokers can share one worker. Each registers its own address, and
//! every `Simulate` call carries the address of the broker that issued it; the
//! registry turns that address back into the connection the result must be
//! pushed through.
//!
//! The table is an owned map behind a single mutex. Every operation takes the
//! lock for one read-modify-write and releases it before any I/O, so a push in
//! flight never holds the table.

use crate::link::BrokerConnector;
use parking_lot::Mutex;
use simbroker_core::{Error, Result, telemetry::add_registered_brokers, types::BrokerId};
use std::collections::HashMap;

/// Broker connections owned by one worker, keyed by broker address.
pub struct BrokerRegistry<C: BrokerConnector> {
    connector: C,
    connections: Mutex<HashMap<BrokerId, C::Link>>,
}

impl<C: BrokerConnector> BrokerRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a connection to `broker` and stores it.
    ///
    /// Registering an address that is already present closes the previous
    /// connection and replaces it, so at most one connection per broker is
    /// ever reachable. Returns `true` when a connection was replaced.
    pub fn register(&self, broker: BrokerId) -> Result<bool> {
        let link = self.connector.connect(&broker)?;
        let previous = self.connections.lock().insert(broker.clone(), link);

        match previous {
            Some(stale) => {
                tracing::debug!(%broker, "Closing previous connection for re-registered broker");
                drop(stale);
                Ok(true)
            }
            None => {
                add_registered_brokers(1);
                Ok(false)
            }
        }
    }

    /// Closes and removes the connection to `broker`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBroker`] if `broker` is not registered; the
    /// table is left untouched.
    pub fn deregister(&self, broker: &BrokerId) -> Result<()> {
        let removed = self.connections.lock().remove(broker);
        match removed {
            Some(link) => {
                drop(link);
                add_registered_brokers(-1);
                Ok(())
            }
            None => Err(Error::UnknownBroker {
                broker: broker.clone(),
            }),
        }
    }

    /// Returns the connection results for `broker` must be pushed through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Routing`] if `broker` has no live connection.
    pub fn route(&self, broker: &BrokerId) -> Result<C::Link> {
        self.connections
            .lock()
            .get(broker)
            .cloned()
            .ok_or_else(|| Error::Routing {
                broker: broker.clone(),
            })
    }

    pub fn is_registered(&self, broker: &BrokerId) -> bool {
        self.connections.lock().contains_key(broker)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::BrokerLink;
    use simbroker_core::types::SimulationResult;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Link that remembers which connection generation it belongs to.
    #[derive(Clone)]
    struct NumberedLink {
        generation: usize,
    }

    #[tonic::async_trait]
    impl BrokerLink for NumberedLink {
        async fn push_result(&self, _result: SimulationResult) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        opened: Arc<AtomicUsize>,
    }

    impl BrokerConnector for CountingConnector {
        type Link = NumberedLink;

        fn connect(&self, _broker: &BrokerId) -> Result<Self::Link> {
            let generation = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(NumberedLink { generation })
        }
    }

    #[test]
    fn re_registering_replaces_the_connection() {
        let registry = BrokerRegistry::new(CountingConnector::default());
        let broker = BrokerId::new("127.0.0.1:5000");

        assert!(!registry.register(broker.clone()).unwrap());
        assert_eq!(registry.route(&broker).unwrap().generation, 0);

        assert!(registry.register(broker.clone()).unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.route(&broker).unwrap().generation, 1);
    }

    #[test]
    fn deregistering_unknown_broker_leaves_table_unchanged() {
        let registry = BrokerRegistry::new(CountingConnector::default());
        let known = BrokerId::new("127.0.0.1:5000");
        let unknown = BrokerId::new("127.0.0.1:5001");
        registry.register(known.clone()).unwrap();

        let err = registry.deregister(&unknown).unwrap_err();
        assert!(matches!(err, Error::UnknownBroker { broker } if broker == unknown));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered(&known));
    }

    #[test]
    fn deregistered_broker_is_no_longer_routable() {
        let registry = BrokerRegistry::new(CountingConnector::default());
        let broker = BrokerId::new("127.0.0.1:5000");
        registry.register(broker.clone()).unwrap();
        registry.deregister(&broker).unwrap();

        assert!(registry.is_empty());
        assert!(matches!(
            registry.route(&broker),
            Err(Error::Routing { .. })
        ));
        assert!(matches!(
            registry.deregister(&broker),
            Err(Error::UnknownBroker { .. })
        ));
    }

    #[test]
    fn brokers_are_routed_independently() {
        let registry = BrokerRegistry::new(CountingConnector::default());
        let a = BrokerId::new("127.0.0.1:5000");
        let b = BrokerId::new("127.0.0.1:5001");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        assert_eq!(registry.route(&a).unwrap().generation, 0);
        assert_eq!(registry.route(&b).unwrap().generation, 1);
    }
}
