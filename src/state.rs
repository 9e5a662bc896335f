use std::sync::Arc;

use crate::config::Config;
use crate::counter::{AtomicCounter, ViewerCounterStore};
use crate::services::user_directory::SharedUserDirectory;
use crate::services::StreamService;
use crate::store::SharedStreamStore;
use crate::websocket::{
    ConnectionGateway, EventBroadcaster, PubSubTransport, StreamTopicRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SharedStreamStore,
    pub registry: StreamTopicRegistry,
    pub counters: ViewerCounterStore,
    pub broadcaster: EventBroadcaster,
    pub gateway: Arc<ConnectionGateway>,
    pub streams: Arc<StreamService>,
}

impl AppState {
    /// Wire the full pipeline from its injected backends. Tests assemble
    /// the same graph over in-memory implementations.
    pub fn assemble(
        config: Arc<Config>,
        store: SharedStreamStore,
        users: SharedUserDirectory,
        counter: Arc<dyn AtomicCounter>,
        transport: Arc<dyn PubSubTransport>,
    ) -> Self {
        let registry = StreamTopicRegistry::new();
        let broadcaster = EventBroadcaster::new(registry.clone(), transport);
        let counters = ViewerCounterStore::new(counter, store.clone());
        let gateway = Arc::new(ConnectionGateway::new(
            store.clone(),
            users.clone(),
            counters.clone(),
            broadcaster.clone(),
            registry.clone(),
        ));
        let streams = Arc::new(StreamService::new(
            store.clone(),
            users,
            counters.clone(),
            broadcaster.clone(),
            gateway.clone(),
        ));

        Self {
            config,
            store,
            registry,
            counters,
            broadcaster,
            gateway,
            streams,
        }
    }
}
