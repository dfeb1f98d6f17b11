use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, Counter, Gauge, Registry,
};
use std::sync::Arc;

pub struct RelayMetrics {
    pub sessions_registered: Counter,
    pub pc_connections: Counter,
    pub user_connections: Counter,
    pub active_pairings: Gauge,
    pub messages_relayed: Counter,
    pub messages_dropped: Counter,
    pub relay_failures: Counter,
    pub registry: Arc<Registry>,
}

impl RelayMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let sessions_registered = register_counter_with_registry!(
            "pin_relay_sessions_registered_total",
            "Total number of PINs registered",
            registry
        )?;

        let pc_connections = register_counter_with_registry!(
            "pin_relay_pc_connections_total",
            "Total number of PC legs attached",
            registry
        )?;

        let user_connections = register_counter_with_registry!(
            "pin_relay_user_connections_total",
            "Total number of user legs attached",
            registry
        )?;

        let active_pairings = register_gauge_with_registry!(
            "pin_relay_active_pairings",
            "Number of PINs with both legs currently live",
            registry
        )?;

        let messages_relayed = register_counter_with_registry!(
            "pin_relay_messages_relayed_total",
            "Total number of frames forwarded between legs",
            registry
        )?;

        let messages_dropped = register_counter_with_registry!(
            "pin_relay_messages_dropped_total",
            "Total number of frames dropped (no peer leg or unparseable)",
            registry
        )?;

        let relay_failures = register_counter_with_registry!(
            "pin_relay_relay_failures_total",
            "Total number of forwarding failures on live pairings",
            registry
        )?;

        Ok(Self {
            sessions_registered,
            pc_connections,
            user_connections,
            active_pairings,
            messages_relayed,
            messages_dropped,
            relay_failures,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new().unwrap()
    }
}
