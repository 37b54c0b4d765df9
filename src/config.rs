//! Session configuration.

use embassy_time::Duration;

use crate::packet::QoS;
use crate::retry::RetryPolicy;

pub const DEFAULT_BROKER_HOST: &str = "mqtt.googleapis.com";
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// The broker ignores the username; it authenticates on the token alone.
pub const DEFAULT_USERNAME: &str = "unused";

/// Everything about a session that is not the device identity.
#[derive(Debug, Clone)]
pub struct SessionConfig<'a> {
    broker_host: &'a str,
    broker_port: u16,
    username: &'a str,
    keep_alive: Duration,
    connected_payload: &'a [u8],
    publish_qos: QoS,
    subscribe_qos: QoS,
    retry: RetryPolicy,
    clock_sync_poll: Duration,
}

impl Default for SessionConfig<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SessionConfig<'a> {
    pub fn new() -> Self {
        Self {
            broker_host: DEFAULT_BROKER_HOST,
            broker_port: DEFAULT_BROKER_PORT,
            username: DEFAULT_USERNAME,
            keep_alive: Duration::from_secs(60),
            connected_payload: b"connected",
            publish_qos: QoS::AtMostOnce,
            subscribe_qos: QoS::AtMostOnce,
            retry: RetryPolicy::default(),
            clock_sync_poll: Duration::from_millis(10),
        }
    }

    pub fn with_broker(mut self, host: &'a str, port: u16) -> Self {
        self.broker_host = host;
        self.broker_port = port;
        self
    }

    pub fn with_username(mut self, username: &'a str) -> Self {
        self.username = username;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Payload published on the state topic once a session is up.
    pub fn with_connected_payload(mut self, payload: &'a [u8]) -> Self {
        self.connected_payload = payload;
        self
    }

    pub fn with_publish_qos(mut self, qos: QoS) -> Self {
        self.publish_qos = qos;
        self
    }

    pub fn with_subscribe_qos(mut self, qos: QoS) -> Self {
        self.subscribe_qos = qos;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How often to re-check the wall clock while waiting for it to sync.
    pub fn with_clock_sync_poll(mut self, poll: Duration) -> Self {
        self.clock_sync_poll = poll;
        self
    }

    pub fn broker_host(&self) -> &'a str {
        self.broker_host
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn username(&self) -> &'a str {
        self.username
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn connected_payload(&self) -> &'a [u8] {
        self.connected_payload
    }

    pub fn publish_qos(&self) -> QoS {
        self.publish_qos
    }

    pub fn subscribe_qos(&self) -> QoS {
        self.subscribe_qos
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn clock_sync_poll(&self) -> Duration {
        self.clock_sync_poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_cloud_iot() {
        let config = SessionConfig::default();
        assert_eq!(config.broker_host(), "mqtt.googleapis.com");
        assert_eq!(config.broker_port(), 8883);
        assert_eq!(config.username(), "unused");
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.connected_payload(), b"connected");
        assert_eq!(config.publish_qos(), QoS::AtMostOnce);
        assert_eq!(config.retry(), &RetryPolicy::default());
    }

    #[test]
    fn builder_overrides() {
        let config = SessionConfig::new()
            .with_broker("localhost", 1883)
            .with_retry(RetryPolicy::fixed(Duration::from_secs(1)).with_max_attempts(5))
            .with_clock_sync_poll(Duration::from_secs(1));
        assert_eq!(config.broker_host(), "localhost");
        assert_eq!(config.broker_port(), 1883);
        assert_eq!(config.retry().max_attempts, Some(5));
        assert_eq!(config.clock_sync_poll(), Duration::from_secs(1));
    }
}
