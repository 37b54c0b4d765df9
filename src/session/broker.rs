//! The controller's view of a broker connection.
//!
//! [`BrokerConnector`] and [`BrokerSession`] are the narrow surface the
//! session controller drives. The production implementation wraps an
//! [`MqttClient`] over a freshly opened secure channel; tests substitute a
//! scripted fake.

use embassy_time::Duration;

use crate::client::{MqttClient, MqttEvent, MqttOptions};
use crate::error::SessionError;
use crate::packet::QoS;
use crate::transport::ChannelOpener;

/// What one [`BrokerSession::poll`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming<'a> {
    /// An application message on a subscribed topic.
    Message { topic: &'a str, payload: &'a [u8] },
    /// Nothing arrived before the transport's read timeout.
    Idle,
    /// Protocol traffic with no meaning to the application (acks, ping responses).
    Control,
}

/// Opens broker sessions.
#[allow(async_fn_in_trait)]
pub trait BrokerConnector {
    type Session: BrokerSession;

    /// Opens a secure channel to `host:port`. No protocol traffic yet.
    async fn open(&mut self, host: &str, port: u16) -> Result<Self::Session, SessionError>;
}

/// One protocol session over one secure channel.
///
/// After an error the controller asks [`is_open`](BrokerSession::is_open)
/// whether the session survived and drops it if not.
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    /// Whether the protocol session is still usable.
    fn is_open(&self) -> bool;

    /// Protocol handshake. A refusal is [`SessionError::HandshakeRejected`].
    async fn authenticate(
        &mut self,
        client_id: &str,
        username: &str,
        password: &[u8],
        keep_alive: Duration,
    ) -> Result<(), SessionError>;

    /// Subscribes and waits for the broker's acknowledgement.
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), SessionError>;

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), SessionError>;

    /// Waits for the next inbound packet or the transport's read timeout.
    async fn poll(&mut self) -> Result<Incoming<'_>, SessionError>;

    /// Keep-alive ping.
    async fn ping(&mut self) -> Result<(), SessionError>;

    /// Best-effort graceful close.
    async fn disconnect(&mut self) -> Result<(), SessionError>;
}

/// [`BrokerConnector`] that speaks MQTT over channels from `O`.
pub struct MqttConnector<O, const BUF_SIZE: usize> {
    opener: O,
}

impl<O: ChannelOpener, const BUF_SIZE: usize> MqttConnector<O, BUF_SIZE> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }
}

impl<O: ChannelOpener, const BUF_SIZE: usize> BrokerConnector for MqttConnector<O, BUF_SIZE> {
    type Session = MqttSession<O::Transport, BUF_SIZE>;

    async fn open(&mut self, host: &str, port: u16) -> Result<Self::Session, SessionError> {
        debug!("opening secure channel to {}:{}", host, port);
        let transport = self.opener.open(host, port).await?;
        Ok(MqttSession {
            client: MqttClient::new(transport),
        })
    }
}

/// [`BrokerSession`] backed by an [`MqttClient`].
pub struct MqttSession<T, const BUF_SIZE: usize> {
    client: MqttClient<T, BUF_SIZE>,
}

impl<T, const BUF_SIZE: usize> BrokerSession for MqttSession<T, BUF_SIZE>
where
    T: crate::transport::MqttTransport,
{
    fn is_open(&self) -> bool {
        self.client.is_connected()
    }

    async fn authenticate(
        &mut self,
        client_id: &str,
        username: &str,
        password: &[u8],
        keep_alive: Duration,
    ) -> Result<(), SessionError> {
        let options = MqttOptions::new(client_id)
            .with_keep_alive(keep_alive)
            .with_credentials(username, password)
            .with_clean_session(true);
        Ok(self.client.connect(&options).await?)
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), SessionError> {
        Ok(self.client.subscribe(filter, qos).await?)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), SessionError> {
        Ok(self.client.publish(topic, payload, qos).await?)
    }

    async fn poll(&mut self) -> Result<Incoming<'_>, SessionError> {
        let incoming = match self.client.poll().await? {
            Some(MqttEvent::Publish(publish)) => Incoming::Message {
                topic: publish.topic,
                payload: publish.payload,
            },
            Some(_) => Incoming::Control,
            None => Incoming::Idle,
        };
        Ok(incoming)
    }

    async fn ping(&mut self) -> Result<(), SessionError> {
        Ok(self.client.ping().await?)
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        Ok(self.client.disconnect().await?)
    }
}
