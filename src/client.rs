//! # MQTT Client
//!
//! A small MQTT 3.1.1 client that owns its transport and two fixed-size
//! buffers. It implements exactly what a device session needs: an
//! authenticated CONNECT, SUBSCRIBE with acknowledgement, PUBLISH at QoS 0/1,
//! inbound message polling, keep-alive pings and DISCONNECT.
//!
//! ```ignore
//! let options = MqttOptions::new(client_id)
//!     .with_keep_alive(Duration::from_secs(60))
//!     .with_credentials("unused", token.value().as_bytes());
//! let mut client: MqttClient<_, 1024> = MqttClient::new(transport);
//! client.connect(&options).await?;
//! client.subscribe("/devices/node-1/config", QoS::AtLeastOnce).await?;
//! client.publish("/devices/node-1/state", b"connected", QoS::AtMostOnce).await?;
//! ```

use embassy_time::Duration;

use crate::error::{ConnectReasonCode, MqttError, ProtocolError, TransportFault};
use crate::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS, Subscribe,
};
use crate::transport::{MqttTransport, TransportError};
use crate::util;

/// Connection options for [`MqttClient::connect`].
#[derive(Debug, Clone)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
    keep_alive: Duration,
    clean_session: bool,
}

impl<'a> MqttOptions<'a> {
    /// Options for `client_id` with a 60 second keep-alive and a clean session.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn client_id(&self) -> &str {
        self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

/// Something the broker sent that the caller may care about.
#[derive(Debug)]
pub enum MqttEvent<'a> {
    /// An application message on a subscribed topic.
    Publish(Publish<'a>),
    /// A delivery acknowledgement that nobody was waiting for.
    PubAck(u16),
    /// A subscription acknowledgement that nobody was waiting for.
    SubAck(u16),
    /// The answer to a keep-alive ping.
    PingResp,
}

/// MQTT 3.1.1 client over an [`MqttTransport`], with `BUF_SIZE`-byte TX and RX buffers.
///
/// An application message that arrives while the client waits for a SUBACK or
/// PUBACK is acknowledged and held in a third buffer until the next
/// [`poll`](Self::poll). Only one is held; further ones are dropped.
pub struct MqttClient<T, const BUF_SIZE: usize> {
    transport: T,
    tx_buf: [u8; BUF_SIZE],
    rx_buf: [u8; BUF_SIZE],
    held_buf: [u8; BUF_SIZE],
    held_len: Option<usize>,
    next_packet_id: u16,
    connected: bool,
}

impl<T, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx_buf: [0; BUF_SIZE],
            rx_buf: [0; BUF_SIZE],
            held_buf: [0; BUF_SIZE],
            held_len: None,
            next_packet_id: 1,
            connected: false,
        }
    }

    /// Whether the broker accepted our CONNECT and nothing has failed since.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Sends CONNECT and waits for the CONNACK.
    ///
    /// A CONNACK with a non-zero return code is reported as
    /// [`MqttError::ConnectionRefused`].
    pub async fn connect(&mut self, options: &MqttOptions<'_>) -> Result<(), MqttError<T::Error>> {
        let keep_alive = options.keep_alive.as_secs().min(u16::MAX as u64) as u16;
        let mut connect = Connect::new(options.client_id, keep_alive, options.clean_session);
        connect.username = options.username;
        connect.password = options.password;

        self.held_len = None;
        self.send_packet(&connect).await?;

        let len = self.read_packet().await?;
        match packet::decode(&self.rx_buf[..len])? {
            Some(MqttPacket::ConnAck(ack)) => {
                if ack.return_code != ConnectReasonCode::Success {
                    debug!("CONNACK refused: {:?}", ack.return_code);
                    return Err(MqttError::ConnectionRefused(ack.return_code));
                }
            }
            _ => return Err(ProtocolError::UnexpectedPacket(self.rx_buf[0] >> 4).into()),
        }

        self.connected = true;
        Ok(())
    }

    /// Subscribes to one topic filter and waits for its SUBACK.
    ///
    /// The broker may start delivering on an earlier subscription before this
    /// SUBACK arrives; such a message is held for the next [`poll`](Self::poll).
    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        let packet_id = self.allocate_packet_id();
        self.send_packet(&Subscribe::new(packet_id, topic, qos)).await?;

        loop {
            let len = self.read_packet().await?;
            let inbound = match packet::decode(&self.rx_buf[..len])? {
                Some(MqttPacket::SubAck(ack)) if ack.packet_id == packet_id => {
                    if !ack.all_granted() {
                        return Err(ProtocolError::SubscriptionRejected.into());
                    }
                    return Ok(());
                }
                Some(MqttPacket::Publish(publish)) => Some(publish.packet_id),
                Some(_) => {
                    trace!("ignoring packet while waiting for SUBACK");
                    None
                }
                None => None,
            };
            if let Some(inbound_id) = inbound {
                self.hold_publish(len, inbound_id).await?;
            }
        }
    }

    /// Publishes `payload` on `topic`.
    ///
    /// QoS 1 waits for the matching PUBACK. QoS 2 is not supported by this
    /// client and is sent as QoS 1.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        let qos = if qos == QoS::ExactlyOnce { QoS::AtLeastOnce } else { qos };
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.allocate_packet_id());

        let publish = Publish {
            topic,
            qos,
            payload,
            packet_id,
        };
        self.send_packet(&publish).await?;

        let Some(packet_id) = packet_id else {
            return Ok(());
        };
        loop {
            let len = self.read_packet().await?;
            let inbound = match packet::decode(&self.rx_buf[..len])? {
                Some(MqttPacket::PubAck(ack)) if ack.packet_id == packet_id => return Ok(()),
                Some(MqttPacket::Publish(publish)) => Some(publish.packet_id),
                Some(_) => {
                    trace!("ignoring packet while waiting for PUBACK");
                    None
                }
                None => None,
            };
            if let Some(inbound_id) = inbound {
                self.hold_publish(len, inbound_id).await?;
            }
        }
    }

    /// Reads the next packet from the broker.
    ///
    /// A message held during an acknowledgement wait is returned first.
    /// Returns `Ok(None)` when the transport times out before the first byte
    /// of a packet arrives: the connection is idle, not broken. Inbound QoS 1
    /// publishes are acknowledged before they are handed out.
    pub async fn poll(&mut self) -> Result<Option<MqttEvent<'_>>, MqttError<T::Error>> {
        self.ensure_connected()?;
        if let Some(len) = self.held_len.take() {
            self.rx_buf[..len].copy_from_slice(&self.held_buf[..len]);
            return match packet::decode(&self.rx_buf[..len])? {
                Some(MqttPacket::Publish(publish)) => Ok(Some(MqttEvent::Publish(publish))),
                _ => Ok(None),
            };
        }
        if BUF_SIZE < 2 {
            return Err(MqttError::BufferTooSmall);
        }
        match self.transport.recv(&mut self.rx_buf[..1]).await {
            Ok(0) => return Err(self.fail(ProtocolError::ConnectionClosed.into())),
            Ok(_) => {}
            Err(e) if e.fault() == TransportFault::Timeout => return Ok(None),
            Err(e) => return Err(self.fail(MqttError::Transport(e))),
        }
        let len = match self.read_packet_inner(1).await {
            Ok(len) => len,
            Err(e) => return Err(self.fail(e)),
        };

        let event = match packet::decode(&self.rx_buf[..len])? {
            Some(MqttPacket::Publish(publish)) => {
                if let Some(packet_id) = publish.packet_id {
                    let ack_len = PubAck { packet_id }.encode(&mut self.tx_buf)?;
                    if let Err(e) = self.transport.send(&self.tx_buf[..ack_len]).await {
                        self.connected = false;
                        return Err(MqttError::Transport(e));
                    }
                }
                Some(MqttEvent::Publish(publish))
            }
            Some(MqttPacket::PubAck(ack)) => Some(MqttEvent::PubAck(ack.packet_id)),
            Some(MqttPacket::SubAck(ack)) => Some(MqttEvent::SubAck(ack.packet_id)),
            Some(MqttPacket::PingResp) => Some(MqttEvent::PingResp),
            Some(MqttPacket::ConnAck(_)) => {
                return Err(ProtocolError::UnexpectedPacket(2).into());
            }
            None => None,
        };
        Ok(event)
    }

    /// Sends a keep-alive PINGREQ. The PINGRESP arrives through [`poll`](Self::poll).
    pub async fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        self.send_packet(&PingReq).await
    }

    /// Sends DISCONNECT and marks the client as disconnected.
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        self.connected = false;
        self.send_packet(&Disconnect).await
    }

    /// Releases the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Acknowledges the publish in `rx_buf[..len]` and keeps a copy for `poll`.
    async fn hold_publish(
        &mut self,
        len: usize,
        packet_id: Option<u16>,
    ) -> Result<(), MqttError<T::Error>> {
        if let Some(packet_id) = packet_id {
            self.send_packet(&PubAck { packet_id }).await?;
        }
        if self.held_len.is_some() {
            warn!("inbound message dropped while waiting for an acknowledgement");
            return Ok(());
        }
        self.held_buf[..len].copy_from_slice(&self.rx_buf[..len]);
        self.held_len = Some(len);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), MqttError<T::Error>> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Packet id 0 is reserved.
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    async fn send_packet<P: EncodePacket>(&mut self, packet: &P) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx_buf)?;
        let result = self.transport.send(&self.tx_buf[..len]).await;
        result.map_err(|e| self.fail(MqttError::Transport(e)))
    }

    /// Reads exactly one packet into `rx_buf`, returning its length.
    async fn read_packet(&mut self) -> Result<usize, MqttError<T::Error>> {
        match self.read_packet_inner(0).await {
            Ok(len) => Ok(len),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// `start` is the number of header bytes already in `rx_buf` (0 or 1).
    async fn read_packet_inner(&mut self, start: usize) -> Result<usize, MqttError<T::Error>> {
        if BUF_SIZE < 2 {
            return Err(MqttError::BufferTooSmall);
        }
        self.read_exact(start, 1).await?;

        // Remaining length: one to four bytes, continuation bit 0x80.
        let mut header_len = 1;
        loop {
            if header_len >= 5 {
                return Err(ProtocolError::MalformedPacket.into());
            }
            self.read_exact(header_len, header_len + 1).await?;
            header_len += 1;
            if self.rx_buf[header_len - 1] & 0x80 == 0 {
                break;
            }
        }

        let mut cursor = 1;
        let remaining = util::read_variable_byte_integer(&mut cursor, &self.rx_buf[..header_len])?;
        let total = header_len + remaining;
        if total > BUF_SIZE {
            return Err(MqttError::BufferTooSmall);
        }
        self.read_exact(header_len, total).await?;
        Ok(total)
    }

    async fn read_exact(&mut self, start: usize, end: usize) -> Result<(), MqttError<T::Error>> {
        let mut filled = start;
        while filled < end {
            let n = self
                .transport
                .recv(&mut self.rx_buf[filled..end])
                .await
                .map_err(MqttError::Transport)?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            filled += n;
        }
        Ok(())
    }

    /// Any I/O failure ends the connection; the caller must reconnect.
    fn fail(&mut self, err: MqttError<T::Error>) -> MqttError<T::Error> {
        self.connected = false;
        err
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    enum Scripted {
        Dropped,
        Idle,
    }

    impl TransportError for Scripted {
        fn fault(&self) -> TransportFault {
            match self {
                Scripted::Dropped => TransportFault::Io,
                Scripted::Idle => TransportFault::Timeout,
            }
        }
    }

    /// Replays scripted broker bytes and records everything the client sends.
    /// Once the script runs out, reads either fail or time out.
    #[derive(Default)]
    struct ScriptedTransport {
        incoming: VecDeque<u8>,
        sent: Vec<Vec<u8>>,
        idle_when_drained: bool,
    }

    impl ScriptedTransport {
        fn with_incoming(bytes: &[u8]) -> Self {
            Self {
                incoming: bytes.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl MqttTransport for ScriptedTransport {
        type Error = Scripted;

        async fn send(&mut self, buf: &[u8]) -> Result<(), Scripted> {
            self.sent.push(buf.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Scripted> {
            if self.incoming.is_empty() {
                return Err(if self.idle_when_drained {
                    Scripted::Idle
                } else {
                    Scripted::Dropped
                });
            }
            let n = buf.len().min(self.incoming.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.incoming.pop_front().ok_or(Scripted::Dropped)?;
            }
            Ok(n)
        }
    }

    const CONNACK_OK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    #[test]
    fn connect_accepted() {
        let transport = ScriptedTransport::with_incoming(&CONNACK_OK);
        let mut client: MqttClient<_, 256> = MqttClient::new(transport);
        let options = MqttOptions::new("dev").with_credentials("unused", b"jwt");

        block_on(client.connect(&options)).unwrap();
        assert!(client.is_connected());

        let transport = client.into_transport();
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0][0], 0x10);
    }

    #[test]
    fn connect_refused_reports_return_code() {
        let transport = ScriptedTransport::with_incoming(&[0x20, 0x02, 0x00, 0x04]);
        let mut client: MqttClient<_, 256> = MqttClient::new(transport);

        let err = block_on(client.connect(&MqttOptions::new("dev"))).unwrap_err();
        assert!(matches!(
            err,
            MqttError::ConnectionRefused(ConnectReasonCode::BadUserNameOrPassword)
        ));
        assert!(!client.is_connected());
    }

    #[test]
    fn subscribe_waits_for_matching_suback() {
        let mut incoming = Vec::from(CONNACK_OK);
        // A stray publish, then the SUBACK for packet id 1.
        incoming.extend_from_slice(&[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i']);
        incoming.extend_from_slice(&[0x90, 0x03, 0x00, 0x01, 0x01]);
        let mut client: MqttClient<_, 256> =
            MqttClient::new(ScriptedTransport::with_incoming(&incoming));

        block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client.subscribe("t", QoS::AtLeastOnce).await.unwrap();
        });
    }

    #[test]
    fn publish_during_suback_wait_is_held_for_poll() {
        let mut incoming = Vec::from(CONNACK_OK);
        incoming.extend_from_slice(&[0x90, 0x03, 0x00, 0x01, 0x00]);
        // Config pushed at QoS 1 right after the first subscription.
        incoming.extend_from_slice(&[0x32, 0x08, 0x00, 0x03, b'c', b'f', b'g', 0x00, 0x07, b'x']);
        incoming.extend_from_slice(&[0x90, 0x03, 0x00, 0x02, 0x00]);
        let mut transport = ScriptedTransport::with_incoming(&incoming);
        transport.idle_when_drained = true;
        let mut client: MqttClient<_, 256> = MqttClient::new(transport);

        block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client.subscribe("cfg", QoS::AtMostOnce).await.unwrap();
            client.subscribe("cmd/#", QoS::AtMostOnce).await.unwrap();
            match client.poll().await.unwrap() {
                Some(MqttEvent::Publish(msg)) => {
                    assert_eq!(msg.topic, "cfg");
                    assert_eq!(msg.payload, b"x");
                }
                other => panic!("unexpected event: {:?}", other),
            }
            assert!(client.poll().await.unwrap().is_none());
        });

        let transport = client.into_transport();
        assert!(transport.sent.contains(&std::vec![0x40, 0x02, 0x00, 0x07]));
    }

    #[test]
    fn publish_during_puback_wait_is_held_for_poll() {
        let mut incoming = Vec::from(CONNACK_OK);
        incoming.extend_from_slice(&[0x30, 0x06, 0x00, 0x03, b'c', b'm', b'd', b'!']);
        incoming.extend_from_slice(&[0x40, 0x02, 0x00, 0x01]);
        let mut client: MqttClient<_, 256> =
            MqttClient::new(ScriptedTransport::with_incoming(&incoming));

        block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client.publish("t", b"v", QoS::AtLeastOnce).await.unwrap();
            match client.poll().await.unwrap() {
                Some(MqttEvent::Publish(msg)) => assert_eq!(msg.topic, "cmd"),
                other => panic!("unexpected event: {:?}", other),
            }
        });
    }

    #[test]
    fn oversized_publish_keeps_connection() {
        let mut client: MqttClient<_, 32> =
            MqttClient::new(ScriptedTransport::with_incoming(&CONNACK_OK));

        let err = block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client
                .publish("t", &[0u8; 64], QoS::AtMostOnce)
                .await
                .unwrap_err()
        });
        assert!(matches!(err, MqttError::BufferTooSmall));
        assert!(client.is_connected());
        assert_eq!(client.into_transport().sent.len(), 1);
    }

    #[test]
    fn rejected_subscription_is_an_error() {
        let mut incoming = Vec::from(CONNACK_OK);
        incoming.extend_from_slice(&[0x90, 0x03, 0x00, 0x01, 0x80]);
        let mut client: MqttClient<_, 256> =
            MqttClient::new(ScriptedTransport::with_incoming(&incoming));

        let err = block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client.subscribe("t", QoS::AtLeastOnce).await.unwrap_err()
        });
        assert!(matches!(
            err,
            MqttError::Protocol(ProtocolError::SubscriptionRejected)
        ));
    }

    #[test]
    fn inbound_qos1_publish_is_acknowledged() {
        let mut incoming = Vec::from(CONNACK_OK);
        incoming.extend_from_slice(&[0x32, 0x08, 0x00, 0x01, b'c', 0x00, 0x09, b'o', b'n', b'!']);
        let mut client: MqttClient<_, 256> =
            MqttClient::new(ScriptedTransport::with_incoming(&incoming));

        block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            match client.poll().await.unwrap() {
                Some(MqttEvent::Publish(msg)) => {
                    assert_eq!(msg.topic, "c");
                    assert_eq!(msg.payload, b"on!");
                }
                other => panic!("unexpected event: {:?}", other),
            }
        });

        let transport = client.into_transport();
        assert_eq!(transport.sent.last().unwrap(), &[0x40, 0x02, 0x00, 0x09]);
    }

    #[test]
    fn transport_failure_disconnects() {
        let mut client: MqttClient<_, 256> =
            MqttClient::new(ScriptedTransport::with_incoming(&CONNACK_OK));

        let err = block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            client.poll().await.map(|_| ()).unwrap_err()
        });
        assert!(matches!(err, MqttError::Transport(Scripted::Dropped)));
        assert!(!client.is_connected());
    }

    #[test]
    fn idle_read_timeout_is_not_a_failure() {
        let mut transport = ScriptedTransport::with_incoming(&CONNACK_OK);
        transport.idle_when_drained = true;
        let mut client: MqttClient<_, 256> = MqttClient::new(transport);

        block_on(async {
            client.connect(&MqttOptions::new("dev")).await.unwrap();
            assert!(client.poll().await.unwrap().is_none());
        });
        assert!(client.is_connected());
    }

    #[test]
    fn publish_requires_connection() {
        let mut client: MqttClient<_, 256> = MqttClient::new(ScriptedTransport::default());
        let err = block_on(client.publish("t", b"x", QoS::AtMostOnce)).unwrap_err();
        assert!(matches!(err, MqttError::NotConnected));
        assert!(client.into_transport().sent.is_empty());
    }
}
