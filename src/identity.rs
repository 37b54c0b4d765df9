//! Device identity and the names derived from it.
//!
//! Every name the broker knows the device by (the MQTT client id and the four
//! topics) is a pure function of the identity, so it is computed once when the
//! session is built and then only borrowed.

use core::fmt::{self, Write};

use heapless::String;

use crate::error::IdentityError;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum length of the MQTT client id.
pub const MAX_CLIENT_ID_LEN: usize = 256;

/// Immutable identity of one device in one registry.
#[derive(Clone, Copy)]
pub struct DeviceIdentity {
    pub project_id: &'static str,
    pub location: &'static str,
    pub registry_id: &'static str,
    pub device_id: &'static str,
    /// Private signing key, in whatever encoding the signature primitive expects.
    pub private_key: &'static [u8],
}

impl DeviceIdentity {
    pub const fn new(
        project_id: &'static str,
        location: &'static str,
        registry_id: &'static str,
        device_id: &'static str,
        private_key: &'static [u8],
    ) -> Self {
        Self {
            project_id,
            location,
            registry_id,
            device_id,
            private_key,
        }
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("registry_id", &self.registry_id)
            .field("device_id", &self.device_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Topics the device publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishKind {
    /// Telemetry events.
    Telemetry,
    /// Device state reports.
    State,
}

/// Topics the device receives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundKind {
    /// Configuration pushed by the cloud.
    Config,
    /// Commands sent to the device.
    Commands,
}

/// Client id and topics derived from a [`DeviceIdentity`].
#[derive(Debug, Clone)]
pub struct DeviceTopics {
    client_id: String<MAX_CLIENT_ID_LEN>,
    events: String<MAX_TOPIC_LEN>,
    state: String<MAX_TOPIC_LEN>,
    config: String<MAX_TOPIC_LEN>,
    commands_filter: String<MAX_TOPIC_LEN>,
}

impl DeviceTopics {
    pub fn new(identity: &DeviceIdentity) -> Result<Self, IdentityError> {
        let device = identity.device_id;
        if device.is_empty() || device.contains(['+', '#', '/', '\0']) {
            return Err(IdentityError::InvalidCharacter);
        }

        let mut client_id = String::new();
        write!(
            client_id,
            "projects/{}/locations/{}/registries/{}/devices/{}",
            identity.project_id, identity.location, identity.registry_id, device
        )
        .map_err(|_| IdentityError::TooLong)?;

        Ok(Self {
            client_id,
            events: device_topic(device, "events")?,
            state: device_topic(device, "state")?,
            config: device_topic(device, "config")?,
            commands_filter: device_topic(device, "commands/#")?,
        })
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    /// The topic a publish of `kind` goes to.
    pub fn publish_topic(&self, kind: PublishKind) -> &str {
        match kind {
            PublishKind::Telemetry => self.events.as_str(),
            PublishKind::State => self.state.as_str(),
        }
    }

    /// The filters to subscribe to, in subscription order.
    pub fn subscriptions(&self) -> [(InboundKind, &str); 2] {
        [
            (InboundKind::Config, self.config.as_str()),
            (InboundKind::Commands, self.commands_filter.as_str()),
        ]
    }

    /// Maps an inbound topic back to the subscription it arrived on.
    ///
    /// Commands may arrive on the bare commands topic or on any subfolder of it.
    pub fn classify(&self, topic: &str) -> Option<InboundKind> {
        if topic == self.config.as_str() {
            return Some(InboundKind::Config);
        }
        let commands = self.commands_filter.strip_suffix("/#")?;
        match topic.strip_prefix(commands) {
            Some("") => Some(InboundKind::Commands),
            Some(rest) if rest.starts_with('/') => Some(InboundKind::Commands),
            _ => None,
        }
    }
}

fn device_topic(device: &str, leaf: &str) -> Result<String<MAX_TOPIC_LEN>, IdentityError> {
    let mut topic = String::new();
    write!(topic, "/devices/{}/{}", device, leaf).map_err(|_| IdentityError::TooLong)?;
    Ok(topic)
}
