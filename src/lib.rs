//! # Cloud IoT Device Sessions for Embedded Systems
//!
//! `iotcore-device` is a `no_std`, `no_alloc` crate that keeps a sensor node
//! connected to a cloud IoT MQTT bridge, built upon the
//! [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Core Features
//!
//! - **Credential-gated sessions:** the broker password is a short-lived signed
//!   token. [`CredentialManager`] mints one on demand and reuses it until it
//!   expires; concurrent callers never mint twice.
//! - **Session lifecycle:** [`SessionController`] joins the network, waits for
//!   a synchronized wall clock, authenticates, subscribes to the device's
//!   config and commands topics and announces itself. Failures are retried
//!   with jittered exponential backoff and can be cancelled.
//! - **MQTT v3.1.1 client:** a small async client over any [`MqttTransport`],
//!   with buffers managed by `heapless`.
//! - **Inbound dispatch:** config and command messages are queued on an
//!   `embassy-sync` channel and handled by a [`Dispatcher`] in its own task.
//! - **Telemetry:** readings are encoded as compact JSON stamped with local time.
//!
//! ## Usage
//!
//! ```ignore
//! static INBOUND: Channel<CriticalSectionRawMutex, InboundMessage, 4> = Channel::new();
//!
//! let credentials: CredentialManager<CriticalSectionRawMutex, _> =
//!     CredentialManager::new(identity, JwtSigner::new(Es256));
//! let connector = MqttConnector::<_, 1024>::new(tls_opener);
//! let mut session = SessionController::new(
//!     &credentials,
//!     StackLink::new(stack),
//!     &clock,
//!     connector,
//!     Delay,
//!     rng,
//!     SessionConfig::new(),
//! )?
//! .with_inbound(INBOUND.dyn_sender());
//!
//! loop {
//!     session.ensure_connected(core::future::pending::<()>()).await?;
//!     let reading = Telemetry::new(identity.device_id, celsius_from_adc(adc.read()), clock.now(), 0);
//!     session.publish_telemetry(&reading).await?;
//!     session.service().await.ok();
//! }
//! ```

#![no_std]

#[macro_use]
mod fmt;

pub mod client;
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod network;
pub mod packet;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod time;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::{MqttClient, MqttEvent, MqttOptions};
pub use command::{Command, CommandInterpreter, LedInterpreter};
pub use config::SessionConfig;
pub use credentials::{AuthToken, CredentialManager, TokenSigner};
pub use error::SessionError;
pub use identity::{DeviceIdentity, DeviceTopics, InboundKind, PublishKind};
pub use jwt::{JwtSigner, SignaturePrimitive};
pub use network::{NetworkLink, StackLink};
pub use packet::QoS;
pub use retry::{Backoff, RetryPolicy};
pub use session::{Dispatcher, InboundMessage, MqttConnector, SessionController, SessionState};
pub use telemetry::{Telemetry, celsius_from_adc};
pub use time::{Clock, SyncedClock};
pub use transport::{ChannelOpener, MqttTransport, StreamTransport};
