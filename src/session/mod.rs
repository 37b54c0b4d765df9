//! Session lifecycle.
//!
//! The [`SessionController`] owns the connection state machine: it waits for
//! the network and a synchronized clock, authenticates with a token from the
//! credential manager, subscribes, announces itself and then keeps the session
//! alive. Every failure collapses the session back to
//! [`SessionState::Disconnected`]; there is no partial resume.
//!
//! # Inbound messages
//!
//! The controller never runs application code. Inbound publishes on the config
//! and commands topics are copied into an `embassy-sync` channel and drained by
//! a [`Dispatcher`] running in its own task:
//!
//! ```ignore
//! static INBOUND: Channel<CriticalSectionRawMutex, InboundMessage, 4> = Channel::new();
//!
//! let mut session = SessionController::new(&credentials, link, clock, connector, delay, rng, config)?
//!     .with_inbound(INBOUND.dyn_sender());
//! let mut dispatcher = Dispatcher::new(INBOUND.dyn_receiver(), config_handler, LedInterpreter::new(led));
//! ```

mod broker;
mod controller;
mod dispatch;
mod events;

pub use broker::{BrokerConnector, BrokerSession, Incoming, MqttConnector, MqttSession};
pub use controller::SessionController;
pub use dispatch::{
    ConfigHandler, Dispatcher, InboundMessage, MAX_INBOUND_PAYLOAD, MAX_INBOUND_TOPIC,
};
pub use events::{DropReason, EventKind, SessionEvent};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No session. The initial state and the state after any failure.
    Disconnected,
    /// Waiting for the network link to come up.
    NetworkPending,
    /// The link is up; waiting for the clock, then authenticating.
    NetworkReady,
    /// A token has been requested and the handshake is in progress.
    Authenticating,
    /// Subscribed and announced. The only state that allows publishing.
    Connected,
}
