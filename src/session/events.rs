use embassy_sync::channel::DynamicSender;
use embassy_time::Instant;

use super::SessionState;
use crate::error::SessionError;
use crate::identity::PublishKind;

/// Why an inbound message never reached the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// The topic is neither the config topic nor under the commands topic.
    UnknownTopic,
    /// The topic or payload does not fit an [`InboundMessage`](super::InboundMessage).
    TooLarge,
    /// The dispatcher queue is full.
    QueueFull,
    /// No dispatcher queue is attached.
    NoReceiver,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// The controller entered the state carried by the event.
    StateChanged,
    /// Connection attempt number `attempt` failed.
    AttemptFailed { attempt: u32, error: SessionError },
    /// Attempt number `attempt` will start after `delay_ms`.
    RetryScheduled { attempt: u32, delay_ms: u64 },
    /// `ensure_connected` gave up after `attempts` attempts.
    RetriesExhausted { attempts: u32 },
    /// A publish failed and the session was dropped.
    PublishFailed { kind: PublishKind, error: SessionError },
    /// The session failed while being serviced.
    SessionLost(SessionError),
    /// The caller cancelled `ensure_connected`.
    Cancelled,
    /// An inbound message was dropped.
    InboundDropped(DropReason),
}

/// A structured record of one lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: EventKind,
    /// The controller state when the event happened: the state a failure
    /// occurred in, or the new state for [`EventKind::StateChanged`].
    pub state: SessionState,
    pub at: Instant,
}

/// Logs `kind` and forwards it to `sink` if one is attached.
///
/// Forwarding never blocks: when the sink is full the event is only logged.
pub(crate) fn emit(
    sink: Option<&DynamicSender<'_, SessionEvent>>,
    state: SessionState,
    kind: EventKind,
) {
    match kind {
        EventKind::StateChanged => debug!("session state: {:?}", state),
        EventKind::AttemptFailed { attempt, error } => {
            warn!("connection attempt {} failed: {:?}", attempt, error)
        }
        EventKind::RetryScheduled { attempt, delay_ms } => {
            info!("attempt {} in {} ms", attempt, delay_ms)
        }
        EventKind::RetriesExhausted { attempts } => {
            error!("giving up after {} connection attempts", attempts)
        }
        EventKind::PublishFailed { kind, error } => {
            warn!("publish to {:?} failed: {:?}", kind, error)
        }
        EventKind::SessionLost(error) => warn!("session lost: {:?}", error),
        EventKind::Cancelled => info!("connect cancelled in state {:?}", state),
        EventKind::InboundDropped(reason) => warn!("inbound message dropped: {:?}", reason),
    }

    if let Some(sink) = sink {
        let event = SessionEvent {
            kind,
            state,
            at: Instant::now(),
        };
        if sink.try_send(event).is_err() {
            trace!("event sink full");
        }
    }
}
