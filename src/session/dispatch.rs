//! Inbound message queue and its consumer.

use embassy_sync::channel::{DynamicReceiver, DynamicSender};
use heapless::{String, Vec};

use super::SessionState;
use super::events::{DropReason, EventKind, SessionEvent, emit};
use crate::command::{CommandDispatch, CommandInterpreter};
use crate::identity::{DeviceTopics, InboundKind};

pub const MAX_INBOUND_TOPIC: usize = 128;
pub const MAX_INBOUND_PAYLOAD: usize = 512;

/// Owned copy of an inbound publish, queued for the [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: InboundKind,
    pub topic: String<MAX_INBOUND_TOPIC>,
    pub payload: Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundMessage {
    pub fn new(kind: InboundKind, topic: &str, payload: &[u8]) -> Result<Self, DropReason> {
        Ok(Self {
            kind,
            topic: topic.try_into().map_err(|_| DropReason::TooLarge)?,
            payload: Vec::from_slice(payload).map_err(|_| DropReason::TooLarge)?,
        })
    }
}

/// Receives configuration pushed by the cloud.
pub trait ConfigHandler {
    fn on_config(&mut self, payload: &[u8]);
}

/// Classifies an inbound publish and queues it. Never blocks.
pub(crate) fn route_inbound(
    topics: &DeviceTopics,
    queue: Option<&DynamicSender<'_, InboundMessage>>,
    events: Option<&DynamicSender<'_, SessionEvent>>,
    state: SessionState,
    topic: &str,
    payload: &[u8],
) {
    let result = topics
        .classify(topic)
        .ok_or(DropReason::UnknownTopic)
        .and_then(|kind| InboundMessage::new(kind, topic, payload))
        .and_then(|message| {
            let queue = queue.ok_or(DropReason::NoReceiver)?;
            queue.try_send(message).map_err(|_| DropReason::QueueFull)
        });

    match result {
        Ok(()) => trace!("queued inbound message ({} bytes)", payload.len()),
        Err(reason) => emit(events, state, EventKind::InboundDropped(reason)),
    }
}

/// Drains the inbound queue and routes each message by kind.
pub struct Dispatcher<'a, H, I> {
    inbound: DynamicReceiver<'a, InboundMessage>,
    config: H,
    commands: CommandDispatch<I>,
}

impl<'a, H, I> Dispatcher<'a, H, I>
where
    H: ConfigHandler,
    I: CommandInterpreter,
{
    pub fn new(inbound: DynamicReceiver<'a, InboundMessage>, config: H, interpreter: I) -> Self {
        Self {
            inbound,
            config,
            commands: CommandDispatch::new(interpreter),
        }
    }

    /// Runs forever; spawn it as its own task.
    pub async fn run(&mut self) -> ! {
        loop {
            let message = self.inbound.receive().await;
            self.dispatch(&message);
        }
    }

    /// Handles everything already queued, without waiting.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbound.try_receive() {
            self.dispatch(&message);
            handled += 1;
        }
        handled
    }

    pub fn dispatch(&mut self, message: &InboundMessage) {
        match message.kind {
            InboundKind::Config => {
                debug!("config update ({} bytes)", message.payload.len());
                self.config.on_config(&message.payload);
            }
            InboundKind::Commands => {
                let command = self.commands.handle(&message.payload);
                debug!("command {:?}", command);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::command::Command;
    use crate::identity::DeviceIdentity;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::Channel;
    use std::vec;

    const IDENTITY: DeviceIdentity = DeviceIdentity::new("p", "l", "r", "node-7", b"k");

    #[derive(Default)]
    struct Configs(std::vec::Vec<std::vec::Vec<u8>>);

    impl ConfigHandler for &mut Configs {
        fn on_config(&mut self, payload: &[u8]) {
            self.0.push(payload.to_vec());
        }
    }

    #[derive(Default)]
    struct Commands(std::vec::Vec<Command>);

    impl CommandInterpreter for &mut Commands {
        fn interpret(&mut self, command: Command) {
            self.0.push(command);
        }
    }

    #[test]
    fn routes_by_topic_kind() {
        let topics = DeviceTopics::new(&IDENTITY).unwrap();
        let queue: Channel<NoopRawMutex, InboundMessage, 4> = Channel::new();
        let sender = queue.dyn_sender();

        for (topic, payload) in [
            ("/devices/node-7/config", &b"{\"rate\":5}"[..]),
            ("/devices/node-7/commands", &b"ledon"[..]),
            ("/devices/node-7/commands/led", &b"dance"[..]),
        ] {
            route_inbound(&topics, Some(&sender), None, SessionState::Connected, topic, payload);
        }

        let mut configs = Configs::default();
        let mut commands = Commands::default();
        let mut dispatcher = Dispatcher::new(queue.dyn_receiver(), &mut configs, &mut commands);
        assert_eq!(dispatcher.drain(), 3);
        drop(dispatcher);

        assert_eq!(configs.0, vec![b"{\"rate\":5}".to_vec()]);
        assert_eq!(
            commands.0,
            vec![Command::Led(crate::command::LedState::On), Command::Unrecognized]
        );
    }

    #[test]
    fn drops_are_reported_as_events() {
        let topics = DeviceTopics::new(&IDENTITY).unwrap();
        let queue: Channel<NoopRawMutex, InboundMessage, 1> = Channel::new();
        let events: Channel<NoopRawMutex, SessionEvent, 8> = Channel::new();
        let sender = queue.dyn_sender();
        let event_sender = events.dyn_sender();
        let oversized = [0u8; MAX_INBOUND_PAYLOAD + 1];

        let route = |topic: &str, payload: &[u8]| {
            route_inbound(
                &topics,
                Some(&sender),
                Some(&event_sender),
                SessionState::Connected,
                topic,
                payload,
            )
        };
        route("/devices/other/config", &b"x"[..]);
        route("/devices/node-7/config", &oversized[..]);
        route("/devices/node-7/config", &b"a"[..]);
        route("/devices/node-7/config", &b"b"[..]);

        let reasons: std::vec::Vec<EventKind> = core::iter::from_fn(|| events.try_receive().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            reasons,
            vec![
                EventKind::InboundDropped(DropReason::UnknownTopic),
                EventKind::InboundDropped(DropReason::TooLarge),
                EventKind::InboundDropped(DropReason::QueueFull),
            ]
        );
        assert_eq!(queue.try_receive().unwrap().payload.as_slice(), b"a");
    }

    #[test]
    fn missing_queue_drops_message() {
        let topics = DeviceTopics::new(&IDENTITY).unwrap();
        let events: Channel<NoopRawMutex, SessionEvent, 2> = Channel::new();
        route_inbound(
            &topics,
            None,
            Some(&events.dyn_sender()),
            SessionState::Connected,
            "/devices/node-7/commands",
            b"ledon",
        );
        assert_eq!(
            events.try_receive().unwrap().kind,
            EventKind::InboundDropped(DropReason::NoReceiver)
        );
    }
}
