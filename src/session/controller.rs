use core::future::Future;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::DynamicSender;
use embedded_hal_async::delay::DelayNs;
use heapless::String;
use rand_core::RngCore;

use super::broker::{BrokerConnector, BrokerSession, Incoming};
use super::dispatch::{InboundMessage, route_inbound};
use super::events::{EventKind, SessionEvent, emit};
use super::SessionState;
use crate::config::SessionConfig;
use crate::credentials::{CredentialManager, TokenSigner};
use crate::error::SessionError;
use crate::identity::{DeviceTopics, PublishKind};
use crate::network::NetworkLink;
use crate::retry::Backoff;
use crate::telemetry::{MAX_TELEMETRY_LEN, Telemetry};
use crate::time::Clock;

/// Owns one device's broker session and drives it through its lifecycle.
///
/// The controller borrows the [`CredentialManager`] and asks it for a token
/// only when it authenticates a new session. All other collaborators are
/// owned and reached through traits, so the whole state machine runs against
/// fakes in tests.
pub struct SessionController<'a, M, S, L, C, K, D, R>
where
    M: RawMutex,
    K: BrokerConnector,
{
    credentials: &'a CredentialManager<M, S>,
    link: L,
    clock: C,
    connector: K,
    delay: D,
    backoff: Backoff<R>,
    config: SessionConfig<'a>,
    topics: DeviceTopics,
    state: SessionState,
    session: Option<K::Session>,
    inbound: Option<DynamicSender<'a, InboundMessage>>,
    events: Option<DynamicSender<'a, SessionEvent>>,
}

impl<'a, M, S, L, C, K, D, R> SessionController<'a, M, S, L, C, K, D, R>
where
    M: RawMutex,
    S: TokenSigner,
    L: NetworkLink,
    C: Clock,
    K: BrokerConnector,
    D: DelayNs,
    R: RngCore,
{
    /// Builds a disconnected controller.
    ///
    /// Fails if the device identity cannot be turned into a client id and topics.
    pub fn new(
        credentials: &'a CredentialManager<M, S>,
        link: L,
        clock: C,
        connector: K,
        delay: D,
        rng: R,
        config: SessionConfig<'a>,
    ) -> Result<Self, SessionError> {
        let topics = DeviceTopics::new(credentials.identity())?;
        Ok(Self {
            credentials,
            link,
            clock,
            connector,
            delay,
            backoff: Backoff::new(*config.retry(), rng),
            config,
            topics,
            state: SessionState::Disconnected,
            session: None,
            inbound: None,
            events: None,
        })
    }

    /// Queue inbound config and command messages are copied into.
    pub fn with_inbound(mut self, sender: DynamicSender<'a, InboundMessage>) -> Self {
        self.inbound = Some(sender);
        self
    }

    /// Channel that receives a [`SessionEvent`] for every lifecycle event.
    pub fn with_events(mut self, sender: DynamicSender<'a, SessionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Brings the session up, or returns immediately if it already is.
    ///
    /// Failed attempts are retried per the configured [`RetryPolicy`](crate::retry::RetryPolicy)
    /// until one of:
    /// - an attempt succeeds,
    /// - the attempt budget runs out (the last error is returned),
    /// - `cancel` resolves (the last error is returned, or
    ///   [`SessionError::Cancelled`] if no attempt had failed yet),
    /// - an error that retrying cannot fix occurs, such as a signing failure.
    ///
    /// On any failure the controller is left [`SessionState::Disconnected`].
    pub async fn ensure_connected<F: Future>(&mut self, cancel: F) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut last_error = None;
        let outcome = select(self.connect_with_retry(&mut last_error), cancel).await;

        match outcome {
            Either::First(result) => result,
            Either::Second(_) => {
                self.emit(EventKind::Cancelled);
                self.reset();
                Err(last_error.unwrap_or(SessionError::Cancelled))
            }
        }
    }

    async fn connect_with_retry(
        &mut self,
        last_error: &mut Option<SessionError>,
    ) -> Result<(), SessionError> {
        self.backoff.reset();
        let mut attempt: u32 = 1;

        loop {
            match self.attempt().await {
                Ok(session) => {
                    self.session = Some(session);
                    self.transition(SessionState::Connected);
                    info!("session established after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(error) => {
                    *last_error = Some(error);
                    self.emit(EventKind::AttemptFailed { attempt, error });
                    self.reset();

                    if !error.is_retryable() {
                        return Err(error);
                    }
                    if !self.backoff.policy().allows_attempt(attempt + 1) {
                        self.emit(EventKind::RetriesExhausted { attempts: attempt });
                        return Err(error);
                    }

                    attempt += 1;
                    let delay = self.backoff.next_delay();
                    self.emit(EventKind::RetryScheduled {
                        attempt,
                        delay_ms: delay.as_millis(),
                    });
                    self.delay.delay_ms(saturating_ms(delay.as_millis())).await;
                }
            }
        }
    }

    /// One pass from `Disconnected` to a subscribed, announced session.
    ///
    /// The session stays local until it is fully up, so a failure or a
    /// cancellation at any await point drops the half-open connection.
    async fn attempt(&mut self) -> Result<K::Session, SessionError> {
        if !self.link.is_linked() {
            self.transition(SessionState::NetworkPending);
            self.link.join().await?;
        }
        self.transition(SessionState::NetworkReady);

        if !self.clock.is_synchronized() {
            info!("waiting for wall clock synchronization");
            let poll_ms = saturating_ms(self.config.clock_sync_poll().as_millis());
            while !self.clock.is_synchronized() {
                self.delay.delay_ms(poll_ms).await;
            }
        }

        self.transition(SessionState::Authenticating);
        let token = self.credentials.get_valid_token(self.clock.now()).await?;

        let mut session = self
            .connector
            .open(self.config.broker_host(), self.config.broker_port())
            .await?;
        session
            .authenticate(
                self.topics.client_id(),
                self.config.username(),
                token.value().as_bytes(),
                self.config.keep_alive(),
            )
            .await?;
        drop(token);

        let qos = self.config.subscribe_qos();
        for (kind, filter) in self.topics.subscriptions() {
            debug!("subscribing to {:?} topic", kind);
            session.subscribe(filter, qos).await?;
        }

        session
            .publish(
                self.topics.publish_topic(PublishKind::State),
                self.config.connected_payload(),
                self.config.publish_qos(),
            )
            .await?;

        Ok(session)
    }

    /// Publishes `payload` verbatim on the topic bound to `kind`.
    ///
    /// Fails with [`SessionError::NotConnected`] without touching the
    /// transport unless the session is up. Any other failure is returned as
    /// is and nothing is retried here. The session is dropped only if the
    /// failure broke it; a payload that does not fit the buffers leaves it up.
    pub async fn publish(&mut self, kind: PublishKind, payload: &[u8]) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let topic = self.topics.publish_topic(kind);
        match session.publish(topic, payload, self.config.publish_qos()).await {
            Ok(()) => {
                trace!("published {} bytes to {:?}", payload.len(), kind);
                Ok(())
            }
            Err(error) => {
                let still_open = session.is_open();
                self.emit(EventKind::PublishFailed { kind, error });
                if !still_open {
                    self.reset();
                }
                Err(error)
            }
        }
    }

    /// Encodes `telemetry` and publishes it on the telemetry topic.
    pub async fn publish_telemetry(&mut self, telemetry: &Telemetry<'_>) -> Result<(), SessionError> {
        let mut payload: String<MAX_TELEMETRY_LEN> = String::new();
        telemetry
            .encode(&mut payload)
            .map_err(|_| SessionError::PayloadTooLarge)?;
        self.publish(PublishKind::Telemetry, payload.as_bytes()).await
    }

    /// Classifies an inbound publish and queues it for the dispatcher.
    ///
    /// Unknown topics, oversized messages and a full queue are logged and the
    /// message is dropped.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        route_inbound(
            &self.topics,
            self.inbound.as_ref(),
            self.events.as_ref(),
            self.state,
            topic,
            payload,
        );
    }

    /// One pump step: waits for the next inbound packet and delivers it.
    ///
    /// An idle connection is kept alive with a ping. A failure drops the
    /// session; the next [`ensure_connected`](Self::ensure_connected) rebuilds it.
    pub async fn service(&mut self) -> Result<(), SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let result = match session.poll().await {
            Ok(Incoming::Message { topic, payload }) => {
                route_inbound(
                    &self.topics,
                    self.inbound.as_ref(),
                    self.events.as_ref(),
                    self.state,
                    topic,
                    payload,
                );
                Ok(())
            }
            Ok(Incoming::Idle) => session.ping().await,
            Ok(Incoming::Control) => Ok(()),
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            self.emit(EventKind::SessionLost(error));
            self.reset();
        }
        result
    }

    /// Best-effort DISCONNECT, then [`SessionState::Disconnected`].
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take()
            && let Err(error) = session.disconnect().await
        {
            debug!("disconnect failed: {:?}", error);
        }
        self.transition(SessionState::Disconnected);
    }

    fn reset(&mut self) {
        self.session = None;
        self.transition(SessionState::Disconnected);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            self.state = next;
            self.emit(EventKind::StateChanged);
        }
    }

    fn emit(&self, kind: EventKind) {
        emit(self.events.as_ref(), self.state, kind);
    }
}

fn saturating_ms(ms: u64) -> u32 {
    u32::try_from(ms).unwrap_or(u32::MAX)
}
