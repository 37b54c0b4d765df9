//! # Error Types
//!
//! Errors are layered the same way the crate is. Wire-level codec failures
//! (`CodecError`) lift into protocol-client failures (`MqttError<T>`), which in
//! turn collapse into the transport-agnostic kinds the session controller
//! reports (`SessionError`). Credential and identity failures have their own
//! small enums so that callers can match on them without pulling in the
//! transport type.

use core::fmt;

use crate::transport::TransportError;

/// Failure while encoding or decoding an MQTT packet in a caller-provided buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The bytes do not form a valid packet.
    Protocol(ProtocolError),
    /// The buffer provided for the operation was too small.
    BufferTooSmall,
}

impl From<ProtocolError> for CodecError {
    fn from(err: ProtocolError) -> Self {
        CodecError::Protocol(err)
    }
}

/// The primary error enum for the MQTT client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying stream (TCP, TLS, UART...).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
}

impl<T> From<CodecError> for MqttError<T> {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Protocol(p) => MqttError::Protocol(p),
            CodecError::BufferTooSmall => MqttError::BufferTooSmall,
        }
    }
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

/// Represents the return codes of a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent a packet that is valid but not expected here.
    UnexpectedPacket(u8),
    /// The connection was closed by the peer.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
    /// The broker answered a SUBSCRIBE with the failure return code.
    SubscriptionRejected,
}

/// Transport-agnostic description of why a session's byte stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportFault {
    /// The secure channel could not be opened.
    Open,
    /// Reading from or writing to the channel failed.
    Io,
    /// The peer did not answer in time.
    Timeout,
    /// The peer violated the protocol or closed the stream.
    Protocol(ProtocolError),
    /// A packet did not fit the session buffers.
    BufferTooSmall,
}

/// Why a token could not be signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignFailure {
    /// The signature primitive refused the key or the message.
    KeyRejected,
    /// The token or one of its segments did not fit its buffer.
    BufferTooSmall,
}

/// Errors raised by the credential manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialError {
    /// Minting a new token failed. Never retried internally.
    SigningFailed(SignFailure),
}

impl From<SignFailure> for CredentialError {
    fn from(err: SignFailure) -> Self {
        CredentialError::SigningFailed(err)
    }
}

/// Errors raised while deriving names from a device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdentityError {
    /// A derived client id or topic does not fit its buffer.
    TooLong,
    /// The device id contains a character that is not allowed in a topic level.
    InvalidCharacter,
}

/// The network link could not be (re)established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkError;

/// Errors reported by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The credential manager could not mint a token.
    SigningFailed(SignFailure),
    /// The network link is down or could not be joined.
    LinkLost,
    /// The broker refused the protocol handshake.
    HandshakeRejected(ConnectReasonCode),
    /// The secure transport or the protocol stream failed.
    Transport(TransportFault),
    /// The operation requires a connected session.
    NotConnected,
    /// The caller cancelled `ensure_connected` before any attempt failed.
    Cancelled,
    /// The device identity cannot be turned into valid topics.
    Identity(IdentityError),
    /// An outgoing payload could not be encoded into its buffer.
    PayloadTooLarge,
}

impl SessionError {
    /// Whether `ensure_connected` keeps retrying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::LinkLost
                | SessionError::HandshakeRejected(_)
                | SessionError::Transport(_)
        )
    }
}

impl From<CredentialError> for SessionError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::SigningFailed(f) => SessionError::SigningFailed(f),
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        SessionError::Identity(err)
    }
}

impl From<LinkError> for SessionError {
    fn from(_: LinkError) -> Self {
        SessionError::LinkLost
    }
}

impl From<TransportFault> for SessionError {
    fn from(fault: TransportFault) -> Self {
        SessionError::Transport(fault)
    }
}

impl<T: TransportError> From<MqttError<T>> for SessionError {
    fn from(err: MqttError<T>) -> Self {
        match err {
            MqttError::Transport(e) => SessionError::Transport(e.fault()),
            MqttError::Protocol(p) => SessionError::Transport(TransportFault::Protocol(p)),
            MqttError::ConnectionRefused(code) => SessionError::HandshakeRejected(code),
            MqttError::NotConnected => SessionError::NotConnected,
            MqttError::BufferTooSmall => SessionError::Transport(TransportFault::BufferTooSmall),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailed(reason) => write!(f, "token signing failed: {:?}", reason),
            Self::LinkLost => write!(f, "network link lost"),
            Self::HandshakeRejected(code) => write!(f, "handshake rejected: {:?}", code),
            Self::Transport(fault) => write!(f, "transport error: {:?}", fault),
            Self::NotConnected => write!(f, "not connected"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Identity(err) => write!(f, "invalid device identity: {:?}", err),
            Self::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Stalled;

    impl TransportError for Stalled {
        fn fault(&self) -> TransportFault {
            TransportFault::Timeout
        }
    }

    #[test]
    fn refused_connack_maps_to_handshake_rejected() {
        let err: SessionError = MqttError::<Stalled>::ConnectionRefused(4.into()).into();
        assert_eq!(
            err,
            SessionError::HandshakeRejected(ConnectReasonCode::BadUserNameOrPassword)
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_errors_keep_their_fault() {
        let err: SessionError = MqttError::Transport(Stalled).into();
        assert_eq!(err, SessionError::Transport(TransportFault::Timeout));
    }

    #[test]
    fn signing_failure_is_not_retryable() {
        let err: SessionError = CredentialError::SigningFailed(SignFailure::KeyRejected).into();
        assert!(!err.is_retryable());
        assert!(!SessionError::NotConnected.is_retryable());
        assert!(!SessionError::Cancelled.is_retryable());
        assert!(!SessionError::PayloadTooLarge.is_retryable());
    }

    #[test]
    fn unknown_return_codes_are_preserved() {
        assert_eq!(ConnectReasonCode::from(0x42), ConnectReasonCode::Other(0x42));
    }
}
