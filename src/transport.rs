//! # MQTT Transport Abstraction
//!
//! `MqttTransport` abstracts the byte stream the MQTT client runs over, so the
//! client stays hardware and network-stack agnostic. `StreamTransport` adapts
//! any `embedded-io-async` stream (an `embassy-net` TCP socket, or a TLS
//! connection layered on top of one) and bounds every read with a timeout.
//!
//! `ChannelOpener` is the factory the session controller uses to obtain a fresh
//! secure stream for every connection attempt. How the stream is secured (TLS
//! configuration, certificates, cipher suites) is the opener's business.

use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use crate::error::{ProtocolError, TransportFault};

/// A trait representing a transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Marker trait for transport errors, with a coarse classification the
/// session controller can report without knowing the concrete type.
pub trait TransportError: core::fmt::Debug {
    /// The transport-agnostic kind of this failure.
    fn fault(&self) -> TransportFault {
        TransportFault::Io
    }
}

/// Opens secure byte streams to the broker.
#[allow(async_fn_in_trait)]
pub trait ChannelOpener {
    /// The transport produced for every successful open.
    type Transport: MqttTransport;

    /// Opens a new secure channel to `host:port`.
    async fn open(&mut self, host: &str, port: u16) -> Result<Self::Transport, TransportFault>;
}

/// Errors produced by [`StreamTransport`].
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError<E> {
    /// The underlying stream failed.
    Io(E),
    /// No data arrived within the read timeout.
    Timeout,
    /// The peer closed the stream.
    Closed,
}

impl<E: core::fmt::Debug> TransportError for StreamError<E> {
    fn fault(&self) -> TransportFault {
        match self {
            StreamError::Io(_) => TransportFault::Io,
            StreamError::Timeout => TransportFault::Timeout,
            StreamError::Closed => TransportFault::Protocol(ProtocolError::ConnectionClosed),
        }
    }
}

/// Transport over any `embedded-io-async` byte stream.
pub struct StreamTransport<S> {
    stream: S,
    timeout: Duration,
}

impl<S> StreamTransport<S>
where
    S: Read + Write,
{
    /// Creates a new `StreamTransport` with the given stream and read timeout.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Gives the underlying stream back, e.g. to close the socket explicitly.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, StreamError<S::Error>> {
        // Race the read against a timer.
        let read_fut = self.stream.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                debug!("stream closed by peer");
                Err(StreamError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => {
                trace!("stream read: {} bytes", n);
                Ok(n)
            }
            futures::future::Either::Left((Err(e), _)) => Err(StreamError::Io(e)),
            futures::future::Either::Right(((), _)) => {
                debug!("stream read timed out");
                Err(StreamError::Timeout)
            }
        }
    }
}

impl<S> MqttTransport for StreamTransport<S>
where
    S: Read + Write,
{
    type Error = StreamError<S::Error>;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("stream write: {} bytes", buf.len());
        self.stream.write_all(buf).await.map_err(StreamError::Io)?;

        // Flush so the bytes actually leave the TLS/TCP buffers.
        self.stream.flush().await.map_err(StreamError::Io)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use std::vec::Vec;

    struct LoopbackStream {
        incoming: Vec<u8>,
        written: Vec<u8>,
        flushes: usize,
    }

    impl embedded_io_async::ErrorType for LoopbackStream {
        type Error = Infallible;
    }

    impl Read for LoopbackStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(self.incoming.len());
            buf[..n].copy_from_slice(&self.incoming[..n]);
            self.incoming.drain(..n);
            Ok(n)
        }
    }

    impl Write for LoopbackStream {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn send_writes_and_flushes() {
        let stream = LoopbackStream {
            incoming: Vec::new(),
            written: Vec::new(),
            flushes: 0,
        };
        let mut transport = StreamTransport::new(stream, Duration::from_secs(5));
        block_on(transport.send(&[0xC0, 0x00])).unwrap();

        let stream = transport.into_inner();
        assert_eq!(stream.written, [0xC0, 0x00]);
        assert_eq!(stream.flushes, 1);
    }

    #[test]
    fn zero_length_read_means_closed() {
        let stream = LoopbackStream {
            incoming: Vec::new(),
            written: Vec::new(),
            flushes: 0,
        };
        let mut transport = StreamTransport::new(stream, Duration::from_secs(5));
        let mut buf = [0u8; 4];
        let err = block_on(transport.recv(&mut buf)).unwrap_err();
        assert_eq!(
            err.fault(),
            TransportFault::Protocol(ProtocolError::ConnectionClosed)
        );
    }
}
