//! Network link seam.
//!
//! The session controller only needs to know whether the device can reach the
//! network and how to wait until it can. Radio bring-up, DHCP and the like stay
//! with whatever owns the network stack.

use embassy_net::Stack;
use embassy_time::{Duration, with_timeout};

use crate::error::LinkError;

#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    /// Whether the link is up and configured right now.
    fn is_linked(&self) -> bool;

    /// Waits until the link is usable.
    async fn join(&mut self) -> Result<(), LinkError>;
}

/// [`NetworkLink`] over an `embassy-net` stack.
///
/// The link counts as up once the interface is up and has an IP configuration.
pub struct StackLink<'d> {
    stack: Stack<'d>,
    join_timeout: Duration,
}

impl<'d> StackLink<'d> {
    pub fn new(stack: Stack<'d>) -> Self {
        Self {
            stack,
            join_timeout: Duration::from_secs(30),
        }
    }

    /// Bounds how long a single [`NetworkLink::join`] waits for configuration.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

impl NetworkLink for StackLink<'_> {
    fn is_linked(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    async fn join(&mut self) -> Result<(), LinkError> {
        if self.is_linked() {
            return Ok(());
        }

        info!("waiting for network configuration");
        with_timeout(self.join_timeout, self.stack.wait_config_up())
            .await
            .map_err(|_| {
                warn!("network join timed out");
                LinkError
            })?;

        if let Some(config) = self.stack.config_v4() {
            let octets = config.address.address().octets();
            info!(
                "network up, address {}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            );
        }
        Ok(())
    }
}
