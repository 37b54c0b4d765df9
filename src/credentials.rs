//! Credential manager.
//!
//! Owns the device's signed authentication token and decides when a new one
//! has to be minted. Minting is expensive (an asymmetric signature on a small
//! MCU) and rate-sensitive on the key-management side, so a token is reused
//! for its whole validity window and only re-minted once it has expired.
//!
//! The token lives behind an async mutex that is held across the whole
//! check-and-mint step: concurrent callers are serialized, at most one mint is
//! ever in flight and the others observe its result.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use heapless::String;

use crate::error::{CredentialError, SignFailure};
use crate::identity::DeviceIdentity;

/// How long a minted token is accepted by the broker, in seconds.
pub const TOKEN_VALIDITY_SECS: u64 = 3600;

/// Capacity of a token string. Large enough for an RS256 JWT.
pub const MAX_TOKEN_LEN: usize = 1024;

pub type TokenString = String<MAX_TOKEN_LEN>;

/// Produces the signed token string for an identity.
pub trait TokenSigner {
    /// Signs a token issued at `issued_at` that expires at `expires_at`
    /// (both unix seconds).
    fn sign(
        &mut self,
        identity: &DeviceIdentity,
        issued_at: u64,
        expires_at: u64,
    ) -> Result<TokenString, SignFailure>;
}

/// A signed token and the window it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: TokenString,
    issued_at: u64,
    expires_at: u64,
}

impl AuthToken {
    pub fn value(&self) -> &str {
        self.value.as_str()
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Whether the token may still be presented at `now`.
    ///
    /// A clock that steps back before `issued_at` keeps the token valid.
    pub fn is_valid_at(&self, now: u64) -> bool {
        now <= self.expires_at
    }
}

struct TokenSlot<S> {
    signer: S,
    current: Option<AuthToken>,
}

/// Hands out a currently-valid [`AuthToken`], minting only when needed.
pub struct CredentialManager<M: RawMutex, S> {
    identity: DeviceIdentity,
    validity_secs: u64,
    slot: Mutex<M, TokenSlot<S>>,
}

impl<M, S> CredentialManager<M, S>
where
    M: RawMutex,
    S: TokenSigner,
{
    pub fn new(identity: DeviceIdentity, signer: S) -> Self {
        Self {
            identity,
            validity_secs: TOKEN_VALIDITY_SECS,
            slot: Mutex::new(TokenSlot {
                signer,
                current: None,
            }),
        }
    }

    /// Overrides the validity window.
    pub fn with_validity(mut self, validity_secs: u64) -> Self {
        self.validity_secs = validity_secs;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn validity_secs(&self) -> u64 {
        self.validity_secs
    }

    /// Returns the current token if it is still valid at `now`, otherwise mints
    /// a new one issued at `now`.
    ///
    /// The token is only guaranteed valid at the moment of return; callers
    /// that hold on to it must ask again before reusing it later.
    ///
    /// A signing failure is returned as is and never retried here.
    pub async fn get_valid_token(&self, now: u64) -> Result<AuthToken, CredentialError> {
        let mut slot = self.slot.lock().await;

        if let Some(token) = &slot.current
            && token.is_valid_at(now)
        {
            debug!("reusing still-valid token issued at {}", token.issued_at);
            return Ok(token.clone());
        }

        let expires_at = now.saturating_add(self.validity_secs);
        let value = slot
            .signer
            .sign(&self.identity, now, expires_at)
            .map_err(|e| {
                error!("token signing failed: {:?}", e);
                CredentialError::SigningFailed(e)
            })?;

        info!("minted token issued at {}, expires at {}", now, expires_at);
        let token = AuthToken {
            value,
            issued_at: now,
            expires_at,
        };
        slot.current = Some(token.clone());
        Ok(token)
    }

    /// The current token, valid or not, without minting.
    pub async fn current(&self) -> Option<AuthToken> {
        self.slot.lock().await.current.clone()
    }
}
