//! JSON Web Token assembly.
//!
//! The broker authenticates a device with a JWT passed as the MQTT password:
//! a base64url header naming the algorithm, base64url claims carrying `iat`,
//! `exp` and the project id as `aud`, and a base64url signature over the first
//! two segments. Only the assembly lives here; the asymmetric signature itself
//! is a [`SignaturePrimitive`] supplied by the board (hardware crypto engine or
//! a software ECDSA/RSA implementation).

use core::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use heapless::String;

use crate::credentials::{MAX_TOKEN_LEN, TokenSigner, TokenString};
use crate::error::SignFailure;
use crate::identity::DeviceIdentity;

/// Largest raw signature accepted (RS256 with a 4096-bit key).
pub const MAX_SIGNATURE_LEN: usize = 512;

/// An asymmetric signature algorithm.
pub trait SignaturePrimitive {
    /// JOSE algorithm name, `ES256` or `RS256` for Cloud IoT.
    const ALG: &'static str;

    /// Signs `message` with `private_key` and writes the raw signature
    /// to `out`, returning its length.
    fn sign(
        &mut self,
        private_key: &[u8],
        message: &[u8],
        out: &mut [u8],
    ) -> Result<usize, SignFailure>;
}

/// [`TokenSigner`] that emits a JWT signed by `P`.
pub struct JwtSigner<P> {
    primitive: P,
}

impl<P: SignaturePrimitive> JwtSigner<P> {
    pub fn new(primitive: P) -> Self {
        Self { primitive }
    }
}

impl<P: SignaturePrimitive> TokenSigner for JwtSigner<P> {
    fn sign(
        &mut self,
        identity: &DeviceIdentity,
        issued_at: u64,
        expires_at: u64,
    ) -> Result<TokenString, SignFailure> {
        let mut header: String<48> = String::new();
        write!(header, r#"{{"alg":"{}","typ":"JWT"}}"#, P::ALG)
            .map_err(|_| SignFailure::BufferTooSmall)?;

        let mut claims: String<256> = String::new();
        write!(
            claims,
            r#"{{"iat":{},"exp":{},"aud":"{}"}}"#,
            issued_at, expires_at, identity.project_id
        )
        .map_err(|_| SignFailure::BufferTooSmall)?;

        let mut token = [0u8; MAX_TOKEN_LEN];
        let mut len = encode_segment(header.as_bytes(), &mut token)?;
        len += push_dot(&mut token[len..])?;
        len += encode_segment(claims.as_bytes(), &mut token[len..])?;

        let mut signature = [0u8; MAX_SIGNATURE_LEN];
        let sig_len = self
            .primitive
            .sign(identity.private_key, &token[..len], &mut signature)?;
        let signature = signature
            .get(..sig_len)
            .ok_or(SignFailure::BufferTooSmall)?;

        len += push_dot(&mut token[len..])?;
        len += encode_segment(signature, &mut token[len..])?;

        // base64url output is always ASCII.
        let encoded = core::str::from_utf8(&token[..len]).map_err(|_| SignFailure::KeyRejected)?;
        let mut value = TokenString::new();
        value
            .push_str(encoded)
            .map_err(|_| SignFailure::BufferTooSmall)?;

        trace!("assembled {} token of {} bytes", P::ALG, len);
        Ok(value)
    }
}

fn encode_segment(input: &[u8], out: &mut [u8]) -> Result<usize, SignFailure> {
    URL_SAFE_NO_PAD
        .encode_slice(input, out)
        .map_err(|_| SignFailure::BufferTooSmall)
}

fn push_dot(out: &mut [u8]) -> Result<usize, SignFailure> {
    let slot = out.first_mut().ok_or(SignFailure::BufferTooSmall)?;
    *slot = b'.';
    Ok(1)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    const IDENTITY: DeviceIdentity =
        DeviceIdentity::new("demo-project", "us-central1", "reg", "dev", b"k");

    /// Signs by writing a fixed pattern and remembering what it was asked to sign.
    struct FakeEs256 {
        signed: Vec<u8>,
        signature_len: usize,
    }

    impl SignaturePrimitive for FakeEs256 {
        const ALG: &'static str = "ES256";

        fn sign(
            &mut self,
            private_key: &[u8],
            message: &[u8],
            out: &mut [u8],
        ) -> Result<usize, SignFailure> {
            if private_key.is_empty() {
                return Err(SignFailure::KeyRejected);
            }
            self.signed = message.to_vec();
            let sig = out
                .get_mut(..self.signature_len)
                .ok_or(SignFailure::BufferTooSmall)?;
            sig.fill(0xAB);
            Ok(self.signature_len)
        }
    }

    fn decode(segment: &str) -> Vec<u8> {
        let mut out = [0u8; 512];
        let n = URL_SAFE_NO_PAD.decode_slice(segment, &mut out).unwrap();
        out[..n].to_vec()
    }

    #[test]
    fn token_has_header_claims_and_signature() {
        let mut signer = JwtSigner::new(FakeEs256 {
            signed: Vec::new(),
            signature_len: 64,
        });
        let token = signer.sign(&IDENTITY, 1_600_000_000, 1_600_003_600).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(decode(parts[0]), br#"{"alg":"ES256","typ":"JWT"}"#);
        assert_eq!(
            decode(parts[1]),
            br#"{"iat":1600000000,"exp":1600003600,"aud":"demo-project"}"#
        );
        assert_eq!(decode(parts[2]), [0xAB; 64]);
        assert!(!token.contains('='));
    }

    #[test]
    fn signature_covers_header_and_claims() {
        let mut signer = JwtSigner::new(FakeEs256 {
            signed: Vec::new(),
            signature_len: 64,
        });
        let token = signer.sign(&IDENTITY, 1, 2).unwrap();

        let signing_input = token.rsplit_once('.').unwrap().0;
        assert_eq!(signer.primitive.signed, signing_input.as_bytes());
    }

    #[test]
    fn rejected_key_propagates() {
        let identity = DeviceIdentity {
            private_key: b"",
            ..IDENTITY
        };
        let mut signer = JwtSigner::new(FakeEs256 {
            signed: Vec::new(),
            signature_len: 64,
        });
        assert_eq!(
            signer.sign(&identity, 1, 2),
            Err(SignFailure::KeyRejected)
        );
    }

    #[test]
    fn oversized_signature_is_rejected() {
        let mut signer = JwtSigner::new(FakeEs256 {
            signed: Vec::new(),
            signature_len: MAX_SIGNATURE_LEN + 1,
        });
        assert_eq!(
            signer.sign(&IDENTITY, 1, 2),
            Err(SignFailure::BufferTooSmall)
        );
    }
}
