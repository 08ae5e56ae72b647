//! Flow.cl request signing.
//!
//! Every parameter except `s` takes part in the signature: keys are sorted by
//! byte order, each key is immediately followed by its value, and the joined
//! string is signed with HMAC-SHA256 under the merchant secret. The result is
//! sent as lowercase hex in the `s` field.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Name of the field carrying the signature itself
pub const SIGNATURE_FIELD: &str = "s";

/// Hex length of an HMAC-SHA256 digest
const DIGEST_HEX_LEN: usize = 64;

/// Gateway parameters. `BTreeMap<String, _>` iterates in byte order, which is
/// the canonical ordering Flow signs over.
pub type FlowParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Flow secret key is not configured")]
    MissingSecret,
    #[error("Flow secret key cannot be used as an HMAC key")]
    InvalidKey,
}

/// The exact string that gets signed.
pub fn canonical_string(params: &FlowParams) -> String {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNATURE_FIELD)
        .fold(String::new(), |mut acc, (key, value)| {
            acc.push_str(key);
            acc.push_str(value);
            acc
        })
}

/// HMAC signer holding the merchant secret.
#[derive(Clone)]
pub struct FlowSigner {
    mac: HmacSha256,
}

impl fmt::Debug for FlowSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowSigner").finish_non_exhaustive()
    }
}

impl FlowSigner {
    pub fn new(secret: impl AsRef<str>) -> Result<Self, SignatureError> {
        let secret = secret.as_ref();
        if secret.trim().is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { mac })
    }

    pub fn sign(&self, params: &FlowParams) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical_string(params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of `signature` against the parameters.
    /// Only the exact lowercase hex digest matches; anything else is a mismatch.
    pub fn verify(&self, params: &FlowParams, signature: &str) -> bool {
        if !is_lowercase_digest(signature) {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(canonical_string(params).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Returns the parameters with `s` filled in, ready to send.
    pub fn signed(&self, mut params: FlowParams) -> FlowParams {
        params.remove(SIGNATURE_FIELD);
        let signature = self.sign(&params);
        params.insert(SIGNATURE_FIELD.to_string(), signature);
        params
    }
}

fn is_lowercase_digest(signature: &str) -> bool {
    signature.len() == DIGEST_HEX_LEN
        && signature
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn sign(secret: &str, params: &FlowParams) -> Result<String, SignatureError> {
    Ok(FlowSigner::new(secret)?.sign(params))
}

pub fn verify(secret: &str, params: &FlowParams, signature: &str) -> Result<bool, SignatureError> {
    Ok(FlowSigner::new(secret)?.verify(params, signature))
}
