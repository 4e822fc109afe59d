//! Shared credential upgrade
//!
//! Clients that present the shared key get it re-stamped on the outbound
//! request together with a forwarded-identity marker, which the upstream
//! uses to recognize this proxy as trusted.

use http::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use std::fmt;

/// Header carrying the API credential
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header used as the trust marker
pub const FORWARDED_IDENTITY_HEADER: &str = "x-forwarded-for";

#[derive(Clone)]
pub struct CredentialInjector {
    secret: HeaderValue,
}

impl fmt::Debug for CredentialInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInjector")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl CredentialInjector {
    pub fn new(secret: &str) -> Result<Self, InvalidHeaderValue> {
        let mut secret = HeaderValue::from_str(secret)?;
        secret.set_sensitive(true);
        Ok(Self { secret })
    }

    /// True when the credential header matches the secret exactly.
    ///
    /// Plain byte comparison, not constant time.
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(API_KEY_HEADER)
            .is_some_and(|v| v.as_bytes() == self.secret.as_bytes())
    }

    /// Stamps the credential and trust marker on an authorized request.
    ///
    /// Returns whether the headers were changed. Unauthorized requests are
    /// left untouched.
    pub fn apply(&self, headers: &mut HeaderMap) -> bool {
        if !self.is_authorized(headers) {
            return false;
        }
        headers.insert(API_KEY_HEADER, self.secret.clone());
        headers.insert(FORWARDED_IDENTITY_HEADER, self.secret.clone());
        true
    }
}
