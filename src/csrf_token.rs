use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use subtle::ConstantTimeEq;

/// 32 bytes of cryptographically secure random data, base64 url encoded as a 43 character string.
pub(crate) fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cryptographically secure token used as the `state` of a login, tying Keycloak's redirect
/// back to the browser that started the login.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CsrfToken {
    csrf_token: String,
}

impl CsrfToken {
    pub fn new() -> Self {
        Self {
            csrf_token: random_token(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.csrf_token
    }

    /// Compares against the `state` Keycloak returned without short-circuiting on the first
    /// differing byte.
    pub fn matches(&self, returned_state: &str) -> bool {
        self.csrf_token
            .as_bytes()
            .ct_eq(returned_state.as_bytes())
            .into()
    }
}

impl Default for CsrfToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CsrfToken {
    fn from(csrf_token: String) -> Self {
        Self { csrf_token }
    }
}
