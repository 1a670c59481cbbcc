//! Narrow contracts for external collaborators plus default adapters.

use crate::model::{Email, User};
use crate::outcome::Outcome;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Hasher failure. Never carries the cleartext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashError(pub String);

impl Display for HashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "password hashing failed: {}", self.0)
    }
}

impl Error for HashError {}

/// Password hashing. The hash format is opaque to callers.
pub trait PasswordHasher {
    fn generate(&self, cleartext: &str) -> Result<String, HashError>;
    fn validate(&self, cleartext: &str, hash: &str) -> bool;
}

/// `bcrypt` hasher with a configurable work factor.
#[derive(Debug, Clone, Copy)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptPasswordHasher {
    fn generate(&self, cleartext: &str) -> Result<String, HashError> {
        bcrypt::hash(cleartext, self.cost).map_err(|err| HashError(err.to_string()))
    }

    fn validate(&self, cleartext: &str, hash: &str) -> bool {
        bcrypt::verify(cleartext, hash).unwrap_or(false)
    }
}

/// Tokens handed to an authorized user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Refresh token expiry, Unix epoch milliseconds.
    pub expiry_ms: i64,
}

pub trait TokenIssuer {
    fn generate_tokens(&self, user: &User) -> Outcome<TokenPair>;
}

/// Email transport. Errors are provider messages, reported verbatim.
pub trait EmailDelivery {
    fn deliver(&self, email: &Email) -> Result<(), Vec<String>>;
}

/// Delivery adapter that records each send in the log instead of using a
/// mail provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailDelivery;

impl EmailDelivery for LogEmailDelivery {
    fn deliver(&self, email: &Email) -> Result<(), Vec<String>> {
        if email.receivers.is_empty() {
            return Err(vec!["email has no receivers".to_string()]);
        }
        log::info!(
            "event=email_deliver module=service status=ok email_id={} receivers={}",
            email.id,
            email.receivers.len()
        );
        Ok(())
    }
}
