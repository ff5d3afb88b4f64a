//! Numeric password-reset codes.
//!
//! Codes are four digits, live for a short window and are stored only as a
//! salted SHA-256 digest. A wrong guess is counted; after
//! [`MAX_RESET_ATTEMPTS`] the pending code is dropped. A new request replaces
//! the pending code and keeps the digest of the old one in `superseded`, so a
//! stale code is told apart from a wrong guess.

use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

pub const MAX_RESET_ATTEMPTS: i32 = 5;

/// Superseded digests kept per user.
pub const MAX_SUPERSEDED: usize = 4;

/// A code waiting to be redeemed. At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PendingReset {
    pub user_id: i64,
    pub code_hash: String,
    pub code_salt: String,
    pub attempts: i32,
    pub expires_at: OffsetDateTime,
    /// `salt:hash` of codes replaced by later requests, oldest first.
    pub superseded: Vec<String>,
}

/// Outcome of presenting a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Accepted,
    Expired,
    /// Matches a code that a later request replaced.
    Superseded,
    Mismatch,
}

pub fn generate_code() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_code(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn digest_matches(salt: &str, hash: &str, code: &str) -> bool {
    let presented = hash_code(salt, code);
    bool::from(
        presented
            .as_bytes()
            .ct_eq(hash.to_ascii_lowercase().as_bytes()),
    )
}

impl PendingReset {
    /// Issues a fresh code for `user_id`; returns the record and the plaintext code.
    pub fn issue(user_id: i64, now: OffsetDateTime, ttl: Duration) -> (Self, String) {
        let code = generate_code();
        let code_salt = generate_salt();
        let reset = Self {
            user_id,
            code_hash: hash_code(&code_salt, &code),
            code_salt,
            attempts: 0,
            expires_at: now + ttl,
            superseded: Vec::new(),
        };
        (reset, code)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn is_locked(&self) -> bool {
        self.attempts >= MAX_RESET_ATTEMPTS
    }

    /// Moves `previous` into this record's superseded list, keeping the most
    /// recent [`MAX_SUPERSEDED`] digests.
    pub fn supersede(&mut self, previous: &PendingReset) {
        let mut list = previous.superseded.clone();
        list.push(format!("{}:{}", previous.code_salt, previous.code_hash));
        let skip = list.len().saturating_sub(MAX_SUPERSEDED);
        self.superseded = list.split_off(skip);
    }

    /// Compares `code` with the pending digest, then with superseded ones.
    /// The attempt cap is enforced by the store when the attempt is claimed.
    pub fn check(&self, code: &str, now: OffsetDateTime) -> CodeCheck {
        if self.is_expired_at(now) {
            return CodeCheck::Expired;
        }
        if digest_matches(&self.code_salt, &self.code_hash, code) {
            return CodeCheck::Accepted;
        }
        let stale = self.superseded.iter().any(|entry| {
            entry
                .split_once(':')
                .is_some_and(|(salt, hash)| digest_matches(salt, hash, code))
        });
        if stale {
            CodeCheck::Superseded
        } else {
            CodeCheck::Mismatch
        }
    }
}

/// Spends the same hashing work as a real request so an unknown email is not
/// distinguishable by latency.
pub fn dummy_issue() {
    let salt = generate_salt();
    let _ = hash_code(&salt, &generate_code());
}
