//! Short human-enterable session codes.
//!
//! [`generate_code`] only draws candidates; [`CodePool`] is the process-local registry of codes
//! bound to live sessions. The pool is advisory: the persistence layer's conditional create is
//! what finally rejects a duplicate.

use dashmap::DashSet;
use rand::Rng;
use tracing::debug;

use crate::error::ServiceError;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Draw `length` uppercase letters uniformly until `is_in_use` rejects none, giving up after
/// `max_attempts` candidates.
pub fn generate_code(
    length: usize,
    max_attempts: u32,
    mut is_in_use: impl FnMut(&str) -> bool,
) -> Result<String, ServiceError> {
    let mut rng = rand::rng();
    for attempt in 0..max_attempts {
        let candidate: String = (0..length)
            .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
            .collect();
        if !is_in_use(&candidate) {
            return Ok(candidate);
        }
        debug!(attempt, candidate = %candidate, "session code already in use");
    }

    Err(ServiceError::CodePoolExhausted)
}

/// Codes currently bound to sessions known by this process.
#[derive(Default)]
pub struct CodePool {
    used: DashSet<String>,
}

impl CodePool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a code and mark it used in one step. `DashSet::insert` returning `false` counts as
    /// a collision, so two concurrent reservations never get the same code.
    pub fn reserve(&self, length: usize, max_attempts: u32) -> Result<String, ServiceError> {
        generate_code(length, max_attempts, |candidate| {
            !self.used.insert(candidate.to_owned())
        })
    }

    /// Mark externally known codes as used, e.g. sessions already persisted before a restart.
    pub fn seed<I>(&self, codes: I)
    where
        I: IntoIterator<Item = String>,
    {
        for code in codes {
            self.used.insert(code);
        }
    }

    /// Return a code to the pool.
    pub fn release(&self, code: &str) {
        self.used.remove(code);
    }

    /// Whether `code` is currently bound to a session.
    pub fn is_in_use(&self, code: &str) -> bool {
        self.used.contains(code)
    }

    /// Number of codes in use.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Whether no code is in use.
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
