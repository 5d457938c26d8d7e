//! Opaque request tokens and the seeded generator that mints them.
//!
//! Every queued request is identified by a [`Token`]: a hex string produced
//! by an iterated SHA-256 hash chain over a per-executor random seed and a
//! monotonically advancing counter. Tokens are unpredictable to outside
//! observers, unique among the executor's live tokens, and carry no
//! externally observable sequence information.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::logging::targets;

/// An opaque handle identifying one queued request.
///
/// Tokens are minted by the executor at submission time and are the only way
/// to poll for or cancel the corresponding work. They order and hash as
/// plain strings and can be looked up by `&str` in keyed collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    /// The token's string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Generates the executor's token sequence.
///
/// Holds the *next* token to hand out at all times. `current()` is consumed
/// by `queue_request`, which then calls `advance` with the live-token map so
/// the following token is guaranteed not to collide with any token the
/// executor still knows about.
#[derive(Debug)]
pub(crate) struct TokenGenerator {
    seed: [u8; 16],
    counter: i128,
    current: Token,
}

impl TokenGenerator {
    /// Create a generator with a fresh seed from the OS entropy source.
    pub(crate) fn new() -> Self {
        let mut seed = [0u8; 16];
        OsRng.fill_bytes(&mut seed);
        let counter: i128 = 1;
        let counter_bytes = counter.to_be_bytes();
        let current = Token(sha256_hex(&[&counter_bytes[..], &seed[..]]));
        Self {
            seed,
            counter,
            current,
        }
    }

    /// The token that will be issued to the next queued request.
    pub(crate) fn current(&self) -> &Token {
        &self.current
    }

    /// Advance the hash chain past the token just consumed.
    ///
    /// The counter advances once; the candidate token is then re-chained
    /// until it does not collide with any key of `live`.
    pub(crate) fn advance<V>(&mut self, live: &HashMap<Token, V>) {
        self.counter += 1;
        let counter = self.counter.to_be_bytes();
        let mut candidate = sha256_hex(&[
            self.current.as_str().as_bytes(),
            &counter[..],
            &self.seed[..],
        ]);
        while live.contains_key(candidate.as_str()) {
            tracing::trace!(
                target: targets::TOKEN,
                "token collision with a live token, re-chaining"
            );
            candidate = sha256_hex(&[candidate.as_bytes(), &counter[..], &self.seed[..]]);
        }
        self.current = Token(candidate);
    }
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
