//! Credential issuer
//!
//! Issues one-time tokens (OTPs) that authenticate callbacks pushed by a
//! job's remote control scripts. One issuer is shared by every controller in
//! the process.

use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Token length in random bytes (hex-encoded to twice as many characters)
const TOKEN_BYTES: usize = 32;

/// Service trait for issuing and revoking per-task credentials
pub trait CredentialIssuer: Send + Sync {
    /// Issues a fresh token for `task_id`
    ///
    /// Every call returns a new token; tokens are random and cannot be
    /// derived from the task id.
    fn generate(&self, task_id: &str) -> String;

    /// Revokes a token. Revoking an unknown token is a no-op.
    fn revoke(&self, task_id: &str, token: &str);

    /// Checks whether `token` is currently valid for `task_id`
    fn authenticate(&self, task_id: &str, token: &str) -> bool;
}

/// In-memory implementation of CredentialIssuer
#[derive(Default)]
pub struct InMemoryOtpIssuer {
    tokens: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryOtpIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    fn random_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl CredentialIssuer for InMemoryOtpIssuer {
    fn generate(&self, task_id: &str) -> String {
        let token = Self::random_token();

        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .entry(task_id.to_string())
            .or_default()
            .insert(token.clone());

        debug!("Issued credential for task {}", task_id);
        token
    }

    fn revoke(&self, task_id: &str, token: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(task_tokens) = tokens.get_mut(task_id) {
            if task_tokens.remove(token) {
                debug!("Revoked credential for task {}", task_id);
            }
            if task_tokens.is_empty() {
                tokens.remove(task_id);
            }
        }
    }

    fn authenticate(&self, task_id: &str, token: &str) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(task_id)
            .is_some_and(|task_tokens| task_tokens.contains(token))
    }
}
