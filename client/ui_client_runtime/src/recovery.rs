//! Desync recovery and the last-valid-response cache.
//!
//! The cache holds the newest successful response the client has seen,
//! whether it was applied or only received while a later request was still
//! outstanding. An InvalidState rejection replays it, if present, and is
//! always acknowledged.

use crate::protocol::{ClientEnvelope, RerunResponse};

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    /// Response to render before acknowledging.
    pub replay: Option<RerunResponse>,
    pub ack: ClientEnvelope,
}

#[derive(Debug, Default)]
pub struct DesyncRecovery {
    last_valid: Option<RerunResponse>,
    /// Highest request id among responses applied or cached so far.
    newest_seen: Option<u64>,
}

impl DesyncRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_valid(&self) -> Option<&RerunResponse> {
        self.last_valid.as_ref()
    }

    pub fn record_applied(&mut self, response: &RerunResponse) {
        self.bump(response.request_id);
        self.last_valid = Some(response.clone());
    }

    /// Caches a successful response to an older request unless something at
    /// least as recent is already cached or rendered. Returns whether it was
    /// kept.
    pub fn record_superseded(&mut self, response: RerunResponse) -> bool {
        let newer = match (response.request_id, self.newest_seen) {
            (Some(id), Some(seen)) => id > seen,
            _ => true,
        };
        if !newer {
            return false;
        }

        self.bump(response.request_id);
        self.last_valid = Some(response);
        true
    }

    /// Consumes the cache.
    pub fn on_invalid_state(&mut self) -> RecoveryPlan {
        RecoveryPlan {
            replay: self.last_valid.take(),
            ack: ClientEnvelope::AckInvalidState,
        }
    }

    fn bump(&mut self, request_id: Option<u64>) {
        if let Some(id) = request_id {
            self.newest_seen = Some(self.newest_seen.map_or(id, |seen| seen.max(id)));
        }
    }
}
