//! Request, response and outcome types of the resend orchestrator.

use serde::{Deserialize, Serialize};

/// Ask this node to re-publish every transaction involving `public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendBatchRequest {
    /// Target key, base64.
    pub public_key: String,
    /// Maximum payload views per publish call. Must be at least 1.
    pub batch_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendBatchResponse {
    /// Primary-store rows examined, whether or not anything was published
    /// for them.
    pub total: u64,
}

/// An incoming batch of encoded payloads from a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBatchRequest {
    pub encoded_payloads: Vec<Vec<u8>>,
}

/// Tri-state result of a staging or sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResyncOutcome {
    Success,
    PartialSuccess,
    Failure,
}

impl ResyncOutcome {
    /// `Success` iff every row is staged and there is at least one,
    /// `Failure` iff nothing is staged.
    pub fn from_staging(total: u64, staged: u64) -> Self {
        if staged == 0 {
            ResyncOutcome::Failure
        } else if staged == total {
            ResyncOutcome::Success
        } else {
            ResyncOutcome::PartialSuccess
        }
    }

    /// `Success` iff at least one version was attempted and none violated,
    /// `Failure` iff every attempted version violated (vacuously so when
    /// nothing was attempted).
    pub fn from_sync(attempted: u64, violations: u64) -> Self {
        if violations == 0 && attempted > 0 {
            ResyncOutcome::Success
        } else if violations == attempted {
            ResyncOutcome::Failure
        } else {
            ResyncOutcome::PartialSuccess
        }
    }
}

/// Counters behind a sync outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: u64,
    pub violations: u64,
    pub outcome: ResyncOutcome,
}

impl SyncReport {
    pub fn new(attempted: u64, violations: u64) -> Self {
        Self {
            attempted,
            violations,
            outcome: ResyncOutcome::from_sync(attempted, violations),
        }
    }

    pub fn committed(&self) -> u64 {
        self.attempted - self.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_outcomes() {
        assert_eq!(ResyncOutcome::from_staging(2, 2), ResyncOutcome::Success);
        assert_eq!(ResyncOutcome::from_staging(2, 1), ResyncOutcome::PartialSuccess);
        assert_eq!(ResyncOutcome::from_staging(2, 0), ResyncOutcome::Failure);
        assert_eq!(ResyncOutcome::from_staging(0, 0), ResyncOutcome::Failure);
    }

    #[test]
    fn sync_outcomes() {
        assert_eq!(ResyncOutcome::from_sync(3, 0), ResyncOutcome::Success);
        assert_eq!(ResyncOutcome::from_sync(3, 1), ResyncOutcome::PartialSuccess);
        assert_eq!(ResyncOutcome::from_sync(3, 3), ResyncOutcome::Failure);
        assert_eq!(ResyncOutcome::from_sync(0, 0), ResyncOutcome::Failure);
    }

    #[test]
    fn request_json_is_camel_case() {
        let request: ResendBatchRequest =
            serde_json::from_str(r#"{"publicKey":"abc","batchSize":5}"#).unwrap();
        assert_eq!(request.batch_size, 5);
        assert_eq!(
            serde_json::to_string(&ResyncOutcome::PartialSuccess).unwrap(),
            r#""PARTIAL_SUCCESS""#
        );
    }
}
