//! Multi-party signing envelopes
//!
//! An envelope groups several signers under one workflow policy. In
//! SEQUENTIAL mode signer N cannot act until signer N-1 has signed; in
//! PARALLEL mode any signer may act at any time. The envelope completes only
//! when every signer has signed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signing order policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeMode {
    Sequential,
    Parallel,
}

impl EnvelopeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeMode::Sequential => "SEQUENTIAL",
            EnvelopeMode::Parallel => "PARALLEL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEQUENTIAL" => Some(EnvelopeMode::Sequential),
            "PARALLEL" => Some(EnvelopeMode::Parallel),
            _ => None,
        }
    }
}

/// Aggregate envelope status derived from signer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Pending,
    Completed,
    Declined,
    Expired,
    Voided,
}

impl EnvelopeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeStatus::Pending => "PENDING",
            EnvelopeStatus::Completed => "COMPLETED",
            EnvelopeStatus::Declined => "DECLINED",
            EnvelopeStatus::Expired => "EXPIRED",
            EnvelopeStatus::Voided => "VOIDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EnvelopeStatus::Pending),
            "COMPLETED" => Some(EnvelopeStatus::Completed),
            "DECLINED" => Some(EnvelopeStatus::Declined),
            "EXPIRED" => Some(EnvelopeStatus::Expired),
            "VOIDED" => Some(EnvelopeStatus::Voided),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnvelopeStatus::Pending)
    }
}

/// Per-signer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerStatus {
    Pending,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerStatus::Pending => "PENDING",
            SignerStatus::Signed => "SIGNED",
            SignerStatus::Declined => "DECLINED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SignerStatus::Pending),
            "SIGNED" => Some(SignerStatus::Signed),
            "DECLINED" => Some(SignerStatus::Declined),
            _ => None,
        }
    }
}

/// A named multi-signer signing request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub title: String,
    pub mode: EnvelopeMode,
    pub status: EnvelopeStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One party within an envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signer {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Option<String>,

    /// 1-based, gapless; ordering is enforced only in SEQUENTIAL mode
    pub sequence_number: i64,

    pub token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,

    pub status: SignerStatus,
    pub acted_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

/// Validate that signer sequence numbers are gapless 1..n.
///
/// Required in SEQUENTIAL mode; PARALLEL envelopes ignore sequence numbers
/// but still store them for display order.
pub fn validate_sequence(sequence_numbers: &[i64]) -> bool {
    let mut sorted: Vec<i64> = sequence_numbers.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(i, &n)| n == (i as i64) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gapless_sequences_accepted() {
        assert!(validate_sequence(&[1]));
        assert!(validate_sequence(&[2, 1, 3]));
    }

    #[test]
    fn gaps_and_duplicates_rejected() {
        assert!(!validate_sequence(&[1, 3]));
        assert!(!validate_sequence(&[1, 1, 2]));
        assert!(!validate_sequence(&[0, 1]));
    }

    #[test]
    fn envelope_status_terminality() {
        assert!(!EnvelopeStatus::Pending.is_terminal());
        assert!(EnvelopeStatus::Completed.is_terminal());
        assert!(EnvelopeStatus::Declined.is_terminal());
    }
}
