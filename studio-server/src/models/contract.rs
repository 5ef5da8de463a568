//! Contract lifecycle state machine
//!
//! A contract progresses DRAFT → SENT → VIEWED and then into exactly one of
//! four terminal states: SIGNED, DECLINED, EXPIRED, VOIDED. Once terminal, no
//! further transition, token or session is valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Contract lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    /// Created by an admin, not yet sent to the client
    Draft,
    /// Magic link minted and emailed
    Sent,
    /// Magic link redeemed, signer session open
    Viewed,
    /// Signature captured and applied
    Signed,
    /// Signer declined
    Declined,
    /// Deadline passed without signature
    Expired,
    /// Voided by admin action
    Voided,
}

impl ContractStatus {
    /// Database column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "DRAFT",
            ContractStatus::Sent => "SENT",
            ContractStatus::Viewed => "VIEWED",
            ContractStatus::Signed => "SIGNED",
            ContractStatus::Declined => "DECLINED",
            ContractStatus::Expired => "EXPIRED",
            ContractStatus::Voided => "VOIDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ContractStatus::Draft),
            "SENT" => Some(ContractStatus::Sent),
            "VIEWED" => Some(ContractStatus::Viewed),
            "SIGNED" => Some(ContractStatus::Signed),
            "DECLINED" => Some(ContractStatus::Declined),
            "EXPIRED" => Some(ContractStatus::Expired),
            "VOIDED" => Some(ContractStatus::Voided),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractStatus::Signed
                | ContractStatus::Declined
                | ContractStatus::Expired
                | ContractStatus::Voided
        )
    }

    /// Whether a transition to `next` follows a lifecycle edge.
    ///
    /// EXPIRED and VOIDED are reachable from any non-terminal state; the
    /// forward edges are DRAFT→SENT→VIEWED→{SIGNED|DECLINED}.
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ContractStatus::Sent => *self == ContractStatus::Draft,
            ContractStatus::Viewed => *self == ContractStatus::Sent,
            ContractStatus::Signed | ContractStatus::Declined => *self == ContractStatus::Viewed,
            ContractStatus::Expired | ContractStatus::Voided => true,
            ContractStatus::Draft => false,
        }
    }
}

/// A contract instance, rendered from a template for one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,

    /// Human-readable sequence, e.g. `CT-2025-0042`
    pub contract_number: String,

    pub title: String,
    pub client_id: Uuid,

    /// Template the contract was instantiated from (by id, not live reference)
    pub template_id: Uuid,

    /// Originating proposal, if any
    pub proposal_id: Option<Uuid>,

    pub status: ContractStatus,

    /// Rendered body snapshot, decoupled from later template edits
    pub body_html: String,

    /// Variable bindings used to render the body
    pub variables: serde_json::Map<String, serde_json::Value>,

    /// Rendered/signed PDF artifact; hash is SHA-256 of the bytes at the path
    pub pdf_path: Option<String>,
    pub pdf_hash: Option<String>,

    /// Signing deadline
    pub sign_by_at: Option<DateTime<Utc>>,

    pub magic_link_token: Option<String>,
    pub magic_link_expires_at: Option<DateTime<Utc>>,

    /// One-time code gating session open when OTP is required
    pub otp_code: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,

    pub signer_session_id: Option<String>,
    pub signer_session_expires_at: Option<DateTime<Utc>>,

    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_reason: Option<String>,

    /// Captured signer identity (set on SIGNED)
    pub signer_name: Option<String>,
    pub signer_email: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Magic-link URL built from the public base URL
    pub fn magic_link_url(&self, base_url: &str) -> Option<String> {
        self.magic_link_token
            .as_ref()
            .map(|t| format!("{}/sign/{}", base_url.trim_end_matches('/'), t))
    }
}

/// Append-only audit entry for one lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEvent {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Signature submission from the signer-facing UI
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSubmission {
    pub session_id: String,
    /// `data:image/png;base64,...` or `data:image/jpeg;base64,...`
    pub signature_data_url: String,
    pub signer_name: String,
    pub signer_email: String,
    pub agreed_to_terms: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_edges_allowed() {
        assert!(ContractStatus::Draft.can_transition_to(ContractStatus::Sent));
        assert!(ContractStatus::Sent.can_transition_to(ContractStatus::Viewed));
        assert!(ContractStatus::Viewed.can_transition_to(ContractStatus::Signed));
        assert!(ContractStatus::Viewed.can_transition_to(ContractStatus::Declined));
    }

    #[test]
    fn skipping_states_rejected() {
        assert!(!ContractStatus::Draft.can_transition_to(ContractStatus::Viewed));
        assert!(!ContractStatus::Draft.can_transition_to(ContractStatus::Signed));
        assert!(!ContractStatus::Sent.can_transition_to(ContractStatus::Signed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            ContractStatus::Signed,
            ContractStatus::Declined,
            ContractStatus::Expired,
            ContractStatus::Voided,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                ContractStatus::Sent,
                ContractStatus::Viewed,
                ContractStatus::Signed,
                ContractStatus::Voided,
                ContractStatus::Expired,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn void_and_expire_from_any_non_terminal() {
        for state in [
            ContractStatus::Draft,
            ContractStatus::Sent,
            ContractStatus::Viewed,
        ] {
            assert!(state.can_transition_to(ContractStatus::Voided));
            assert!(state.can_transition_to(ContractStatus::Expired));
        }
    }

    #[test]
    fn status_roundtrips_through_db_text() {
        for status in [
            ContractStatus::Draft,
            ContractStatus::Sent,
            ContractStatus::Viewed,
            ContractStatus::Signed,
            ContractStatus::Declined,
            ContractStatus::Expired,
            ContractStatus::Voided,
        ] {
            assert_eq!(ContractStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContractStatus::parse("BOGUS"), None);
    }
}
