//! Domain event types for the contract lifecycle
//!
//! These events are the payloads delivered to webhook endpoints and recorded
//! as audit metadata. Serialized with an internal `type` tag so consumers can
//! dispatch without inspecting the payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events emitted by the contract and envelope workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StudioEvent {
    /// Contract left DRAFT: magic link minted and emailed
    ContractSent {
        contract_id: Uuid,
        contract_number: String,
        client_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Magic link redeemed for the first time
    ContractViewed {
        contract_id: Uuid,
        contract_number: String,
        timestamp: DateTime<Utc>,
    },

    /// Signature captured and applied
    ContractSigned {
        contract_id: Uuid,
        contract_number: String,
        signer_name: String,
        signer_email: String,
        pdf_hash: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Signer declined to sign
    ContractDeclined {
        contract_id: Uuid,
        contract_number: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Admin voided the contract
    ContractVoided {
        contract_id: Uuid,
        contract_number: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Deadline passed without signature
    ContractExpired {
        contract_id: Uuid,
        contract_number: String,
        timestamp: DateTime<Utc>,
    },

    /// All envelope signers have signed
    EnvelopeCompleted {
        envelope_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An envelope signer declined (terminal by default)
    EnvelopeDeclined {
        envelope_id: Uuid,
        signer_email: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StudioEvent {
    /// Dotted event name used for webhook endpoint filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            StudioEvent::ContractSent { .. } => "contract.sent",
            StudioEvent::ContractViewed { .. } => "contract.viewed",
            StudioEvent::ContractSigned { .. } => "contract.signed",
            StudioEvent::ContractDeclined { .. } => "contract.declined",
            StudioEvent::ContractVoided { .. } => "contract.voided",
            StudioEvent::ContractExpired { .. } => "contract.expired",
            StudioEvent::EnvelopeCompleted { .. } => "envelope.completed",
            StudioEvent::EnvelopeDeclined { .. } => "envelope.declined",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_variant() {
        let event = StudioEvent::ContractSigned {
            contract_id: Uuid::new_v4(),
            contract_number: "CT-2025-0001".into(),
            signer_name: "Jane Doe".into(),
            signer_email: "jane@example.com".into(),
            pdf_hash: None,
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "contract.signed");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ContractSigned");
        assert_eq!(json["contract_number"], "CT-2025-0001");
    }
}
