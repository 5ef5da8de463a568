//! Domain models for the StudioDesk back office

pub mod client;
pub mod contract;
pub mod envelope;
pub mod template;
pub mod webhook;

pub use client::Client;
pub use contract::{Contract, ContractEvent, ContractStatus, SignatureSubmission};
pub use envelope::{validate_sequence, Envelope, EnvelopeMode, EnvelopeStatus, Signer, SignerStatus};
pub use template::{ContractTemplate, FieldDescriptor, FieldType, TemplateSection};
pub use webhook::{DeliveryStatus, WebhookDelivery, WebhookEndpoint};
