//! Signature capture and decline
//!
//! Validation is fail-fast in a fixed order so callers get deterministic
//! error codes: existence, terminal state, session, consent, image, identity.
//! The PDF is stamped before the status transition; a stamping failure leaves
//! the contract VIEWED and signable again.

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Contract, ContractStatus, SignatureSubmission};
use crate::services::mailer::{self, EmailMessage, EmailSender};
use crate::services::{pdf, tokens, webhooks};
use studio_common::events::StudioEvent;

/// Minimal structural email check: one `@`, non-empty local part, dotted
/// domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

fn check_session(contract: &Contract, session_id: &str) -> ApiResult<()> {
    let now = Utc::now();
    match contract.signer_session_id.as_deref() {
        Some(current) if current == session_id => {
            if tokens::is_expired(contract.signer_session_expires_at, now) {
                Err(ApiError::InvalidSession)
            } else {
                Ok(())
            }
        }
        _ => Err(ApiError::InvalidSession),
    }
}

fn check_signable(contract: &Contract) -> ApiResult<()> {
    match contract.status {
        ContractStatus::Viewed => Ok(()),
        ContractStatus::Signed => Err(ApiError::AlreadySigned),
        other => Err(ApiError::InvalidState(format!(
            "cannot sign a {} contract",
            other.as_str()
        ))),
    }
}

/// Capture the signature, stamp the PDF and move VIEWED → SIGNED.
pub async fn sign_contract(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    id: Uuid,
    submission: &SignatureSubmission,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<Contract> {
    let contract = db::contracts::get_contract(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", id)))?;

    check_signable(&contract)?;
    check_session(&contract, &submission.session_id)?;

    if !submission.agreed_to_terms {
        return Err(ApiError::TermsNotAgreed);
    }
    let (_, image_bytes) = pdf::decode_signature_data_url(&submission.signature_data_url)
        .map_err(|e| ApiError::InvalidSignatureImage(e.to_string()))?;

    let signer_name = submission.signer_name.trim();
    if signer_name.chars().count() < 2 {
        return Err(ApiError::ValidationError(
            "signer name must be at least 2 characters".into(),
        ));
    }
    let signer_email = submission.signer_email.trim();
    if !is_valid_email(signer_email) {
        return Err(ApiError::ValidationError(
            "signer email is not a valid address".into(),
        ));
    }

    let client = db::clients::get_client(pool, contract.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", contract.client_id)))?;
    if !client.email_matches(signer_email) {
        return Err(ApiError::EmailMismatch);
    }

    // Stamp before the transition: if this fails, the contract stays VIEWED
    let now = Utc::now();
    let source_pdf = match contract.pdf_path.as_deref() {
        Some(path) => tokio::fs::read(config.data_dir.join(path)).await?,
        None => pdf::render_contract_pdf(
            &contract.title,
            &contract.contract_number,
            &contract.body_html,
        )
        .map_err(|e| ApiError::IntegrationFailure(format!("PDF rendering failed: {}", e)))?,
    };
    let stamped = pdf::stamp_signature(
        &source_pdf,
        &image_bytes,
        &pdf::StampInfo {
            signer_name,
            signer_email,
            contract_number: &contract.contract_number,
            signed_at: now,
        },
    )
    .map_err(|e| ApiError::IntegrationFailure(format!("PDF stamping failed: {}", e)))?;

    let pdf_hash = pdf::sha256_hex(&stamped);
    let relative_path = format!(
        "uploads/{}",
        pdf::signed_filename(&contract.contract_number, &pdf_hash)
    );
    tokio::fs::create_dir_all(config.uploads_dir()).await?;
    tokio::fs::write(config.data_dir.join(&relative_path), &stamped).await?;

    let signed = db::contracts::mark_signed(
        pool,
        contract.id,
        &submission.session_id,
        signer_name,
        signer_email,
        Some(&relative_path),
        Some(&pdf_hash),
        now,
    )
    .await?;
    if !signed {
        // Lost the conditional update: either a concurrent submit won or the
        // session was replaced underneath us.
        let current = db::contracts::get_contract(pool, contract.id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {}", contract.id)))?;
        return Err(if current.status == ContractStatus::Signed {
            ApiError::AlreadySigned
        } else {
            ApiError::InvalidSession
        });
    }

    db::events::append_event(
        pool,
        contract.id,
        "SIGNED",
        json!({ "signer_email": signer_email, "pdf_hash": pdf_hash }),
        ip_address,
        user_agent,
    )
    .await?;
    db::events::append_audit(pool, "contract", contract.id, "SIGNED", Some(signer_email)).await?;
    webhooks::enqueue_event(
        pool,
        &StudioEvent::ContractSigned {
            contract_id: contract.id,
            contract_number: contract.contract_number.clone(),
            signer_name: signer_name.to_string(),
            signer_email: signer_email.to_string(),
            pdf_hash: Some(pdf_hash),
            timestamp: now,
        },
    )
    .await?;

    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            signer_email,
            &config.sender_email,
            mailer::signed_confirmation_email(
                signer_name,
                &contract.title,
                &contract.contract_number,
                now,
            ),
        ),
    )
    .await;
    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &config.admin_email,
            &config.sender_email,
            mailer::signed_admin_email(
                signer_name,
                signer_email,
                &contract.title,
                &contract.contract_number,
            ),
        ),
    )
    .await;

    tracing::info!(contract_id = %contract.id, signer_email, "Contract signed");
    db::contracts::get_contract(pool, contract.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", contract.id)))
}

/// Move VIEWED → DECLINED with an optional reason.
pub async fn decline_contract(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    id: Uuid,
    session_id: &str,
    reason: Option<&str>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<Contract> {
    let contract = db::contracts::get_contract(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", id)))?;

    check_signable(&contract)?;
    check_session(&contract, session_id)?;

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());

    let now = Utc::now();
    let declined = db::contracts::mark_declined(pool, contract.id, session_id, reason, now).await?;
    if !declined {
        let current = db::contracts::get_contract(pool, contract.id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {}", contract.id)))?;
        return Err(if current.status == ContractStatus::Signed {
            ApiError::AlreadySigned
        } else {
            ApiError::InvalidSession
        });
    }

    db::events::append_event(
        pool,
        contract.id,
        "DECLINED",
        json!({ "reason": reason }),
        ip_address,
        user_agent,
    )
    .await?;
    db::events::append_audit(pool, "contract", contract.id, "DECLINED", reason).await?;
    webhooks::enqueue_event(
        pool,
        &StudioEvent::ContractDeclined {
            contract_id: contract.id,
            contract_number: contract.contract_number.clone(),
            reason: reason.map(String::from),
            timestamp: now,
        },
    )
    .await?;

    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &config.admin_email,
            &config.sender_email,
            mailer::declined_email(&contract.title, &contract.contract_number, reason),
        ),
    )
    .await;

    tracing::info!(contract_id = %contract.id, "Contract declined");
    db::contracts::get_contract(pool, contract.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", contract.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, ContractTemplate, TemplateSection};
    use crate::services::lifecycle::{self, NewContract};
    use crate::services::mailer::LogEmailSender;
    use crate::services::pdf::TINY_PNG_B64;
    use studio_common::config::TomlConfig;

    fn test_config(dir: &std::path::Path) -> ServiceConfig {
        ServiceConfig::from_toml(&TomlConfig::default(), dir.to_path_buf())
    }

    fn submission(session_id: &str) -> SignatureSubmission {
        SignatureSubmission {
            session_id: session_id.to_string(),
            signature_data_url: format!("data:image/png;base64,{}", TINY_PNG_B64),
            signer_name: "Jane Doe".into(),
            signer_email: "jane@example.com".into(),
            agreed_to_terms: true,
        }
    }

    /// Create, send and open a session; returns (contract id, session id)
    async fn outstanding_contract(
        pool: &SqlitePool,
        config: &ServiceConfig,
    ) -> (Uuid, String) {
        let template = ContractTemplate {
            id: Uuid::new_v4(),
            name: "Portrait".into(),
            description: None,
            event_type: None,
            body_html: "<p>Dear {{client_name}}.</p>".into(),
            variables_schema: vec![TemplateSection {
                title: "Details".into(),
                fields: vec![],
            }],
            is_active: true,
            is_published: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db::templates::insert_template(pool, &template).await.unwrap();

        let client = Client {
            id: Uuid::new_v4(),
            name: "Jane Doe".into(),
            email: "jane@example.com".into(),
            phone: None,
            notes: None,
            created_at: Utc::now(),
        };
        db::clients::insert_client(pool, &client).await.unwrap();

        let sender = LogEmailSender;
        let contract = lifecycle::create_contract(
            pool,
            NewContract {
                template_id: template.id,
                client_id: client.id,
                title: "Portrait session".into(),
                proposal_id: None,
                variables: serde_json::Map::new(),
                sign_by_at: None,
            },
        )
        .await
        .unwrap();
        let sent = lifecycle::send_contract(pool, config, &sender, contract.id)
            .await
            .unwrap();
        let token = sent.magic_link_token.unwrap();
        let grant = lifecycle::open_signer_session(pool, config, &token, None, None, None)
            .await
            .unwrap();
        (contract.id, grant.session_id)
    }

    #[test]
    fn email_structure_check() {
        assert!(is_valid_email("jane@example.com"));
        assert!(is_valid_email("j.doe+tag@sub.example.co"));
        assert!(!is_valid_email("jane"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("jane@example"));
        assert!(!is_valid_email("jane@.com"));
        assert!(!is_valid_email("jane doe@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
    }

    #[tokio::test]
    async fn sign_happy_path_produces_signed_artifact() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sender = LogEmailSender;
        let (id, session_id) = outstanding_contract(&pool, &config).await;

        let signed = sign_contract(
            &pool,
            &config,
            &sender,
            id,
            &submission(&session_id),
            Some("203.0.113.9"),
            Some("Mozilla/5.0"),
        )
        .await
        .unwrap();

        assert_eq!(signed.status, ContractStatus::Signed);
        assert_eq!(signed.signer_name.as_deref(), Some("Jane Doe"));
        assert!(signed.signer_session_id.is_none());

        let path = config.data_dir.join(signed.pdf_path.as_deref().unwrap());
        assert!(path.to_string_lossy().contains("_signed_"));
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(pdf::sha256_hex(&bytes), signed.pdf_hash.unwrap());

        // Exactly one SIGNED event in the trail
        assert_eq!(
            db::events::count_events(&pool, id, "SIGNED").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn second_submit_reports_already_signed() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sender = LogEmailSender;
        let (id, session_id) = outstanding_contract(&pool, &config).await;

        sign_contract(&pool, &config, &sender, id, &submission(&session_id), None, None)
            .await
            .unwrap();
        let err = sign_contract(&pool, &config, &sender, id, &submission(&session_id), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadySigned));
        assert_eq!(
            db::events::count_events(&pool, id, "SIGNED").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn validation_order_and_codes() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sender = LogEmailSender;
        let (id, session_id) = outstanding_contract(&pool, &config).await;

        // Wrong session
        let err = sign_contract(&pool, &config, &sender, id, &submission("bogus"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidSession));

        // Terms not agreed
        let mut s = submission(&session_id);
        s.agreed_to_terms = false;
        let err = sign_contract(&pool, &config, &sender, id, &s, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TermsNotAgreed));

        // Bad image
        let mut s = submission(&session_id);
        s.signature_data_url = "data:image/gif;base64,AAAA".into();
        let err = sign_contract(&pool, &config, &sender, id, &s, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidSignatureImage(_)));

        // One-character name
        let mut s = submission(&session_id);
        s.signer_name = "J".into();
        let err = sign_contract(&pool, &config, &sender, id, &s, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        // Wrong signer email
        let mut s = submission(&session_id);
        s.signer_email = "intruder@example.com".into();
        let err = sign_contract(&pool, &config, &sender, id, &s, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmailMismatch));

        // Contract is untouched by all the failures above
        let loaded = db::contracts::get_contract(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContractStatus::Viewed);
    }

    #[tokio::test]
    async fn decline_records_reason_and_terminates() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sender = LogEmailSender;
        let (id, session_id) = outstanding_contract(&pool, &config).await;

        let declined = decline_contract(
            &pool,
            &config,
            &sender,
            id,
            &session_id,
            Some("  found another photographer  "),
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(declined.status, ContractStatus::Declined);
        assert_eq!(
            declined.voided_reason.as_deref(),
            Some("found another photographer")
        );

        // Signing afterwards conflicts
        let err = sign_contract(&pool, &config, &sender, id, &submission(&session_id), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }
}
