//! Multi-party envelope workflow
//!
//! Signer actions run in a fixed order: envelope terminality, token expiry,
//! signing order (SEQUENTIAL only), then the conditional per-signer update.
//! The envelope status is recomputed from signer rows after every action, so
//! two racing signers cannot both complete the envelope.

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    validate_sequence, Envelope, EnvelopeMode, EnvelopeStatus, Signer, SignerStatus,
};
use crate::services::mailer::{self, EmailMessage, EmailSender};
use crate::services::signing::is_valid_email;
use crate::services::{pdf, tokens, webhooks};
use studio_common::events::StudioEvent;

/// One party in an envelope creation request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSigner {
    pub name: String,
    pub email: String,
    pub role: Option<String>,
    pub sequence_number: i64,
}

/// Envelope creation request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEnvelope {
    pub title: String,
    pub mode: EnvelopeMode,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub signers: Vec<NewSigner>,
}

/// Signature submission from one envelope party
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSubmission {
    pub signature_data_url: String,
    pub agreed_to_terms: bool,
}

pub async fn get_envelope_with_signers(
    pool: &SqlitePool,
    id: Uuid,
) -> ApiResult<(Envelope, Vec<Signer>)> {
    let envelope = db::envelopes::get_envelope(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("envelope {}", id)))?;
    let signers = db::envelopes::list_signers(pool, id).await?;
    Ok((envelope, signers))
}

/// Create a PENDING envelope with its signer roster.
///
/// Sequence numbers must be gapless 1..n in SEQUENTIAL mode; duplicate signer
/// emails are rejected in both modes.
pub async fn create_envelope(
    pool: &SqlitePool,
    input: NewEnvelope,
) -> ApiResult<(Envelope, Vec<Signer>)> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::ValidationError("title must not be empty".into()));
    }
    if input.signers.is_empty() {
        return Err(ApiError::ValidationError(
            "an envelope needs at least one signer".into(),
        ));
    }

    let mut seen_emails = std::collections::HashSet::new();
    for signer in &input.signers {
        if signer.name.trim().is_empty() {
            return Err(ApiError::ValidationError("signer name must not be empty".into()));
        }
        let email = signer.email.trim().to_ascii_lowercase();
        if !is_valid_email(&email) {
            return Err(ApiError::ValidationError(format!(
                "invalid signer email '{}'",
                signer.email
            )));
        }
        if !seen_emails.insert(email) {
            return Err(ApiError::ValidationError(format!(
                "duplicate signer email '{}'",
                signer.email
            )));
        }
    }

    if input.mode == EnvelopeMode::Sequential {
        let sequence: Vec<i64> = input.signers.iter().map(|s| s.sequence_number).collect();
        if !validate_sequence(&sequence) {
            return Err(ApiError::ValidationError(
                "sequence numbers must be gapless 1..n".into(),
            ));
        }
    }

    let now = Utc::now();
    if let Some(expires_at) = input.expires_at {
        if expires_at <= now {
            return Err(ApiError::ValidationError(
                "expires_at must be in the future".into(),
            ));
        }
    }

    let envelope = Envelope {
        id: Uuid::new_v4(),
        title,
        mode: input.mode,
        status: EnvelopeStatus::Pending,
        expires_at: input.expires_at,
        created_at: now,
    };
    db::envelopes::insert_envelope(pool, &envelope).await?;

    let mut signers = Vec::with_capacity(input.signers.len());
    for new_signer in input.signers {
        let signer = Signer {
            id: Uuid::new_v4(),
            envelope_id: envelope.id,
            name: new_signer.name.trim().to_string(),
            email: new_signer.email.trim().to_string(),
            role: new_signer.role,
            sequence_number: new_signer.sequence_number,
            token: None,
            token_expires_at: None,
            status: SignerStatus::Pending,
            acted_at: None,
            decline_reason: None,
        };
        db::envelopes::insert_signer(pool, &signer).await?;
        signers.push(signer);
    }
    signers.sort_by_key(|s| s.sequence_number);

    db::events::append_audit(pool, "envelope", envelope.id, "CREATED", Some(&envelope.title))
        .await?;
    tracing::info!(envelope_id = %envelope.id, signers = signers.len(), "Envelope created");
    Ok((envelope, signers))
}

/// Mint signer tokens and email every party their signing link.
///
/// Ordering in SEQUENTIAL mode is enforced at signing time, not invitation
/// time: every signer receives a link, but an out-of-turn signer is refused.
pub async fn send_envelope(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    id: Uuid,
) -> ApiResult<(Envelope, Vec<Signer>)> {
    let (envelope, signers) = get_envelope_with_signers(pool, id).await?;
    if envelope.status != EnvelopeStatus::Pending {
        return Err(ApiError::InvalidState(format!(
            "cannot send a {} envelope",
            envelope.status.as_str()
        )));
    }

    let now = Utc::now();
    let token_expires_at = envelope
        .expires_at
        .unwrap_or_else(|| tokens::expiry_hours(now, config.magic_link_ttl_hours));

    for signer in signers.iter().filter(|s| s.status == SignerStatus::Pending) {
        let token = tokens::mint_token();
        db::envelopes::set_signer_token(pool, signer.id, &token, token_expires_at).await?;

        let link_url = format!(
            "{}/envelope-sign/{}",
            config.public_base_url.trim_end_matches('/'),
            token
        );
        mailer::send_best_effort(
            sender,
            EmailMessage::new(
                &signer.email,
                &config.sender_email,
                mailer::envelope_invite_email(
                    &signer.name,
                    &envelope.title,
                    &link_url,
                    Some(token_expires_at),
                ),
            ),
        )
        .await;
    }

    db::events::append_audit(pool, "envelope", envelope.id, "SENT", None).await?;
    tracing::info!(envelope_id = %envelope.id, "Envelope sent");
    get_envelope_with_signers(pool, id).await
}

/// Resolve a signer token and run the shared pre-action checks
async fn resolve_signer(pool: &SqlitePool, token: &str) -> ApiResult<(Envelope, Signer)> {
    let signer = db::envelopes::get_signer_by_token(pool, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("signing request".into()))?;
    let envelope = db::envelopes::get_envelope(pool, signer.envelope_id)
        .await?
        .ok_or_else(|| ApiError::Internal("signer without envelope".into()))?;

    if envelope.status.is_terminal() {
        return Err(ApiError::InvalidState(format!(
            "envelope is {}",
            envelope.status.as_str()
        )));
    }

    let now = Utc::now();
    if let Some(expires_at) = envelope.expires_at {
        if now > expires_at {
            // Lazy expiry: the first access past the deadline closes it
            db::envelopes::set_envelope_status(pool, envelope.id, EnvelopeStatus::Expired).await?;
            return Err(ApiError::TokenExpired);
        }
    }
    if tokens::is_expired(signer.token_expires_at, now) {
        return Err(ApiError::TokenExpired);
    }

    Ok((envelope, signer))
}

/// What one envelope party sees after following their link
pub async fn view_signer(
    pool: &SqlitePool,
    token: &str,
) -> ApiResult<(Envelope, Signer, Vec<Signer>)> {
    let (envelope, signer) = resolve_signer(pool, token).await?;
    let signers = db::envelopes::list_signers(pool, envelope.id).await?;
    Ok((envelope, signer, signers))
}

/// In SEQUENTIAL mode every lower-sequence signer must have signed
fn check_signing_order(envelope: &Envelope, signer: &Signer, signers: &[Signer]) -> ApiResult<()> {
    if envelope.mode != EnvelopeMode::Sequential {
        return Ok(());
    }
    for earlier in signers
        .iter()
        .filter(|s| s.sequence_number < signer.sequence_number)
    {
        if earlier.status != SignerStatus::Signed {
            return Err(ApiError::SigningOrderViolation(format!(
                "signer {} has not signed yet",
                earlier.sequence_number
            )));
        }
    }
    Ok(())
}

/// Recompute the aggregate envelope status after a signer action.
///
/// While any signer is still PENDING the envelope stays PENDING. Once every
/// signer has acted: all signed means COMPLETED, any decline means DECLINED.
/// The conditional update makes the last of two racing signers lose cleanly.
async fn finish_envelope_if_done(
    pool: &SqlitePool,
    envelope: &Envelope,
) -> ApiResult<Option<EnvelopeStatus>> {
    let signers = db::envelopes::list_signers(pool, envelope.id).await?;
    if signers.iter().any(|s| s.status == SignerStatus::Pending) {
        return Ok(None);
    }

    if let Some(declined) = signers
        .iter()
        .find(|s| s.status == SignerStatus::Declined)
    {
        let won =
            db::envelopes::set_envelope_status(pool, envelope.id, EnvelopeStatus::Declined).await?;
        if won {
            webhooks::enqueue_event(
                pool,
                &StudioEvent::EnvelopeDeclined {
                    envelope_id: envelope.id,
                    signer_email: declined.email.clone(),
                    reason: declined.decline_reason.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await?;
            return Ok(Some(EnvelopeStatus::Declined));
        }
        return Ok(None);
    }

    let won =
        db::envelopes::set_envelope_status(pool, envelope.id, EnvelopeStatus::Completed).await?;
    if won {
        webhooks::enqueue_event(
            pool,
            &StudioEvent::EnvelopeCompleted {
                envelope_id: envelope.id,
                timestamp: Utc::now(),
            },
        )
        .await?;
        return Ok(Some(EnvelopeStatus::Completed));
    }
    Ok(None)
}

/// One party signs their part of the envelope.
pub async fn sign_envelope(
    pool: &SqlitePool,
    token: &str,
    submission: &EnvelopeSubmission,
) -> ApiResult<(Envelope, Vec<Signer>)> {
    let (envelope, signer) = resolve_signer(pool, token).await?;
    if signer.status != SignerStatus::Pending {
        return Err(ApiError::AlreadySigned);
    }

    let signers = db::envelopes::list_signers(pool, envelope.id).await?;
    check_signing_order(&envelope, &signer, &signers)?;

    if !submission.agreed_to_terms {
        return Err(ApiError::TermsNotAgreed);
    }
    pdf::decode_signature_data_url(&submission.signature_data_url)
        .map_err(|e| ApiError::InvalidSignatureImage(e.to_string()))?;

    let now = Utc::now();
    if !db::envelopes::mark_signer_signed(pool, signer.id, now).await? {
        return Err(ApiError::AlreadySigned);
    }
    db::envelopes::insert_signature(pool, signer.id, envelope.id, &submission.signature_data_url, now)
        .await?;
    db::events::append_audit(pool, "envelope", envelope.id, "SIGNER_SIGNED", Some(&signer.email))
        .await?;

    finish_envelope_if_done(pool, &envelope).await?;
    tracing::info!(envelope_id = %envelope.id, signer_email = %signer.email, "Envelope signer signed");
    get_envelope_with_signers(pool, envelope.id).await
}

/// One party declines. By default the first decline terminates the whole
/// envelope; with `envelope_decline_terminates` off the remaining signers may
/// still act.
pub async fn decline_envelope(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    token: &str,
    reason: Option<&str>,
) -> ApiResult<(Envelope, Vec<Signer>)> {
    let (envelope, signer) = resolve_signer(pool, token).await?;
    if signer.status != SignerStatus::Pending {
        return Err(ApiError::InvalidState(format!(
            "signer has already {}",
            signer.status.as_str()
        )));
    }

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let now = Utc::now();
    if !db::envelopes::mark_signer_declined(pool, signer.id, reason, now).await? {
        return Err(ApiError::InvalidState("signer has already acted".into()));
    }
    db::events::append_audit(pool, "envelope", envelope.id, "SIGNER_DECLINED", reason).await?;

    if config.envelope_decline_terminates {
        let won =
            db::envelopes::set_envelope_status(pool, envelope.id, EnvelopeStatus::Declined).await?;
        if won {
            webhooks::enqueue_event(
                pool,
                &StudioEvent::EnvelopeDeclined {
                    envelope_id: envelope.id,
                    signer_email: signer.email.clone(),
                    reason: reason.map(String::from),
                    timestamp: now,
                },
            )
            .await?;
        }
    } else {
        // Remaining signers may still act; once everyone has, the recompute
        // settles the envelope as DECLINED
        finish_envelope_if_done(pool, &envelope).await?;
    }

    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &config.admin_email,
            &config.sender_email,
            mailer::declined_email(&envelope.title, "envelope", reason),
        ),
    )
    .await;

    tracing::info!(envelope_id = %envelope.id, signer_email = %signer.email, "Envelope signer declined");
    get_envelope_with_signers(pool, envelope.id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mailer::LogEmailSender;
    use crate::services::pdf::TINY_PNG_B64;
    use studio_common::config::TomlConfig;

    fn test_config() -> ServiceConfig {
        ServiceConfig::from_toml(&TomlConfig::default(), std::path::PathBuf::from("/tmp/sd"))
    }

    fn submission() -> EnvelopeSubmission {
        EnvelopeSubmission {
            signature_data_url: format!("data:image/png;base64,{}", TINY_PNG_B64),
            agreed_to_terms: true,
        }
    }

    fn two_party(mode: EnvelopeMode) -> NewEnvelope {
        NewEnvelope {
            title: "Venue and couple".into(),
            mode,
            expires_at: None,
            signers: vec![
                NewSigner {
                    name: "Jane Doe".into(),
                    email: "jane@example.com".into(),
                    role: Some("client".into()),
                    sequence_number: 1,
                },
                NewSigner {
                    name: "Venue Manager".into(),
                    email: "venue@example.com".into(),
                    role: Some("venue".into()),
                    sequence_number: 2,
                },
            ],
        }
    }

    async fn sent_envelope(
        pool: &SqlitePool,
        config: &ServiceConfig,
        mode: EnvelopeMode,
    ) -> (Envelope, Vec<Signer>) {
        let sender = LogEmailSender;
        let (envelope, _) = create_envelope(pool, two_party(mode)).await.unwrap();
        send_envelope(pool, config, &sender, envelope.id).await.unwrap()
    }

    #[tokio::test]
    async fn create_validates_sequence_and_emails() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        let mut gapped = two_party(EnvelopeMode::Sequential);
        gapped.signers[1].sequence_number = 3;
        let err = create_envelope(&pool, gapped).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(m) if m.contains("gapless")));

        let mut duplicated = two_party(EnvelopeMode::Parallel);
        duplicated.signers[1].email = "JANE@example.com".into();
        let err = create_envelope(&pool, duplicated).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(m) if m.contains("duplicate")));

        // Gaps are fine in PARALLEL mode
        let mut parallel = two_party(EnvelopeMode::Parallel);
        parallel.signers[1].sequence_number = 5;
        create_envelope(&pool, parallel).await.unwrap();
    }

    #[tokio::test]
    async fn send_mints_a_token_per_signer() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = test_config();
        let (_, signers) = sent_envelope(&pool, &config, EnvelopeMode::Parallel).await;

        assert_eq!(signers.len(), 2);
        for signer in &signers {
            assert!(signer.token.is_some());
            assert!(signer.token_expires_at.is_some());
        }
        assert_ne!(signers[0].token, signers[1].token);
    }

    #[tokio::test]
    async fn sequential_enforces_order() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = test_config();
        let (_, signers) = sent_envelope(&pool, &config, EnvelopeMode::Sequential).await;

        let second_token = signers[1].token.clone().unwrap();
        let err = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SigningOrderViolation(_)));

        let first_token = signers[0].token.clone().unwrap();
        let (envelope, _) = sign_envelope(&pool, &first_token, &submission())
            .await
            .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Pending);

        let (envelope, after) = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Completed);
        assert!(after.iter().all(|s| s.status == SignerStatus::Signed));
    }

    #[tokio::test]
    async fn parallel_signers_act_in_any_order() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = test_config();
        let (_, signers) = sent_envelope(&pool, &config, EnvelopeMode::Parallel).await;

        let second_token = signers[1].token.clone().unwrap();
        let (envelope, _) = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Pending);

        // Re-using a spent token is refused
        let err = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn first_decline_terminates_by_default() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = test_config();
        let sender = LogEmailSender;
        let (_, signers) = sent_envelope(&pool, &config, EnvelopeMode::Parallel).await;

        let first_token = signers[0].token.clone().unwrap();
        let (envelope, after) =
            decline_envelope(&pool, &config, &sender, &first_token, Some("not ready"))
                .await
                .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Declined);
        assert_eq!(after[0].status, SignerStatus::Declined);
        assert_eq!(after[0].decline_reason.as_deref(), Some("not ready"));

        // The other signer can no longer act
        let second_token = signers[1].token.clone().unwrap();
        let err = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }

    #[tokio::test]
    async fn decline_without_termination_settles_declined_once_all_acted() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = ServiceConfig::from_toml(
            &TomlConfig {
                envelope_decline_terminates: Some(false),
                ..Default::default()
            },
            std::path::PathBuf::from("/tmp/sd"),
        );
        let sender = LogEmailSender;
        let endpoint = crate::models::WebhookEndpoint {
            id: Uuid::new_v4(),
            url: "https://hooks.example.com/studio".into(),
            secret: "whsec_test".into(),
            event_types: vec!["envelope.declined".into()],
            timeout_ms: 10_000,
            max_attempts: 5,
            is_active: true,
            created_at: Utc::now(),
        };
        db::webhooks::insert_endpoint(&pool, &endpoint).await.unwrap();
        let (_, signers) = sent_envelope(&pool, &config, EnvelopeMode::Parallel).await;

        // The first decline leaves the envelope open for the other signer
        let first_token = signers[0].token.clone().unwrap();
        let (envelope, _) =
            decline_envelope(&pool, &config, &sender, &first_token, Some("not ready"))
                .await
                .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Pending);

        // Once the last signer acts, one declined party settles the envelope
        let second_token = signers[1].token.clone().unwrap();
        let (envelope, after) = sign_envelope(&pool, &second_token, &submission())
            .await
            .unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Declined);
        assert_eq!(after[0].status, SignerStatus::Declined);
        assert_eq!(after[1].status, SignerStatus::Signed);

        let deliveries = db::webhooks::list_deliveries_for_endpoint(&pool, endpoint.id)
            .await
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event_type, "envelope.declined");
    }
}
