//! Cryptographic verification of provider envelopes.
//!
//! The provider signs a canonical `key\nvalue\n` rendering of selected
//! envelope fields with the key in the certificate at `SigningCertURL`:
//! RSA PKCS#1 v1.5 over SHA-1 for signature version 1, SHA-256 for version 2.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use super::envelope::{Envelope, EnvelopeType};
use super::provider::{validate_provider_url, ProviderHttp};
use crate::error::IngestError;

/// The exact byte string the provider signed.
pub fn canonical_string(env: &Envelope) -> Result<String, IngestError> {
    let mut fields: Vec<(&str, &str)> = Vec::with_capacity(7);
    match env.envelope_type()? {
        EnvelopeType::Notification => {
            fields.push(("Message", &env.message));
            fields.push(("MessageId", &env.message_id));
            if let Some(subject) = env.subject.as_deref() {
                fields.push(("Subject", subject));
            }
            fields.push(("Timestamp", &env.timestamp));
            fields.push(("TopicArn", &env.topic_arn));
            fields.push(("Type", &env.kind));
        }
        EnvelopeType::SubscriptionConfirmation | EnvelopeType::UnsubscribeConfirmation => {
            fields.push(("Message", &env.message));
            fields.push(("MessageId", &env.message_id));
            fields.push(("SubscribeURL", env.subscribe_url.as_deref().unwrap_or_default()));
            fields.push(("Timestamp", &env.timestamp));
            fields.push(("Token", env.token.as_deref().unwrap_or_default()));
            fields.push(("TopicArn", &env.topic_arn));
            fields.push(("Type", &env.kind));
        }
    }

    let mut out = String::new();
    for (key, value) in fields {
        out.push_str(key);
        out.push('\n');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Extract the RSA public key from a PEM certificate.
pub fn public_key_from_pem(pem: &[u8]) -> Result<RsaPublicKey, IngestError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| IngestError::SignatureRejected(format!("invalid certificate PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| IngestError::SignatureRejected(format!("invalid certificate: {e}")))?;
    RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| IngestError::SignatureRejected(format!("unsupported certificate key: {e}")))
}

/// Check the envelope signature against a known key.
pub fn verify_with_key(env: &Envelope, key: &RsaPublicKey) -> Result<(), IngestError> {
    let canonical = canonical_string(env)?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(env.signature.trim())
        .map_err(|e| IngestError::SignatureRejected(format!("signature is not base64: {e}")))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| IngestError::SignatureRejected(e.to_string()))?;

    let verified = match env.signature_version.as_str() {
        "1" => VerifyingKey::<Sha1>::new(key.clone()).verify(canonical.as_bytes(), &signature),
        "2" => VerifyingKey::<Sha256>::new(key.clone()).verify(canonical.as_bytes(), &signature),
        other => {
            return Err(IngestError::SignatureRejected(format!(
                "unsupported signature version {other:?}"
            )))
        }
    };
    verified.map_err(|_| IngestError::SignatureRejected("signature mismatch".to_string()))
}

/// Fetches and caches signing certificates, then verifies envelopes.
pub struct SignatureVerifier {
    http: Arc<dyn ProviderHttp>,
    keys: RwLock<HashMap<String, RsaPublicKey>>,
}

impl SignatureVerifier {
    pub fn new(http: Arc<dyn ProviderHttp>) -> Self {
        Self {
            http,
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub async fn verify(&self, env: &Envelope) -> Result<(), IngestError> {
        let key = self.signing_key(&env.signing_cert_url).await?;
        verify_with_key(env, &key)
    }

    async fn signing_key(&self, cert_url: &str) -> Result<RsaPublicKey, IngestError> {
        if let Some(key) = self.keys.read().await.get(cert_url) {
            return Ok(key.clone());
        }

        validate_provider_url(cert_url).map_err(IngestError::InvalidSigningCert)?;
        let reply = self
            .http
            .get(cert_url)
            .await
            .map_err(|e| IngestError::SignatureRejected(format!("certificate fetch failed: {e}")))?;
        if reply.status != 200 {
            return Err(IngestError::SignatureRejected(format!(
                "certificate fetch returned HTTP {}",
                reply.status
            )));
        }

        let key = public_key_from_pem(&reply.body)?;
        debug!(cert_url, "Cached provider signing certificate");
        self.keys
            .write()
            .await
            .insert(cert_url.to_string(), key.clone());
        Ok(key)
    }
}
