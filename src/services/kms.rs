// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud KMS service for encrypting/decrypting OAuth tokens.
//!
//! Uses direct KMS encryption (not envelope encryption). Every ciphertext is
//! bound to the connection it belongs to through additional authenticated
//! data, so a token copied onto another connection row will not decrypt.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

const MOCK_PREFIX: &str = "mock";

/// KMS encryption service.
#[derive(Clone)]
pub struct KmsService {
    /// Full resource path to the KMS key
    /// Format: projects/{project}/locations/{location}/keyRings/{ring}/cryptoKeys/{key}
    key_path: String,

    /// GCP KMS client; `None` selects the offline cipher.
    client: Option<std::sync::Arc<google_cloud_kms::client::Client>>,
}

impl KmsService {
    /// KMS Key Ring Name
    const KEY_RING_NAME: &str = "provider-link";

    /// Create a new KMS service.
    /// Connects to GCP KMS.
    pub async fn new(project_id: &str, location: &str, key_name: &str) -> Result<Self, AppError> {
        let key_path = format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project_id,
            location,
            Self::KEY_RING_NAME,
            key_name
        );

        let config = google_cloud_kms::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS auth config: {}", e))
            })?;

        let client = google_cloud_kms::client::Client::new(config)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS client: {}", e))
            })?;

        Ok(Self {
            key_path,
            client: Some(std::sync::Arc::new(client)),
        })
    }

    /// Offline service for tests and `STORAGE=memory` runs.
    ///
    /// The ciphertext is plain base64 tagged with a digest of the AAD. It
    /// offers no confidentiality and must not be used against real storage.
    pub fn new_mock() -> Self {
        Self {
            key_path: "projects/mock/locations/mock/keyRings/mock/cryptoKeys/mock".to_string(),
            client: None,
        }
    }

    /// Encrypt plaintext, binding it to `aad` when given.
    /// Returns base64-encoded ciphertext.
    pub async fn encrypt(&self, plaintext: &str, aad: Option<&[u8]>) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::EncryptRequest;

        let Some(client) = self.client.as_ref() else {
            return Ok(format!(
                "{}:{}:{}",
                MOCK_PREFIX,
                aad_tag(aad),
                BASE64.encode(plaintext)
            ));
        };

        let req = EncryptRequest {
            name: self.key_path.clone(),
            plaintext: plaintext.as_bytes().to_vec(),
            additional_authenticated_data: aad.map(<[u8]>::to_vec).unwrap_or_default(),
            ..Default::default()
        };

        let response = client
            .encrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS encrypt failed: {}", e)))?;

        Ok(BASE64.encode(response.ciphertext))
    }

    /// Decrypt ciphertext produced by [`encrypt`](Self::encrypt) with the same AAD.
    pub async fn decrypt(&self, ciphertext_b64: &str, aad: Option<&[u8]>) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::DecryptRequest;

        let Some(client) = self.client.as_ref() else {
            return decrypt_mock(ciphertext_b64, aad);
        };

        let ciphertext = BASE64.decode(ciphertext_b64).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Base64 output decode failed: {}", e))
        })?;

        let req = DecryptRequest {
            name: self.key_path.clone(),
            ciphertext,
            additional_authenticated_data: aad.map(<[u8]>::to_vec).unwrap_or_default(),
            ..Default::default()
        };

        let response = client
            .decrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS decrypt failed: {}", e)))?;

        String::from_utf8(response.plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}

fn aad_tag(aad: Option<&[u8]>) -> String {
    match aad {
        Some(bytes) => hex::encode(Sha256::digest(bytes)),
        None => "none".to_string(),
    }
}

fn decrypt_mock(ciphertext: &str, aad: Option<&[u8]>) -> Result<String, AppError> {
    let mut parts = ciphertext.splitn(3, ':');
    let (Some(MOCK_PREFIX), Some(tag), Some(body)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::Internal(anyhow::anyhow!(
            "Malformed ciphertext (mock)"
        )));
    };

    if !bool::from(subtle::ConstantTimeEq::ct_eq(
        tag.as_bytes(),
        aad_tag(aad).as_bytes(),
    )) {
        return Err(AppError::Internal(anyhow::anyhow!(
            "KMS decrypt failed (mock): AAD mismatch"
        )));
    }

    let bytes = BASE64.decode(body).map_err(|e| {
        AppError::Internal(anyhow::anyhow!("Base64 output decode failed (mock): {}", e))
    })?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed (mock): {}", e)))
}
