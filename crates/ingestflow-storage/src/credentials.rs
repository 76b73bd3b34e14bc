//! Credentials Store adapter (spec §4.8, ambient, supplementing §6):
//! envelope-encrypted integration credentials, never decrypted or logged
//! outside of `CredentialsStore::get`. Grounded in
//! `everruns-storage::encryption::EncryptionService`, adapted for key
//! material sourced from `ingestflow_core::config::Config` and for storage
//! against the `integrations.encrypted_credentials` column rather than a
//! generic encrypted-field helper.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::instrument;

use crate::database::Database;
use crate::error::{Result, StoreError};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const DEK_SIZE: usize = 32;
const PAYLOAD_VERSION: u8 = 1;

/// Envelope-encrypted payload persisted as the `encrypted_credentials` jsonb
/// column on `integrations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedPayload {
    version: u8,
    key_id: String,
    dek_wrapped: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Clone)]
struct VersionedKey {
    id: String,
    cipher: Aes256Gcm,
}

/// Envelope encryption with key rotation: a per-value data-encryption key
/// (DEK) is wrapped by a versioned key-encryption key (KEK) so old
/// credential rows stay decryptable after the primary key rotates.
#[derive(Clone)]
pub struct EncryptionService {
    primary: Arc<VersionedKey>,
    keys: Arc<HashMap<String, Aes256Gcm>>,
}

impl EncryptionService {
    /// `keys` are `"key_id:base64_key"` strings; the first is primary.
    pub fn new(primary_key: &str, previous_keys: &[String]) -> anyhow::Result<Self> {
        let (primary_id, primary_cipher) = parse_versioned_key(primary_key)?;
        let mut keys = HashMap::new();
        keys.insert(primary_id.clone(), primary_cipher.clone());
        for key_str in previous_keys {
            let (id, cipher) = parse_versioned_key(key_str)?;
            if keys.contains_key(&id) {
                anyhow::bail!("duplicate key id: {id}");
            }
            keys.insert(id, cipher);
        }
        Ok(Self {
            primary: Arc::new(VersionedKey {
                id: primary_id,
                cipher: primary_cipher,
            }),
            keys: Arc::new(keys),
        })
    }

    pub fn from_config(config: &ingestflow_core::config::Config) -> anyhow::Result<Self> {
        Self::new(
            &config.credentials_encryption_key,
            &config.credentials_encryption_key_previous,
        )
    }

    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<EncryptedPayload> {
        let mut dek = [0u8; DEK_SIZE];
        rand::thread_rng().fill_bytes(&mut dek);

        let mut dek_nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut dek_nonce_bytes);
        let wrapped_dek = self
            .primary
            .cipher
            .encrypt(Nonce::from_slice(&dek_nonce_bytes), dek.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to wrap DEK: {e}"))?;

        let dek_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("failed to build DEK cipher: {e}"))?;
        let mut data_nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut data_nonce_bytes);
        let ciphertext = dek_cipher
            .encrypt(Nonce::from_slice(&data_nonce_bytes), plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut dek_wrapped_bytes = Vec::with_capacity(NONCE_SIZE + wrapped_dek.len());
        dek_wrapped_bytes.extend_from_slice(&dek_nonce_bytes);
        dek_wrapped_bytes.extend_from_slice(&wrapped_dek);

        Ok(EncryptedPayload {
            version: PAYLOAD_VERSION,
            key_id: self.primary.id.clone(),
            dek_wrapped: BASE64.encode(dek_wrapped_bytes),
            nonce: BASE64.encode(data_nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    fn decrypt(&self, payload: &EncryptedPayload) -> anyhow::Result<Vec<u8>> {
        if payload.version != PAYLOAD_VERSION {
            anyhow::bail!("unsupported credentials payload version {}", payload.version);
        }
        let kek = self
            .keys
            .get(&payload.key_id)
            .ok_or_else(|| anyhow::anyhow!("unknown key id '{}'", payload.key_id))?;

        let dek_wrapped_bytes = BASE64.decode(&payload.dek_wrapped)?;
        if dek_wrapped_bytes.len() < NONCE_SIZE {
            anyhow::bail!("wrapped DEK too short");
        }
        let (dek_nonce_bytes, wrapped_dek) = dek_wrapped_bytes.split_at(NONCE_SIZE);
        let dek_bytes = kek
            .decrypt(Nonce::from_slice(dek_nonce_bytes), wrapped_dek)
            .map_err(|e| anyhow::anyhow!("failed to unwrap DEK: {e}"))?;
        if dek_bytes.len() != DEK_SIZE {
            anyhow::bail!("invalid DEK size after unwrap");
        }

        let dek_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("failed to build DEK cipher: {e}"))?;
        let data_nonce_bytes = BASE64.decode(&payload.nonce)?;
        let ciphertext = BASE64.decode(&payload.ciphertext)?;

        dek_cipher
            .decrypt(Nonce::from_slice(&data_nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow::anyhow!("decryption failed, credentials may be corrupt: {e}"))
    }
}

fn parse_versioned_key(key_str: &str) -> anyhow::Result<(String, Aes256Gcm)> {
    let (key_id, b64) = key_str
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected 'key_id:base64_key'"))?;
    let key_bytes = BASE64.decode(b64)?;
    if key_bytes.len() != KEY_SIZE {
        anyhow::bail!("key '{key_id}' must be {KEY_SIZE} bytes, got {}", key_bytes.len());
    }
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| anyhow::anyhow!("failed to build cipher for key '{key_id}': {e}"))?;
    Ok((key_id.to_string(), cipher))
}

#[async_trait]
pub trait CredentialsStore: Send + Sync {
    /// Decrypted credential payload for the integration, tenant-scoped.
    async fn get(&self, tenant_id: i64, integration_id: i64) -> Result<serde_json::Value>;

    /// Encrypt and persist new credentials for the integration.
    async fn put(&self, tenant_id: i64, integration_id: i64, credentials: serde_json::Value) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresCredentialsStore {
    db: Database,
    encryption: EncryptionService,
}

impl PostgresCredentialsStore {
    pub fn new(db: Database, encryption: EncryptionService) -> Self {
        Self { db, encryption }
    }
}

#[async_trait]
impl CredentialsStore for PostgresCredentialsStore {
    #[instrument(skip(self))]
    async fn get(&self, tenant_id: i64, integration_id: i64) -> Result<serde_json::Value> {
        let row = sqlx::query(
            "SELECT encrypted_credentials FROM integrations WHERE id = $1 AND tenant_id = $2",
        )
        .bind(integration_id)
        .bind(tenant_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(StoreError::IntegrationNotFound(integration_id))?;

        let stored: serde_json::Value = row.get("encrypted_credentials");
        let payload: EncryptedPayload = serde_json::from_value(stored)?;
        let plaintext = self
            .encryption
            .decrypt(&payload)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        serde_json::from_slice(&plaintext).map_err(StoreError::Serialization)
    }

    #[instrument(skip(self, credentials))]
    async fn put(&self, tenant_id: i64, integration_id: i64, credentials: serde_json::Value) -> Result<()> {
        let plaintext = serde_json::to_vec(&credentials)?;
        let payload = self
            .encryption
            .encrypt(&plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let stored = serde_json::to_value(&payload)?;

        sqlx::query(
            "UPDATE integrations SET encrypted_credentials = $3 WHERE id = $1 AND tenant_id = $2",
        )
        .bind(integration_id)
        .bind(tenant_id)
        .bind(stored)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(id: &str) -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        format!("{id}:{}", BASE64.encode(key))
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let service = EncryptionService::new(&test_key("kek-v1"), &[]).unwrap();
        let payload = service.encrypt(b"token-abc123").unwrap();
        let plaintext = service.decrypt(&payload).unwrap();
        assert_eq!(plaintext, b"token-abc123");
    }

    #[test]
    fn rotated_key_still_decrypts_old_payloads() {
        let key_v1 = test_key("kek-v1");
        let service_v1 = EncryptionService::new(&key_v1, &[]).unwrap();
        let old_payload = service_v1.encrypt(b"old-secret").unwrap();

        let service_v2 = EncryptionService::new(&test_key("kek-v2"), &[key_v1]).unwrap();
        let plaintext = service_v2.decrypt(&old_payload).unwrap();
        assert_eq!(plaintext, b"old-secret");
    }

    #[test]
    fn unknown_key_id_fails_closed() {
        let service_v1 = EncryptionService::new(&test_key("kek-v1"), &[]).unwrap();
        let payload = service_v1.encrypt(b"secret").unwrap();

        let service_v2 = EncryptionService::new(&test_key("kek-v2"), &[]).unwrap();
        assert!(service_v2.decrypt(&payload).is_err());
    }

    #[test]
    fn rejects_malformed_key_string() {
        assert!(EncryptionService::new("not-versioned", &[]).is_err());
    }
}
