//! In-memory API key database. Keys are stored as SHA-256 hashes; the raw
//! key is never retained once issued. Ported from the original
//! `ApiKeyDB`: `add_key`/`get_key_info`/`revoke_key`/`generate_key`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub user_id: String,
    pub name: String,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,
    /// RFC 3339 timestamp, seconds since epoch rendered by the caller.
    pub created_at: u64,
    pub metadata: Value,
    pub active: bool,
}

#[derive(Default)]
pub struct ApiKeyStore {
    keys: DashMap<String, ApiKeyRecord>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes and stores `key`, returning the hash used as the lookup id.
    pub fn add_key(
        &self,
        key: &str,
        user_id: impl Into<String>,
        name: impl Into<String>,
        rate_limit_per_minute: u32,
        rate_limit_per_hour: u32,
        metadata: Option<Value>,
    ) -> String {
        let key_hash = Self::hash_key(key);
        let record = ApiKeyRecord {
            user_id: user_id.into(),
            name: name.into(),
            rate_limit_per_minute,
            rate_limit_per_hour,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            active: true,
        };
        self.keys.insert(key_hash.clone(), record);
        key_hash
    }

    /// Looks up a raw bearer token; returns `None` if absent or revoked.
    pub fn get_key_info(&self, key: &str) -> Option<ApiKeyRecord> {
        let key_hash = Self::hash_key(key);
        self.keys
            .get(&key_hash)
            .filter(|entry| entry.active)
            .map(|entry| entry.clone())
    }

    /// Soft-deletes a key. Returns `true` if a matching active key existed.
    pub fn revoke_key(&self, key: &str) -> bool {
        let key_hash = Self::hash_key(key);
        if let Some(mut entry) = self.keys.get_mut(&key_hash) {
            if entry.active {
                entry.active = false;
                return true;
            }
        }
        false
    }

    pub fn list(&self) -> Vec<(String, ApiKeyRecord)> {
        self.keys
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generates `{prefix}_{urlsafe-base64 of 32 random bytes}`, the Rust
    /// equivalent of `secrets.token_urlsafe(32)`.
    pub fn generate(prefix: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
    }
}
