use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use reqwest::Method;
use serde::Deserialize;
use tracing::info;
use crate::error::{check_response, SourceError};
use crate::github::GithubApi;
use crate::traits::SecretStore;

#[derive(Debug, Deserialize)]
struct RepoPublicKey {
    key_id: String,
    key: String,
}

/// Writes repository Actions secrets
pub struct GithubSecretStore {
    api: GithubApi,
    owner: String,
    repo: String,
}

impl GithubSecretStore {
    pub fn new(api_url: &str, token: &str, owner: &str, repo: &str) -> Self {
        Self {
            api: GithubApi::new(api_url, token),
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    async fn public_key(&self) -> Result<RepoPublicKey, SourceError> {
        let response = self
            .api
            .request(
                Method::GET,
                &format!("/repos/{}/{}/actions/secrets/public-key", self.owner, self.repo),
            )
            .send()
            .await?;
        let response = check_response(response, "Secrets public key").await?;
        Ok(response.json().await?)
    }
}

/// Encrypt `value` as a libsodium sealed box for the base64 `public_key`
pub fn seal_secret(public_key: &str, value: &str) -> Result<String, SourceError> {
    let key_bytes = STANDARD
        .decode(public_key)
        .map_err(|e| SourceError::Crypto(format!("invalid public key encoding: {}", e)))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| SourceError::Crypto("public key must be 32 bytes".to_string()))?;

    let sealed = PublicKey::from(key_bytes)
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|e| SourceError::Crypto(e.to_string()))?;
    Ok(STANDARD.encode(sealed))
}

#[async_trait]
impl SecretStore for GithubSecretStore {
    async fn put_secret(&self, name: &str, value: &str) -> Result<(), SourceError> {
        let key = self.public_key().await?;
        let encrypted_value = seal_secret(&key.key, value)?;

        let response = self
            .api
            .request(
                Method::PUT,
                &format!("/repos/{}/{}/actions/secrets/{}", self.owner, self.repo, name),
            )
            .json(&serde_json::json!({
                "encrypted_value": encrypted_value,
                "key_id": key.key_id,
            }))
            .send()
            .await?;
        check_response(response, "Secret update").await?;

        info!(secret = name, repo = %format!("{}/{}", self.owner, self.repo), "Updated repository secret");
        Ok(())
    }
}
