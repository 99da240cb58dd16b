use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{check_response, SourceError};

const REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Create a reqwest Client with browser-like headers to bypass Cloudflare
pub fn create_trakt_client() -> Client {
    Client::builder()
        .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Exchange a refresh token for a new access/refresh pair
pub async fn refresh_access_token(
    client: &Client,
    api_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenInfo, SourceError> {
    let payload = serde_json::json!({
        "refresh_token": refresh_token,
        "client_id": client_id,
        "client_secret": client_secret,
        "redirect_uri": REDIRECT_URI,
        "grant_type": "refresh_token"
    });

    let response = client
        .post(format!("{}/oauth/token", api_url))
        .json(&payload)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header("Origin", "https://trakt.tv")
        .header("Referer", "https://trakt.tv/")
        .send()
        .await?;

    let response = check_response(response, "Token refresh").await?;
    let token_response: TokenResponse = response.json().await?;
    debug!(expires_in = token_response.expires_in, "Received refreshed Trakt token");

    Ok(token_info_from(token_response, Utc::now()))
}

fn token_info_from(token_response: TokenResponse, now: DateTime<Utc>) -> TokenInfo {
    // Treat the token as expired two minutes early
    let expires_at = now + Duration::seconds(token_response.expires_in as i64 - 120);
    TokenInfo {
        access_token: token_response.access_token,
        refresh_token: token_response.refresh_token,
        expires_at,
    }
}
