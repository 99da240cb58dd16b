pub mod gist;
pub mod secrets;

pub use gist::GistSink;
pub use secrets::{seal_secret, GithubSecretStore};

use reqwest::{Client, Method, RequestBuilder};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Shared request plumbing for the GitHub REST API
#[derive(Clone)]
pub(crate) struct GithubApi {
    client: Client,
    api_url: String,
    token: String,
}

impl GithubApi {
    pub(crate) fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("rewind/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Plain GET on an absolute URL (gist raw content)
    pub(crate) fn get_absolute(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
    }
}
