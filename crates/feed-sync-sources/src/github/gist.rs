use async_trait::async_trait;
use feed_sync_models::FeedDocument;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use crate::error::{check_response, SourceError};
use crate::github::GithubApi;
use crate::traits::FeedSink;

#[derive(Debug, Deserialize)]
struct GistFile {
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Gist {
    #[serde(default)]
    files: HashMap<String, Option<GistFile>>,
}

/// Publishes the feed document as a single file of an existing gist
pub struct GistSink {
    api: GithubApi,
    gist_id: String,
    filename: String,
}

impl GistSink {
    pub fn new(api_url: &str, token: &str, gist_id: &str, filename: &str) -> Self {
        Self {
            api: GithubApi::new(api_url, token),
            gist_id: gist_id.to_string(),
            filename: filename.to_string(),
        }
    }

    fn update_payload(&self, content: String) -> serde_json::Value {
        serde_json::json!({
            "files": {
                self.filename.as_str(): { "content": content }
            }
        })
    }
}

/// Stored content that does not parse is treated as absent
fn parse_document(content: &str) -> Option<FeedDocument> {
    match serde_json::from_str(content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(error = %e, "Stored feed document is malformed, ignoring it");
            None
        }
    }
}

#[async_trait]
impl FeedSink for GistSink {
    fn sink_name(&self) -> &str {
        "gist"
    }

    async fn publish(&self, document: &FeedDocument) -> Result<(), SourceError> {
        let content = serde_json::to_string_pretty(document)?;
        let payload = self.update_payload(content);

        let response = self
            .api
            .request(Method::PATCH, &format!("/gists/{}", self.gist_id))
            .json(&payload)
            .send()
            .await?;
        check_response(response, "Gist update").await?;

        info!(
            gist_id = %self.gist_id,
            filename = %self.filename,
            items = document.items.len(),
            calendar = document.calendar.len(),
            "Published feed document"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Option<FeedDocument>, SourceError> {
        let response = self
            .api
            .request(Method::GET, &format!("/gists/{}", self.gist_id))
            .send()
            .await?;
        let response = check_response(response, "Gist read").await?;
        let gist: Gist = response.json().await?;

        let file = match gist.files.get(&self.filename) {
            Some(Some(file)) => file,
            _ => {
                debug!(filename = %self.filename, "Gist has no feed file yet");
                return Ok(None);
            }
        };

        // Large files come back truncated and must be fetched from raw_url
        let content = match (&file.content, file.truncated, &file.raw_url) {
            (_, true, Some(raw_url)) => {
                let response = self.api.get_absolute(raw_url).send().await?;
                let response = check_response(response, "Gist raw read").await?;
                response.text().await?
            }
            (Some(content), _, _) => content.clone(),
            _ => return Ok(None),
        };

        Ok(parse_document(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;
    use chrono::Utc;
    use feed_sync_models::WatchStats;

    fn document() -> FeedDocument {
        FeedDocument {
            updated_at: Utc::now(),
            items: Vec::new(),
            stats: WatchStats {
                movies_watched: 12,
                shows_watched: 4,
                total_hours: 80,
            },
            calendar: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_named_file() {
        let server = StubServer::start(vec![(200, "{}")]).await;
        let sink = GistSink::new(&server.base_url, "gh-token", "abc123", "watch-history.json");

        sink.publish(&document()).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].method, "PATCH");
        assert_eq!(requests[0].path, "/gists/abc123");
        assert_eq!(requests[0].header("authorization"), Some("Bearer gh-token"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        let content = body["files"]["watch-history.json"]["content"].as_str().unwrap();
        let stored: FeedDocument = serde_json::from_str(content).unwrap();
        assert_eq!(stored.stats.movies_watched, 12);
    }

    #[tokio::test]
    async fn test_read_back_published_content() {
        let content = serde_json::to_string(&document()).unwrap();
        let body = serde_json::json!({
            "files": { "watch-history.json": { "content": content, "truncated": false } }
        })
        .to_string();
        let server = StubServer::start(vec![(200, body.as_str())]).await;
        let sink = GistSink::new(&server.base_url, "t", "abc123", "watch-history.json");

        let doc = sink.read().await.unwrap().unwrap();
        assert_eq!(doc.stats.total_hours, 80);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_file_reads_as_none() {
        let server = StubServer::start(vec![
            (200, r#"{"files":{}}"#),
            (200, r#"{"files":{"watch-history.json":{"content":"not json"}}}"#),
        ])
        .await;
        let sink = GistSink::new(&server.base_url, "t", "abc123", "watch-history.json");

        assert!(sink.read().await.unwrap().is_none());
        assert!(sink.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_surfaces_http_status() {
        let server = StubServer::start(vec![(404, r#"{"message":"Not Found"}"#)]).await;
        let sink = GistSink::new(&server.base_url, "t", "missing", "watch-history.json");

        let err = sink.publish(&document()).await.unwrap_err();
        assert!(matches!(err, SourceError::Http { status: 404, .. }));
    }
}
