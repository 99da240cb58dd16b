use async_trait::async_trait;
use feed_sync_models::{AudioFeatures, DiffOp, LikedPage, PlaylistContents, PlaylistSummary, TrackMetadata};
use futures::future::try_join_all;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{check_response, SourceError};
use crate::traits::PlaylistStore;

const PLAYLIST_PAGE_SIZE: u32 = 50;
const TRACK_BATCH: usize = 50;
const AUDIO_FEATURE_BATCH: usize = 100;
const TRACK_URI_PREFIX: &str = "spotify:track:";

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    total: u32,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksRef {
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct PlaylistDto {
    id: String,
    name: String,
    tracks: Option<PlaylistTracksRef>,
}

#[derive(Debug, Deserialize)]
struct ItemRef {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct ContentsDto {
    #[serde(default)]
    items: Vec<ItemRef>,
}

#[derive(Debug, Deserialize)]
struct PlaylistV2 {
    revision: String,
    contents: ContentsDto,
}

#[derive(Debug, Serialize)]
struct ItemUri {
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
enum DeltaOp {
    #[serde(rename = "ADD")]
    Add { add: AddOp },
    #[serde(rename = "REM")]
    Rem { rem: RemOp },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOp {
    items: Vec<ItemUri>,
    add_first: bool,
}

#[derive(Debug, Serialize)]
struct RemOp {
    items: Vec<ItemUri>,
}

#[derive(Debug, Serialize)]
struct Delta {
    ops: Vec<DeltaOp>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangesRequest {
    base_revision: String,
    deltas: Vec<Delta>,
}

#[derive(Debug, Deserialize)]
struct TrackRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SavedTrack {
    track: Option<TrackRef>,
}

#[derive(Debug, Deserialize)]
struct ArtistDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackDto {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistDto>,
    #[serde(default)]
    duration_ms: u64,
    preview_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TracksResponse {
    tracks: Vec<Option<TrackDto>>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesDto {
    id: String,
    #[serde(default)]
    tempo: f32,
    #[serde(default)]
    energy: f32,
    #[serde(default)]
    danceability: f32,
    #[serde(default)]
    valence: f32,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeaturesDto>>,
}

fn track_id_from_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix(TRACK_URI_PREFIX).filter(|id| !id.is_empty())
}

fn playlist_contents(dto: PlaylistV2) -> PlaylistContents {
    PlaylistContents {
        revision: dto.revision,
        track_ids: dto
            .contents
            .items
            .iter()
            .filter_map(|item| track_id_from_uri(&item.uri))
            .map(str::to_string)
            .collect(),
    }
}

fn changes_request(revision: &str, ops: &[DiffOp]) -> ChangesRequest {
    let uri = |track_id: &str| ItemUri {
        uri: format!("{}{}", TRACK_URI_PREFIX, track_id),
    };
    let ops = ops
        .iter()
        .map(|op| match op {
            DiffOp::Insert { track_id } => DeltaOp::Add {
                add: AddOp {
                    items: vec![uri(track_id)],
                    add_first: false,
                },
            },
            DiffOp::Delete { track_id } => DeltaOp::Rem {
                rem: RemOp {
                    items: vec![uri(track_id)],
                },
            },
        })
        .collect();
    ChangesRequest {
        base_revision: revision.to_string(),
        deltas: vec![Delta { ops }],
    }
}

/// The next offset advances by the items the server returned, including
/// entries dropped for a missing track or id
fn liked_page(page: Page<SavedTrack>, offset: u32) -> LikedPage {
    let returned = page.items.len() as u32;
    let track_ids: Vec<String> = page
        .items
        .into_iter()
        .filter_map(|saved| saved.track.and_then(|t| t.id))
        .collect();
    let next_offset = page.next.as_ref().map(|_| offset + returned);
    LikedPage {
        track_ids,
        offset,
        total: page.total,
        next_offset,
    }
}

fn track_metadata(dto: TrackDto) -> Option<TrackMetadata> {
    Some(TrackMetadata {
        id: dto.id?,
        name: dto.name,
        artists: dto.artists.into_iter().map(|a| a.name).collect(),
        duration_ms: dto.duration_ms,
        preview_url: dto.preview_url,
    })
}

/// Music library client that talks to the provider through a same-origin relay
pub struct RelayPlaylistClient {
    client: Client,
    relay_url: String,
    access_token: String,
}

impl RelayPlaylistClient {
    pub fn new(relay_url: &str, access_token: &str) -> Self {
        Self {
            client: Client::new(),
            relay_url: relay_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.relay_url, path))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, context: &str) -> Result<T, SourceError> {
        let response = self.request(Method::GET, path).send().await?;
        let response = check_response(response, context).await?;
        Ok(response.json().await?)
    }

    fn ids_param(ids: &[String]) -> String {
        urlencoding::encode(&ids.join(",")).into_owned()
    }
}

#[async_trait]
impl PlaylistStore for RelayPlaylistClient {
    async fn current_user(&self) -> Result<String, SourceError> {
        let user: CurrentUser = self.get_json("v1/me", "Current user").await?;
        Ok(user.id)
    }

    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, SourceError> {
        let mut playlists = Vec::new();
        let mut offset = 0;
        loop {
            let page: Page<PlaylistDto> = self
                .get_json(
                    &format!("v1/me/playlists?limit={}&offset={}", PLAYLIST_PAGE_SIZE, offset),
                    "Playlist listing",
                )
                .await?;
            let fetched = page.items.len() as u32;
            playlists.extend(page.items.into_iter().map(|p| PlaylistSummary {
                id: p.id,
                title: p.name,
                track_count: p.tracks.map(|t| t.total).unwrap_or(0),
            }));
            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }
        debug!(count = playlists.len(), "Listed playlists");
        Ok(playlists)
    }

    async fn playlist_contents(&self, playlist_id: &str) -> Result<PlaylistContents, SourceError> {
        let dto: PlaylistV2 = self
            .get_json(&format!("playlist/v2/playlist/{}", playlist_id), "Playlist contents")
            .await?;
        Ok(playlist_contents(dto))
    }

    async fn submit_diff(&self, playlist_id: &str, revision: &str, ops: &[DiffOp]) -> Result<(), SourceError> {
        let response = self
            .request(Method::POST, &format!("playlist/v2/playlist/{}/changes", playlist_id))
            .json(&changes_request(revision, ops))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(SourceError::RevisionConflict {
                playlist_id: playlist_id.to_string(),
            });
        }
        check_response(response, "Playlist changes").await?;
        Ok(())
    }

    async fn liked_page(&self, offset: u32, limit: u32) -> Result<LikedPage, SourceError> {
        let page: Page<SavedTrack> = self
            .get_json(&format!("v1/me/tracks?limit={}&offset={}", limit, offset), "Liked tracks")
            .await?;
        Ok(liked_page(page, offset))
    }

    async fn remove_liked(&self, track_id: &str) -> Result<(), SourceError> {
        let response = self
            .request(Method::DELETE, &format!("v1/me/tracks?ids={}", urlencoding::encode(track_id)))
            .send()
            .await?;
        check_response(response, "Remove liked track").await?;
        Ok(())
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<TrackMetadata>, SourceError> {
        let batches = ids.chunks(TRACK_BATCH).map(|chunk| async move {
            let response: TracksResponse = self
                .get_json(&format!("v1/tracks?ids={}", Self::ids_param(chunk)), "Track metadata")
                .await?;
            Ok::<_, SourceError>(response.tracks)
        });
        let results = try_join_all(batches).await?;
        Ok(results
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(track_metadata)
            .collect())
    }

    async fn audio_features(&self, ids: &[String]) -> Result<Vec<AudioFeatures>, SourceError> {
        let batches = ids.chunks(AUDIO_FEATURE_BATCH).map(|chunk| async move {
            let response: AudioFeaturesResponse = self
                .get_json(&format!("v1/audio-features?ids={}", Self::ids_param(chunk)), "Audio features")
                .await?;
            Ok::<_, SourceError>(response.audio_features)
        });
        let results = try_join_all(batches).await?;
        Ok(results
            .into_iter()
            .flatten()
            .flatten()
            .map(|f| AudioFeatures {
                id: f.id,
                tempo: f.tempo,
                energy: f.energy,
                danceability: f.danceability,
                valence: f.valence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    #[test]
    fn test_playlist_contents_keeps_only_track_uris() {
        let dto: PlaylistV2 = serde_json::from_str(
            r#"{"revision":"AAAB","contents":{"items":[
                {"uri":"spotify:track:one"},
                {"uri":"spotify:episode:pod"},
                {"uri":"spotify:track:two"}
            ]}}"#,
        )
        .unwrap();
        let contents = playlist_contents(dto);
        assert_eq!(contents.revision, "AAAB");
        assert_eq!(contents.track_ids, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_changes_request_shape() {
        let request = changes_request(
            "rev-7",
            &[
                DiffOp::Insert { track_id: "a".to_string() },
                DiffOp::Delete { track_id: "b".to_string() },
            ],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["baseRevision"], "rev-7");
        let ops = &value["deltas"][0]["ops"];
        assert_eq!(ops[0]["kind"], "ADD");
        assert_eq!(ops[0]["add"]["items"][0]["uri"], "spotify:track:a");
        assert_eq!(ops[0]["add"]["addFirst"], false);
        assert_eq!(ops[1]["kind"], "REM");
        assert_eq!(ops[1]["rem"]["items"][0]["uri"], "spotify:track:b");
    }

    #[test]
    fn test_liked_page_offsets() {
        let page: Page<SavedTrack> = serde_json::from_str(
            r#"{"items":[{"track":{"id":"t1"}},{"track":null},{"track":{"id":"t2"}}],"total":40,"next":"https://x/next"}"#,
        )
        .unwrap();
        let liked = liked_page(page, 20);
        assert_eq!(liked.track_ids, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(liked.next_offset, Some(23));
        assert_eq!(liked.total, 40);

        let last: Page<SavedTrack> =
            serde_json::from_str(r#"{"items":[{"track":{"id":"t9"}}],"total":40,"next":null}"#).unwrap();
        assert_eq!(liked_page(last, 39).next_offset, None);
    }

    #[tokio::test]
    async fn test_conflict_status_maps_to_revision_conflict() {
        let server = StubServer::start(vec![(409, r#"{"error":"stale revision"}"#)]).await;
        let client = RelayPlaylistClient::new(&server.base_url, "token");

        let err = client
            .submit_diff("p1", "old", &[DiffOp::Insert { track_id: "t".to_string() }])
            .await
            .unwrap_err();
        assert!(err.is_revision_conflict());
        assert_eq!(server.requests()[0].path, "/playlist/v2/playlist/p1/changes");
    }

    #[tokio::test]
    async fn test_list_playlists_follows_pagination() {
        let server = StubServer::start(vec![
            (200, r#"{"items":[{"id":"p1","name":"Focus","tracks":{"total":3}}],"total":2,"next":"more"}"#),
            (200, r#"{"items":[{"id":"p2","name":"Run","tracks":null}],"total":2,"next":null}"#),
        ])
        .await;
        let client = RelayPlaylistClient::new(&server.base_url, "token");

        let playlists = client.list_playlists().await.unwrap();
        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[0].track_count, 3);
        assert_eq!(playlists[1].track_count, 0);
        let requests = server.requests();
        assert_eq!(requests[1].path, "/v1/me/playlists?limit=50&offset=1");
        assert_eq!(requests[0].header("authorization"), Some("Bearer token"));
    }

    #[tokio::test]
    async fn test_liked_pages_skip_past_null_entries() {
        let server = StubServer::start(vec![
            (200, r#"{"items":[{"track":{"id":"t1"}},{"track":null}],"total":4,"next":"more"}"#),
            (200, r#"{"items":[{"track":null},{"track":{"id":"t2"}}],"total":4,"next":null}"#),
        ])
        .await;
        let client = RelayPlaylistClient::new(&server.base_url, "token");

        let first = client.liked_page(0, 2).await.unwrap();
        assert_eq!(first.track_ids, vec!["t1".to_string()]);
        assert_eq!(first.next_offset, Some(2));

        let second = client.liked_page(2, 2).await.unwrap();
        assert_eq!(second.track_ids, vec!["t2".to_string()]);
        assert_eq!(second.next_offset, None);
        assert_eq!(server.requests()[1].path, "/v1/me/tracks?limit=2&offset=2");
    }

    #[tokio::test]
    async fn test_audio_features_skip_null_entries() {
        let server = StubServer::start(vec![(
            200,
            r#"{"audio_features":[{"id":"a","tempo":120.5,"energy":0.8,"danceability":0.6,"valence":0.3},null]}"#,
        )])
        .await;
        let client = RelayPlaylistClient::new(&server.base_url, "token");

        let features = client
            .audio_features(&["a".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].tempo, 120.5);
        assert_eq!(server.requests()[0].path, "/v1/audio-features?ids=a%2Cgone");
    }
}
