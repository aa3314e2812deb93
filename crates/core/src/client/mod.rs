//! HTTP client for the matching backend.
//!
//! Every failure, whether transport, HTTP status or an unusable payload, is
//! reported as a [`HumSearchError`]; the session controller collapses them into
//! a single error status.

use std::{future::Future, path::Path};

use reqwest::{multipart, StatusCode, Url};
use serde::Deserialize;

use crate::{
    config::BackendConfig,
    matches::{MatchResult, RawMatch},
    playback::{self, Track},
    AudioClip, HumSearchError, Result,
};

const USER_AGENT: &str = concat!("hum-search/", env!("CARGO_PKG_VERSION"));
const UPLOAD_FIELD: &str = "file";

/// Anything able to turn a clip into a ranked list of candidates.
pub trait Identifier {
    fn identify(&self, clip: &AudioClip) -> impl Future<Output = Result<Vec<MatchResult>>>;
}

/// Anything able to fetch decoded audio for a backend song path.
pub trait TrackSource {
    fn fetch_track(&self, path: &str) -> impl Future<Output = Result<Track>>;
}

/// Backend health probe payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
}

/// Entry of the backend's song catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogSong {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    pub path: String,
    pub tempo: Option<f64>,
    #[serde(default)]
    pub pitch_count: u32,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    songs: Vec<CatalogSong>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    matches: Option<Vec<RawMatch>>,
}

/// Validates a `/record` response.
///
/// A response is accepted only when the status is 2xx, the body is valid
/// JSON of the expected shape, `success` is true, every match is well formed
/// and at least one match is present. Ranking order is preserved.
pub fn parse_search_response(status: StatusCode, body: &[u8]) -> Result<Vec<MatchResult>> {
    if !status.is_success() {
        return Err(HumSearchError::Http {
            status: status.as_u16(),
        });
    }

    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|err| HumSearchError::Malformed(err.to_string()))?;

    if !response.success {
        return Err(HumSearchError::Backend(
            response
                .error
                .unwrap_or_else(|| "unspecified error".to_string()),
        ));
    }

    let matches = response
        .matches
        .unwrap_or_default()
        .into_iter()
        .map(MatchResult::try_from)
        .collect::<Result<Vec<_>>>()?;

    if matches.is_empty() {
        return Err(HumSearchError::NoMatch);
    }
    Ok(matches)
}

/// Client for the query-by-humming backend.
#[derive(Debug, Clone)]
pub struct IdentifyClient {
    http: reqwest::Client,
    base: Url,
}

impl IdentifyClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut base = Url::parse(config.base_url.trim())
            .map_err(|err| HumSearchError::Config(format!("invalid backend url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(HumSearchError::Config(format!(
                "backend url `{base}` cannot be used as a base"
            )));
        }
        // Joining is relative to the last segment unless the path ends in `/`.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|err| HumSearchError::Transport(err.to_string()))?;

        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| HumSearchError::Config(format!("invalid endpoint `{path}`: {err}")))
    }

    /// URL streaming the audio behind a match's `path`. The path is encoded as
    /// a single segment, slashes included.
    pub fn preview_url(&self, song_path: &str) -> Result<Url> {
        let mut url = self.endpoint("play_song/")?;
        url.path_segments_mut()
            .map_err(|_| HumSearchError::Config("backend url cannot take path segments".into()))?
            .pop_if_empty()
            .push(song_path);
        Ok(url)
    }

    /// Uploads a clip to `/record` and returns the validated matches.
    pub async fn identify(&self, clip: &AudioClip) -> Result<Vec<MatchResult>> {
        let url = self.endpoint("record")?;
        let part = multipart::Part::bytes(clip.bytes().to_vec())
            .file_name(clip.upload_name().to_string())
            .mime_str(clip.mime_type())?;
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);

        tracing::info!(
            %url,
            filename = clip.upload_name(),
            bytes = clip.len(),
            "submitting clip for identification"
        );

        let response = self.http.post(url).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        let matches = parse_search_response(status, &body)?;

        tracing::info!(
            matches = matches.len(),
            top = ?matches.first().map(|m| m.similarity),
            "identification succeeded"
        );
        Ok(matches)
    }

    /// Downloads the preview audio for `song_path`.
    pub async fn fetch_preview(&self, song_path: &str) -> Result<Vec<u8>> {
        let url = self.preview_url(song_path)?;
        tracing::debug!(%url, "fetching preview");
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn health(&self) -> Result<Health> {
        let url = self.endpoint("health")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Songs indexed by the backend.
    pub async fn catalog(&self) -> Result<Vec<CatalogSong>> {
        let url = self.endpoint("get_songs")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        let catalog: CatalogResponse = response.json().await?;
        Ok(catalog.songs)
    }
}

impl Identifier for IdentifyClient {
    async fn identify(&self, clip: &AudioClip) -> Result<Vec<MatchResult>> {
        IdentifyClient::identify(self, clip).await
    }
}

impl TrackSource for IdentifyClient {
    async fn fetch_track(&self, path: &str) -> Result<Track> {
        let bytes = self.fetch_preview(path).await?;
        let extension = Path::new(path)
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        playback::decode(bytes, extension.as_deref())
    }
}
