use serde::{Deserialize, Serialize};

use crate::{HumSearchError, Result};

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// A candidate song returned by the backend for one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    /// Backend-relative path of the audio used for previews.
    pub path: String,
    /// Similarity score in `[0, 100]`.
    pub similarity: f64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub artist: Option<String>,
    pub cover_image: Option<String>,
    pub theme_color: Option<String>,
    pub tempo: Option<f64>,
    pub pitch_count: Option<u32>,
}

impl MatchResult {
    pub fn display_title(&self) -> &str {
        non_blank(&self.title)
            .or_else(|| non_blank(&self.name))
            .unwrap_or(UNKNOWN_TITLE)
    }

    pub fn display_artist(&self) -> &str {
        non_blank(&self.artist).unwrap_or(UNKNOWN_ARTIST)
    }

    /// Similarity rounded to a whole percentage, e.g. `"91%"`.
    pub fn percentage_label(&self) -> String {
        format!("{}%", self.similarity.round() as i64)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|text| !text.trim().is_empty())
}

/// Wire shape of a match as the backend sends it. Every field is optional so
/// that validation can report precisely what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawMatch {
    id: Option<String>,
    path: Option<String>,
    similarity: Option<f64>,
    title: Option<String>,
    name: Option<String>,
    artist: Option<String>,
    cover_image: Option<String>,
    theme_color: Option<String>,
    tempo: Option<f64>,
    pitch_count: Option<u32>,
}

impl TryFrom<RawMatch> for MatchResult {
    type Error = HumSearchError;

    fn try_from(raw: RawMatch) -> Result<Self> {
        let path = raw
            .path
            .filter(|path| !path.is_empty())
            .ok_or_else(|| HumSearchError::Malformed("match without path".into()))?;
        // Older song databases store an empty id; the path is unique as well.
        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| path.clone());
        let similarity = raw.similarity.ok_or_else(|| {
            HumSearchError::Malformed(format!("match `{id}` without similarity"))
        })?;
        if !similarity.is_finite() || !(0.0..=100.0).contains(&similarity) {
            return Err(HumSearchError::Malformed(format!(
                "match `{id}` has similarity {similarity} outside [0, 100]"
            )));
        }

        Ok(Self {
            id,
            path,
            similarity,
            title: raw.title,
            name: raw.name,
            artist: raw.artist,
            cover_image: raw.cover_image,
            theme_color: raw.theme_color,
            tempo: raw.tempo,
            pitch_count: raw.pitch_count,
        })
    }
}
