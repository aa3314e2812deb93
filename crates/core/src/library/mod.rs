use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{HumSearchError, Result};

const BUNDLED_SONGS: &str = include_str!("../../data/songs.json");

/// Display metadata for one song of the bundled library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Display duration, e.g. `"3:45"`.
    pub duration: String,
    pub release_date: String,
    pub theme_color: String,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub credits: String,
    #[serde(default)]
    pub bio: String,
    pub cover_image: Option<String>,
    pub artist_image: Option<String>,
    /// Backend path of the full track.
    pub audio: String,
    #[serde(default)]
    pub touring: Option<Vec<TourDate>>,
    #[serde(default)]
    pub social: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourDate {
    pub date: String,
    pub venue: String,
    pub city: String,
}

/// Read-only song collection, loaded once.
#[derive(Debug, Clone, Default)]
pub struct Library {
    songs: Vec<Song>,
}

impl Library {
    /// The collection compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_SONGS)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        let songs: Vec<Song> = serde_json::from_str(source)
            .map_err(|err| HumSearchError::msg(format!("invalid song library: {err}")))?;

        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = songs.iter().find(|song| !seen.insert(song.id.as_str())) {
            return Err(HumSearchError::msg(format!(
                "song id `{}` appears more than once",
                duplicate.id
            )));
        }

        Ok(Self { songs })
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn get(&self, id: &str) -> Option<&Song> {
        self.songs.iter().find(|song| song.id == id)
    }

    /// Case-insensitive substring match on title, artist and album.
    pub fn search(&self, query: &str) -> Vec<&Song> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.songs.iter().collect();
        }
        self.songs
            .iter()
            .filter(|song| {
                [&song.title, &song.artist, &song.album]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }
}
