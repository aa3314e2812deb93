use crate::{client::TrackSource, playback::PlaybackSink, MatchResult, Result};

/// Outcome of toggling a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewAction {
    Started(String),
    Paused(String),
    Resumed(String),
}

/// Plays short previews of candidate matches, one at a time.
#[derive(Debug)]
pub struct PreviewPlayer<S> {
    sink: S,
    /// Entry whose audio is loaded in the sink, if any.
    loaded: Option<String>,
    playing: bool,
}

impl<S: PlaybackSink> PreviewPlayer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            loaded: None,
            playing: false,
        }
    }

    /// Id of the audible preview.
    pub fn now_playing(&self) -> Option<&str> {
        self.loaded.as_deref().filter(|_| self.playing)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Clicking an entry: pauses it when it is playing, resumes it in place
    /// when it was paused, otherwise switches to it.
    pub async fn toggle<T: TrackSource>(
        &mut self,
        entry: &MatchResult,
        source: &T,
    ) -> Result<PreviewAction> {
        if self.loaded.as_deref() == Some(entry.id.as_str()) {
            if self.playing {
                self.sink.pause();
                self.playing = false;
                tracing::debug!(id = %entry.id, "preview paused");
                return Ok(PreviewAction::Paused(entry.id.clone()));
            }
            if !self.sink.is_finished() {
                self.sink.play()?;
                self.playing = true;
                tracing::debug!(id = %entry.id, "preview resumed");
                return Ok(PreviewAction::Resumed(entry.id.clone()));
            }
        }

        self.stop();
        let track = source.fetch_track(&entry.path).await?;
        self.sink.load(track)?;
        self.loaded = Some(entry.id.clone());
        self.sink.play()?;
        self.playing = true;
        tracing::info!(id = %entry.id, path = %entry.path, "preview started");
        Ok(PreviewAction::Started(entry.id.clone()))
    }

    /// Clears the playing marker once the preview has played to its end.
    /// Returns `true` when that happened during this call.
    pub fn poll(&mut self) -> bool {
        if self.playing && self.sink.is_finished() {
            self.playing = false;
            self.loaded = None;
            return true;
        }
        false
    }

    /// Silences and unloads whatever preview is active.
    pub fn stop(&mut self) {
        if self.loaded.take().is_some() {
            self.sink.stop();
        }
        self.playing = false;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        playback::{
            testing::{ramp, FakeSink},
            Track,
        },
        HumSearchError,
    };

    #[derive(Default)]
    struct Source {
        fetches: AtomicUsize,
    }

    impl TrackSource for Source {
        async fn fetch_track(&self, path: &str) -> Result<Track> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if path == "missing.mp3" {
                return Err(HumSearchError::Http { status: 404 });
            }
            Ok(ramp(100, 10))
        }
    }

    fn entry(id: &str) -> MatchResult {
        MatchResult {
            id: id.to_string(),
            path: format!("{id}.mp3"),
            similarity: 80.0,
            title: None,
            name: None,
            artist: None,
            cover_image: None,
            theme_color: None,
            tempo: None,
            pitch_count: None,
        }
    }

    #[tokio::test]
    async fn starting_another_preview_stops_the_first() {
        let source = Source::default();
        let mut player = PreviewPlayer::new(FakeSink::default());

        player.toggle(&entry("a"), &source).await.unwrap();
        assert_eq!(player.now_playing(), Some("a"));

        let action = player.toggle(&entry("b"), &source).await.unwrap();
        assert_eq!(action, PreviewAction::Started("b".into()));
        assert_eq!(player.now_playing(), Some("b"));
        assert!(player.sink().is_playing());
        assert_eq!(player.sink().loads, 2);
    }

    #[tokio::test]
    async fn toggling_twice_pauses_in_place() {
        let source = Source::default();
        let mut player = PreviewPlayer::new(FakeSink::default());

        player.toggle(&entry("a"), &source).await.unwrap();
        player.sink.advance(30);
        let action = player.toggle(&entry("a"), &source).await.unwrap();

        assert_eq!(action, PreviewAction::Paused("a".into()));
        assert_eq!(player.now_playing(), None);
        assert!(!player.sink().is_playing());
        assert_eq!(player.sink().position(), Duration::from_secs(3));

        let action = player.toggle(&entry("a"), &source).await.unwrap();
        assert_eq!(action, PreviewAction::Resumed("a".into()));
        assert_eq!(player.sink().position(), Duration::from_secs(3));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn natural_end_clears_the_marker() {
        let source = Source::default();
        let mut player = PreviewPlayer::new(FakeSink::default());

        player.toggle(&entry("a"), &source).await.unwrap();
        assert!(!player.poll());
        player.sink.advance(101);

        assert!(player.poll());
        assert_eq!(player.now_playing(), None);

        let action = player.toggle(&entry("a"), &source).await.unwrap();
        assert_eq!(action, PreviewAction::Started("a".into()));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_nothing_playing() {
        let source = Source::default();
        let mut player = PreviewPlayer::new(FakeSink::default());

        player.toggle(&entry("a"), &source).await.unwrap();
        let err = player.toggle(&entry("missing"), &source).await.unwrap_err();

        assert!(matches!(err, HumSearchError::Http { status: 404 }));
        assert_eq!(player.now_playing(), None);
        assert!(!player.sink().is_playing());
    }
}
