use std::time::Duration;

use crate::{
    playback::{PlaybackSink, Track},
    HumSearchError, Result,
};

/// Full-track player for a song detail view. Independent of any recording
/// session.
#[derive(Debug)]
pub struct TrackPlayer<S: PlaybackSink> {
    sink: S,
    duration: Option<Duration>,
    reported_end: bool,
}

impl<S: PlaybackSink> TrackPlayer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            duration: None,
            reported_end: false,
        }
    }

    pub fn load(&mut self, track: Track) -> Result<()> {
        self.duration = Some(track.duration());
        self.reported_end = false;
        self.sink.load(track)
    }

    pub fn is_loaded(&self) -> bool {
        self.duration.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.sink.is_playing()
    }

    /// Play/pause button. Pausing keeps the position.
    pub fn toggle(&mut self) -> Result<bool> {
        if !self.is_loaded() {
            return Err(HumSearchError::InvalidInput("no track loaded"));
        }
        if self.sink.is_playing() {
            self.sink.pause();
        } else {
            self.sink.play()?;
            self.reported_end = false;
        }
        Ok(self.sink.is_playing())
    }

    /// Seeks to the fraction of the track given by a click at `offset` on a
    /// progress bar `width` units wide.
    pub fn seek_click(&mut self, offset: f64, width: f64) -> Result<Duration> {
        let duration = self
            .duration
            .ok_or(HumSearchError::InvalidInput("no track loaded"))?;
        if !(width > 0.0) {
            return Err(HumSearchError::InvalidInput("progress bar width must be positive"));
        }
        if !offset.is_finite() {
            return Err(HumSearchError::InvalidInput("click offset must be finite"));
        }
        let fraction = (offset / width).clamp(0.0, 1.0);
        let target = duration.mul_f64(fraction);
        self.sink.seek(target)?;
        self.reported_end = false;
        tracing::debug!(fraction, target_secs = target.as_secs_f64(), "seek");
        Ok(target)
    }

    pub fn elapsed(&self) -> Duration {
        self.sink.position()
    }

    /// Playback position as a fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        match self.duration {
            Some(duration) if !duration.is_zero() => {
                (self.elapsed().as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    /// `m:ss` of the position.
    pub fn elapsed_text(&self) -> String {
        format_clock(self.elapsed())
    }

    /// `-m:ss` until the end of the track.
    pub fn remaining_text(&self) -> String {
        let remaining = self
            .duration
            .unwrap_or_default()
            .saturating_sub(self.elapsed());
        format!("-{}", format_clock(remaining))
    }

    /// Reports whether playback just reached the end of the track. Fires
    /// once per natural end.
    pub fn poll(&mut self) -> bool {
        if self.reported_end || !self.sink.is_finished() {
            return false;
        }
        self.reported_end = true;
        true
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: PlaybackSink> Drop for TrackPlayer<S> {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// Formats a duration as `m:ss`, truncating partial seconds.
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::testing::{ramp, FakeSink};

    fn loaded() -> TrackPlayer<FakeSink> {
        let mut player = TrackPlayer::new(FakeSink::default());
        // 200 seconds at 10 Hz.
        player.load(ramp(2_000, 10)).unwrap();
        player
    }

    #[test]
    fn formats_clock_text() {
        assert_eq!(format_clock(Duration::from_secs(0)), "0:00");
        assert_eq!(format_clock(Duration::from_millis(65_900)), "1:05");
        assert_eq!(format_clock(Duration::from_secs(3_600)), "60:00");
    }

    #[test]
    fn toggle_pauses_in_place() {
        let mut player = loaded();
        assert!(player.toggle().unwrap());
        player.sink.advance(125);

        assert!(!player.toggle().unwrap());
        assert_eq!(player.elapsed_text(), "0:12");
        assert_eq!(player.remaining_text(), "-3:07");

        assert!(player.toggle().unwrap());
        assert_eq!(player.elapsed(), Duration::from_millis(12_500));
    }

    #[test]
    fn click_seeks_by_fraction() {
        let mut player = loaded();
        let target = player.seek_click(75.0, 300.0).unwrap();

        assert_eq!(target, Duration::from_secs(50));
        assert_eq!(player.elapsed_text(), "0:50");
        assert!((player.progress() - 0.25).abs() < 1e-9);

        let end = player.seek_click(400.0, 300.0).unwrap();
        assert_eq!(end, Duration::from_secs(200));
        assert_eq!(player.remaining_text(), "-0:00");
    }

    #[test]
    fn rejects_degenerate_clicks() {
        let mut player = loaded();
        assert!(player.seek_click(10.0, 0.0).is_err());
        assert!(matches!(
            player.seek_click(f64::NAN, 300.0),
            Err(HumSearchError::InvalidInput("click offset must be finite"))
        ));
        assert!(matches!(
            player.seek_click(10.0, -1.0),
            Err(HumSearchError::InvalidInput("progress bar width must be positive"))
        ));

        let mut empty = TrackPlayer::new(FakeSink::default());
        assert!(empty.seek_click(1.0, 2.0).is_err());
        assert!(empty.toggle().is_err());
    }

    #[test]
    fn reports_natural_end() {
        let mut player = TrackPlayer::new(FakeSink::default());
        player.load(ramp(5, 5)).unwrap();
        player.toggle().unwrap();
        player.sink.advance(6);

        assert!(player.poll());
        assert!(!player.is_playing());
        assert!(!player.poll());
        assert!(!player.poll());

        // Replaying re-arms the end report.
        player.toggle().unwrap();
        player.sink.advance(6);
        assert!(player.poll());
        assert!(!player.poll());
    }
}
