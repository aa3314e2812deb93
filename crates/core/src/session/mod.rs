//! Recording session state machine.
//!
//! ```text
//! idle ──record──▶ listening ──stop / auto-stop──▶ preview ──identify──▶ processing
//!   │                                                ▲                     │
//!   └──────────────────────── load file ─────────────┘          results ◀──┴──▶ error
//! ```
//!
//! Every state can be reset back to `idle`. The capture stream and the
//! visualizer exist only while `listening`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    capture::{CaptureDevice, CaptureStream},
    client::Identifier,
    config::{PresentationMode, SessionConfig, VisualizerConfig},
    error::ErrorClass,
    visualizer::Visualizer,
    AudioClip, HumSearchError, MatchResult, Result,
};

/// Stage of the recording and identification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Listening,
    Preview,
    Processing,
    Results,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Preview => "preview",
            Self::Processing => "processing",
            Self::Results => "results",
            Self::Error => "error",
        }
    }

    /// User-facing status line. Failures share one generic message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Idle => "Tap record and hum a tune",
            Self::Listening => "Listening...",
            Self::Preview => "Got it. Identify, or reset to try again",
            Self::Processing => "Searching for matches...",
            Self::Results => "Top matches",
            Self::Error => "Couldn't identify that tune. Please try again",
        }
    }

    pub fn controls(&self) -> Controls {
        let idle = *self == Self::Idle;
        Controls {
            record: idle,
            upload: idle,
            stop: *self == Self::Listening,
            identify: *self == Self::Preview,
            reset: !idle,
            previews: *self == Self::Results,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which user controls are enabled. Derived from [`Status`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls {
    pub record: bool,
    pub upload: bool,
    pub stop: bool,
    pub identify: bool,
    pub reset: bool,
    pub previews: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub presentation: PresentationMode,
    pub max_results: usize,
    pub auto_stop: Duration,
}

impl SessionOptions {
    pub fn new(presentation: PresentationMode) -> Self {
        Self {
            presentation,
            max_results: presentation.default_max_results(),
            auto_stop: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            presentation: config.presentation,
            max_results: config
                .max_results
                .unwrap_or_else(|| config.presentation.default_max_results()),
            auto_stop: Duration::from_secs(config.auto_stop_secs),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new(PresentationMode::FullPage)
    }
}

/// Identifies one identification request. Results carrying an outdated epoch
/// are dropped, so a reset session never sees a late response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEpoch(u64);

/// Handed out when a request starts; carries what the request needs.
#[derive(Debug, Clone)]
pub struct IdentifyTicket {
    pub epoch: SessionEpoch,
    pub clip: AudioClip,
}

struct Listening<S> {
    stream: S,
    visualizer: Visualizer,
    deadline: Instant,
    captured: Vec<f32>,
}

impl<S: CaptureStream> Listening<S> {
    fn collect(&mut self) -> Result<Vec<f32>> {
        let fresh = self.stream.drain()?;
        self.captured.extend_from_slice(&fresh);
        Ok(fresh)
    }
}

/// Owns one recording session: status, capture, visualizer, clip and matches.
pub struct SessionController<D: CaptureDevice> {
    device: D,
    options: SessionOptions,
    visualizer: VisualizerConfig,
    status: Status,
    listening: Option<Listening<D::Stream>>,
    clip: Option<AudioClip>,
    amplitudes: Vec<f32>,
    matches: Vec<MatchResult>,
    epoch: u64,
    last_error: Option<ErrorClass>,
}

impl<D: CaptureDevice> SessionController<D> {
    pub fn new(device: D, options: SessionOptions, visualizer: VisualizerConfig) -> Result<Self> {
        visualizer.validate()?;
        if options.max_results == 0 {
            return Err(HumSearchError::Config("max_results must be at least 1".into()));
        }

        Ok(Self {
            device,
            options,
            visualizer,
            status: Status::Idle,
            listening: None,
            clip: None,
            amplitudes: Vec::new(),
            matches: Vec::new(),
            epoch: 0,
            last_error: None,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn clip(&self) -> Option<&AudioClip> {
        self.clip.as_ref()
    }

    /// Current bar heights; empty unless listening.
    pub fn amplitudes(&self) -> &[f32] {
        &self.amplitudes
    }

    pub fn matches(&self) -> &[MatchResult] {
        &self.matches
    }

    pub fn last_error(&self) -> Option<ErrorClass> {
        self.last_error
    }

    /// Time left before the automatic stop, while listening.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.listening
            .as_ref()
            .map(|listening| listening.deadline.saturating_duration_since(now))
    }

    /// Opens the microphone and starts listening.
    pub fn start_listening(&mut self, now: Instant) -> Result<()> {
        self.expect(Status::Idle, "start listening")?;

        let visualizer = Visualizer::new(self.visualizer.clone())?;
        let stream = match self.device.open() {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };

        tracing::info!(
            sample_rate = stream.sample_rate(),
            auto_stop_secs = self.options.auto_stop.as_secs_f32(),
            "listening"
        );
        self.amplitudes = vec![self.visualizer.min_height; visualizer.band_count()];
        self.listening = Some(Listening {
            stream,
            visualizer,
            deadline: now + self.options.auto_stop,
            captured: Vec::new(),
        });
        self.status = Status::Listening;
        Ok(())
    }

    /// Accepts a user-selected file in place of a recording.
    pub fn load_clip(&mut self, clip: AudioClip) -> Result<()> {
        self.expect(Status::Idle, "load a clip")?;
        if clip.is_empty() {
            return Err(HumSearchError::InvalidInput("audio clip is empty"));
        }
        tracing::info!(filename = clip.upload_name(), bytes = clip.len(), "clip loaded");
        self.clip = Some(clip);
        self.status = Status::Preview;
        Ok(())
    }

    /// Frame-cadence driver: pulls captured audio, refreshes the bars and
    /// performs the automatic stop once the deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let Some(listening) = self.listening.as_mut() else {
            return Ok(());
        };

        let fresh = match listening.collect() {
            Ok(fresh) => fresh,
            Err(err) => {
                self.fail(&err);
                return Err(err);
            }
        };
        match listening.visualizer.process(&fresh) {
            Ok(heights) => self.amplitudes = heights,
            Err(err) => tracing::debug!(%err, "visualizer frame skipped"),
        }

        if now >= listening.deadline {
            tracing::info!("listening time limit reached");
            self.stop_listening()?;
        }
        Ok(())
    }

    /// Ends capture and keeps the recording for identification.
    pub fn stop_listening(&mut self) -> Result<()> {
        let Some(mut listening) = self.listening.take() else {
            return Err(self.invalid("stop listening"));
        };

        let drained = listening.collect();
        let sample_rate = listening.stream.sample_rate();
        let Listening {
            stream, captured, ..
        } = listening;
        stream.stop();
        self.amplitudes.clear();

        let clip = drained.and_then(|_| AudioClip::from_samples(&captured, sample_rate));
        match clip {
            Ok(clip) => {
                tracing::info!(
                    samples = captured.len(),
                    sample_rate,
                    bytes = clip.len(),
                    "recording finished"
                );
                self.clip = Some(clip);
                self.status = Status::Preview;
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Moves to `processing` and returns what the identify request needs.
    pub fn begin_identify(&mut self) -> Result<IdentifyTicket> {
        self.expect(Status::Preview, "identify")?;
        let clip = self
            .clip
            .clone()
            .ok_or(HumSearchError::InvalidInput("no clip to identify"))?;

        self.matches.clear();
        self.status = Status::Processing;
        Ok(IdentifyTicket {
            epoch: SessionEpoch(self.epoch),
            clip,
        })
    }

    /// Applies the outcome of an identify request. Returns `false` when the
    /// result belongs to a session that has since been reset.
    pub fn finish_identify(
        &mut self,
        epoch: SessionEpoch,
        outcome: Result<Vec<MatchResult>>,
    ) -> bool {
        if epoch.0 != self.epoch || self.status != Status::Processing {
            tracing::debug!(
                status = %self.status,
                "discarding identification result for a finished session"
            );
            return false;
        }

        match outcome {
            Ok(mut matches) if !matches.is_empty() => {
                matches.truncate(self.options.max_results);
                tracing::info!(shown = matches.len(), "showing matches");
                self.matches = matches;
                self.last_error = None;
                self.status = Status::Results;
            }
            Ok(_) => self.fail(&HumSearchError::NoMatch),
            Err(err) => self.fail(&err),
        }
        true
    }

    /// Sends the current clip and waits for the outcome.
    pub async fn identify<I: Identifier>(&mut self, identifier: &I) -> Result<Status> {
        let ticket = self.begin_identify()?;
        let outcome = identifier.identify(&ticket.clip).await;
        self.finish_identify(ticket.epoch, outcome);
        Ok(self.status)
    }

    /// Returns to `idle` from any state, releasing the microphone and
    /// dropping the clip and matches.
    pub fn reset(&mut self) {
        self.release_capture();
        self.clip = None;
        self.amplitudes.clear();
        self.matches.clear();
        self.last_error = None;
        self.epoch += 1;
        if self.status != Status::Idle {
            tracing::debug!(from = %self.status, "session reset");
        }
        self.status = Status::Idle;
    }

    fn release_capture(&mut self) {
        if let Some(listening) = self.listening.take() {
            listening.stream.stop();
        }
    }

    fn fail(&mut self, err: &HumSearchError) {
        let class = err.class();
        match class {
            ErrorClass::Backend => tracing::info!(%err, "identification failed"),
            _ => tracing::warn!(%err, ?class, "session failed"),
        }
        self.release_capture();
        self.amplitudes.clear();
        self.matches.clear();
        self.last_error = Some(class);
        self.status = Status::Error;
    }

    fn expect(&self, status: Status, action: &'static str) -> Result<()> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> HumSearchError {
        HumSearchError::InvalidTransition {
            from: self.status.as_str(),
            action,
        }
    }
}

impl<D: CaptureDevice> Drop for SessionController<D> {
    fn drop(&mut self) {
        self.release_capture();
    }
}

impl<D: CaptureDevice> std::fmt::Debug for SessionController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("status", &self.status)
            .field("options", &self.options)
            .field("clip", &self.clip.as_ref().map(AudioClip::len))
            .field("matches", &self.matches.len())
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Probe {
        opens: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        live: Arc<AtomicBool>,
    }

    struct FakeMic {
        probe: Probe,
        deny: bool,
    }

    struct FakeStream {
        probe: Probe,
        pending: Vec<f32>,
    }

    impl CaptureDevice for FakeMic {
        type Stream = FakeStream;

        fn open(&mut self) -> Result<FakeStream> {
            if self.deny {
                return Err(HumSearchError::Permission("user refused".into()));
            }
            self.probe.opens.fetch_add(1, Ordering::SeqCst);
            self.probe.live.store(true, Ordering::SeqCst);
            Ok(FakeStream {
                probe: self.probe.clone(),
                pending: vec![0.1; 1_600],
            })
        }
    }

    impl CaptureStream for FakeStream {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn drain(&mut self) -> Result<Vec<f32>> {
            Ok(std::mem::take(&mut self.pending))
        }

        fn stop(self) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
            self.probe.live.store(false, Ordering::SeqCst);
        }
    }

    struct Canned(fn() -> Result<Vec<MatchResult>>);

    impl Identifier for Canned {
        async fn identify(&self, _clip: &AudioClip) -> Result<Vec<MatchResult>> {
            (self.0)()
        }
    }

    fn candidate(id: &str, similarity: f64) -> MatchResult {
        MatchResult {
            id: id.to_string(),
            path: format!("{id}.mp3"),
            similarity,
            title: None,
            name: None,
            artist: None,
            cover_image: None,
            theme_color: None,
            tempo: None,
            pitch_count: None,
        }
    }

    fn seven() -> Result<Vec<MatchResult>> {
        Ok((0..7)
            .map(|i| candidate(&format!("m{i}"), 90.0 - i as f64))
            .collect())
    }

    fn controller(presentation: PresentationMode) -> (SessionController<FakeMic>, Probe) {
        let probe = Probe::default();
        let mic = FakeMic {
            probe: probe.clone(),
            deny: false,
        };
        let controller = SessionController::new(
            mic,
            SessionOptions::new(presentation),
            VisualizerConfig::default(),
        )
        .unwrap();
        (controller, probe)
    }

    fn in_preview(session: &mut SessionController<FakeMic>) {
        session
            .load_clip(AudioClip::new(vec![1, 2, 3], None))
            .unwrap();
    }

    fn assert_clean_idle(session: &SessionController<FakeMic>) {
        assert_eq!(session.status(), Status::Idle);
        assert!(session.clip().is_none());
        assert!(session.matches().is_empty());
        assert!(session.amplitudes().is_empty());
    }

    #[test]
    fn records_and_stops_into_preview() {
        let (mut session, probe) = controller(PresentationMode::FullPage);
        let start = Instant::now();

        session.start_listening(start).unwrap();
        assert_eq!(session.status(), Status::Listening);
        assert_eq!(session.amplitudes().len(), 20);

        session.tick(start + Duration::from_millis(16)).unwrap();
        assert_eq!(session.amplitudes().len(), 20);

        session.stop_listening().unwrap();
        assert_eq!(session.status(), Status::Preview);
        assert_eq!(session.clip().unwrap().upload_name(), "recording.wav");
        assert!(session.amplitudes().is_empty());
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert!(!probe.live.load(Ordering::SeqCst));
    }

    #[test]
    fn auto_stop_fires_exactly_once() {
        let (mut session, probe) = controller(PresentationMode::FullPage);
        let start = Instant::now();
        session.start_listening(start).unwrap();

        session.tick(start + Duration::from_secs(9)).unwrap();
        assert_eq!(session.status(), Status::Listening);

        session.tick(start + Duration::from_secs(10)).unwrap();
        assert_eq!(session.status(), Status::Preview);

        session.tick(start + Duration::from_secs(11)).unwrap();
        session.tick(start + Duration::from_secs(20)).unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), Status::Preview);
    }

    #[test]
    fn manual_stop_disarms_the_timer() {
        let (mut session, probe) = controller(PresentationMode::FullPage);
        let start = Instant::now();
        session.start_listening(start).unwrap();
        session.stop_listening().unwrap();

        session.tick(start + Duration::from_secs(30)).unwrap();
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

        let err = session.stop_listening().unwrap_err();
        assert!(matches!(err, HumSearchError::InvalidTransition { .. }));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), Status::Preview);
    }

    #[test]
    fn denied_microphone_ends_in_error() {
        let mut session = SessionController::new(
            FakeMic {
                probe: Probe::default(),
                deny: true,
            },
            SessionOptions::default(),
            VisualizerConfig::default(),
        )
        .unwrap();

        let err = session.start_listening(Instant::now()).unwrap_err();
        assert!(matches!(err, HumSearchError::Permission(_)));
        assert_eq!(session.status(), Status::Error);
        assert_eq!(session.last_error(), Some(ErrorClass::Device));
        assert!(session.status().controls().reset);
    }

    #[test]
    fn reset_releases_the_microphone() {
        let (mut session, probe) = controller(PresentationMode::FullPage);
        session.start_listening(Instant::now()).unwrap();
        assert!(probe.live.load(Ordering::SeqCst));

        session.reset();
        assert_clean_idle(&session);
        assert!(!probe.live.load(Ordering::SeqCst));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_session_releases_the_microphone() {
        let (mut session, probe) = controller(PresentationMode::Modal);
        session.start_listening(Instant::now()).unwrap();
        drop(session);

        assert!(!probe.live.load(Ordering::SeqCst));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_page_keeps_five_in_order() {
        let (mut session, _) = controller(PresentationMode::FullPage);
        in_preview(&mut session);

        let status = session.identify(&Canned(seven)).await.unwrap();
        assert_eq!(status, Status::Results);
        let ids: Vec<_> = session.matches().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn modal_keeps_three() {
        let (mut session, _) = controller(PresentationMode::Modal);
        in_preview(&mut session);

        session.identify(&Canned(seven)).await.unwrap();
        assert_eq!(session.matches().len(), 3);
        assert_eq!(session.matches()[2].id, "m2");
    }

    #[tokio::test]
    async fn short_lists_are_kept_whole() {
        let (mut session, _) = controller(PresentationMode::FullPage);
        in_preview(&mut session);

        session
            .identify(&Canned(|| Ok(vec![candidate("a", 91.4), candidate("b", 40.0)])))
            .await
            .unwrap();
        assert_eq!(session.matches().len(), 2);
        assert_eq!(session.matches()[0].percentage_label(), "91%");
    }

    #[tokio::test]
    async fn backend_failures_never_reach_results() {
        let cases: [fn() -> Result<Vec<MatchResult>>; 3] = [
            || Err(HumSearchError::Backend("No songs in database.".into())),
            || Ok(Vec::new()),
            || Err(HumSearchError::Transport("connection refused".into())),
        ];

        for case in cases {
            let (mut session, _) = controller(PresentationMode::FullPage);
            in_preview(&mut session);
            let status = session.identify(&Canned(case)).await.unwrap();
            assert_eq!(status, Status::Error);
            assert!(session.matches().is_empty());
        }
    }

    #[test]
    fn late_results_after_reset_are_ignored() {
        let (mut session, _) = controller(PresentationMode::FullPage);
        in_preview(&mut session);
        let ticket = session.begin_identify().unwrap();
        assert_eq!(session.status(), Status::Processing);

        session.reset();
        let applied = session.finish_identify(ticket.epoch, seven());
        assert!(!applied);
        assert_clean_idle(&session);

        in_preview(&mut session);
        let fresh = session.begin_identify().unwrap();
        assert_ne!(fresh.epoch, ticket.epoch);
        assert!(!session.finish_identify(ticket.epoch, seven()));
        assert!(session.finish_identify(fresh.epoch, seven()));
        assert_eq!(session.status(), Status::Results);
    }

    #[tokio::test]
    async fn every_return_to_idle_is_clean() {
        let (mut session, _) = controller(PresentationMode::FullPage);

        in_preview(&mut session);
        session.reset();
        assert_clean_idle(&session);

        in_preview(&mut session);
        session.identify(&Canned(seven)).await.unwrap();
        session.reset();
        assert_clean_idle(&session);

        in_preview(&mut session);
        session.identify(&Canned(|| Ok(Vec::new()))).await.unwrap();
        session.reset();
        assert_clean_idle(&session);
    }

    #[test]
    fn controls_follow_status() {
        assert!(Status::Idle.controls().record);
        assert!(!Status::Idle.controls().reset);
        assert!(Status::Listening.controls().stop);
        assert!(!Status::Listening.controls().record);
        assert!(Status::Preview.controls().identify);
        assert_eq!(
            Status::Processing.controls(),
            Controls {
                reset: true,
                ..Controls::default()
            }
        );
        assert!(Status::Results.controls().previews);
    }

    #[test]
    fn rejects_out_of_order_actions() {
        let (mut session, _) = controller(PresentationMode::FullPage);
        assert!(session.begin_identify().is_err());
        assert_eq!(session.status(), Status::Idle);

        in_preview(&mut session);
        assert!(session.start_listening(Instant::now()).is_err());
        assert_eq!(session.status(), Status::Preview);
    }

    #[test]
    fn options_honour_config_override() {
        let options = SessionOptions::from_config(&SessionConfig {
            presentation: PresentationMode::Modal,
            max_results: Some(4),
            auto_stop_secs: 6,
        });
        assert_eq!(options.max_results, 4);
        assert_eq!(options.auto_stop, Duration::from_secs(6));
    }
}
