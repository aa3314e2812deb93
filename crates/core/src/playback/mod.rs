//! Audio output shared by the preview and song detail players.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::{HumSearchError, Result};

mod decode;

pub use decode::decode;

/// Decoded mono audio ready for playback.
#[derive(Clone, PartialEq)]
pub struct Track {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Track {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(HumSearchError::InvalidInput("track sample rate must be positive"));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// An output that plays one loaded track at a time.
pub trait PlaybackSink {
    /// Replaces whatever is loaded; the new track starts paused at zero.
    fn load(&mut self, track: Track) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    /// Pauses without moving the playback position.
    fn pause(&mut self);
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn position(&self) -> Duration;
    fn duration(&self) -> Option<Duration>;
    fn is_playing(&self) -> bool;
    /// True once the loaded track played through to its end.
    fn is_finished(&self) -> bool;
    /// Unloads the current track.
    fn stop(&mut self);
}

/// Playback position and state shared with the output callback.
#[derive(Debug, Default)]
pub(crate) struct Transport {
    track: Option<Track>,
    /// Position in track samples; fractional when device and track rates differ.
    cursor: f64,
    playing: bool,
    finished: bool,
}

impl Transport {
    fn load(&mut self, track: Track) {
        self.track = Some(track);
        self.cursor = 0.0;
        self.playing = false;
        self.finished = false;
    }

    fn play(&mut self) -> Result<()> {
        let track = self
            .track
            .as_ref()
            .ok_or(HumSearchError::InvalidInput("no track loaded"))?;
        if self.finished || self.cursor >= track.samples.len() as f64 {
            self.cursor = 0.0;
        }
        self.finished = false;
        self.playing = true;
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let track = self
            .track
            .as_ref()
            .ok_or(HumSearchError::InvalidInput("no track loaded"))?;
        let target = position.as_secs_f64() * track.sample_rate as f64;
        self.cursor = target.clamp(0.0, track.samples.len() as f64);
        self.finished = false;
        Ok(())
    }

    fn position(&self) -> Duration {
        match &self.track {
            Some(track) => Duration::from_secs_f64(self.cursor / track.sample_rate as f64),
            None => Duration::ZERO,
        }
    }

    fn stop(&mut self) {
        *self = Self::default();
    }

    /// Produces the next output sample for a device running at `device_rate`.
    fn next_sample(&mut self, device_rate: u32) -> f32 {
        if !self.playing {
            return 0.0;
        }
        let Some(track) = &self.track else {
            return 0.0;
        };

        let index = self.cursor as usize;
        if index >= track.samples.len() {
            self.playing = false;
            self.finished = true;
            return 0.0;
        }

        let current = track.samples[index];
        let next = track.samples.get(index + 1).copied().unwrap_or(current);
        let fraction = (self.cursor - index as f64) as f32;
        self.cursor += track.sample_rate as f64 / device_rate as f64;
        current + (next - current) * fraction
    }

    fn fill<T: Copy>(&mut self, data: &mut [T], channels: usize, device_rate: u32, convert: impl Fn(f32) -> T) {
        for frame in data.chunks_mut(channels) {
            let value = convert(self.next_sample(device_rate));
            frame.fill(value);
        }
    }
}

/// [`PlaybackSink`] that renders through the default cpal output device.
pub struct DeviceSink {
    shared: Arc<Mutex<Transport>>,
    _stream: cpal::Stream,
}

impl DeviceSink {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| HumSearchError::Device("no output device available".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| HumSearchError::Device(err.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = usize::from(config.channels.max(1));
        let rate = config.sample_rate.0;
        let shared = Arc::new(Mutex::new(Transport::default()));

        let stream = match sample_format {
            SampleFormat::F32 => {
                let shared = shared.clone();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(&shared, data, channels, rate, 0.0, |v| v)
                    },
                    log_stream_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let shared = shared.clone();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        render(&shared, data, channels, rate, 0, |v| {
                            (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                        })
                    },
                    log_stream_error,
                    None,
                )
            }
            SampleFormat::U16 => {
                let shared = shared.clone();
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        render(&shared, data, channels, rate, 32_768, |v| {
                            (v.clamp(-1.0, 1.0) * 32_767.0 + 32_768.0) as u16
                        })
                    },
                    log_stream_error,
                    None,
                )
            }
            other => {
                return Err(HumSearchError::Device(format!(
                    "unsupported output sample format {other:?}"
                )))
            }
        }
        .map_err(|err| HumSearchError::Device(err.to_string()))?;

        stream
            .play()
            .map_err(|err| HumSearchError::Device(err.to_string()))?;
        tracing::info!(sample_rate = rate, channels, "output stream started");

        Ok(Self {
            shared,
            _stream: stream,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Transport>> {
        self.shared
            .lock()
            .map_err(|_| HumSearchError::msg("playback transport has been poisoned"))
    }

    fn with_transport<R: Default>(&self, f: impl FnOnce(&mut Transport) -> R) -> R {
        match self.lock() {
            Ok(mut transport) => f(&mut transport),
            Err(err) => {
                tracing::error!(%err, "playback state unavailable");
                R::default()
            }
        }
    }
}

impl PlaybackSink for DeviceSink {
    fn load(&mut self, track: Track) -> Result<()> {
        tracing::debug!(?track, "loading track");
        self.lock()?.load(track);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.lock()?.play()
    }

    fn pause(&mut self) {
        self.with_transport(|transport| transport.playing = false);
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.lock()?.seek(position)
    }

    fn position(&self) -> Duration {
        self.with_transport(|transport| transport.position())
    }

    fn duration(&self) -> Option<Duration> {
        self.with_transport(|transport| transport.track.as_ref().map(Track::duration))
    }

    fn is_playing(&self) -> bool {
        self.with_transport(|transport| transport.playing)
    }

    fn is_finished(&self) -> bool {
        self.with_transport(|transport| transport.finished)
    }

    fn stop(&mut self) {
        self.with_transport(Transport::stop);
    }
}

impl std::fmt::Debug for DeviceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSink").finish()
    }
}

/// Output callback body. Never blocks: a contended lock renders silence.
fn render<T: Copy>(
    shared: &Mutex<Transport>,
    data: &mut [T],
    channels: usize,
    device_rate: u32,
    silence: T,
    convert: impl Fn(f32) -> T,
) {
    match shared.try_lock() {
        Ok(mut transport) => transport.fill(data, channels, device_rate, convert),
        Err(_) => data.fill(silence),
    }
}

fn log_stream_error(err: cpal::StreamError) {
    tracing::warn!(%err, "output stream error");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory sink that advances only when told to.
    #[derive(Debug, Default)]
    pub struct FakeSink {
        transport: Transport,
        pub loads: usize,
    }

    impl FakeSink {
        /// Renders `frames` output frames at the track's own rate.
        pub fn advance(&mut self, frames: usize) {
            let rate = self
                .transport
                .track
                .as_ref()
                .map(|track| track.sample_rate)
                .unwrap_or(1);
            let mut out = vec![0.0_f32; frames];
            self.transport.fill(&mut out, 1, rate, |v| v);
        }
    }

    impl PlaybackSink for FakeSink {
        fn load(&mut self, track: Track) -> Result<()> {
            self.loads += 1;
            self.transport.load(track);
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            self.transport.play()
        }

        fn pause(&mut self) {
            self.transport.playing = false;
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            self.transport.seek(position)
        }

        fn position(&self) -> Duration {
            self.transport.position()
        }

        fn duration(&self) -> Option<Duration> {
            self.transport.track.as_ref().map(Track::duration)
        }

        fn is_playing(&self) -> bool {
            self.transport.playing
        }

        fn is_finished(&self) -> bool {
            self.transport.finished
        }

        fn stop(&mut self) {
            self.transport.stop();
        }
    }

    pub fn ramp(len: usize, sample_rate: u32) -> Track {
        let samples = (0..len).map(|i| i as f32 / len as f32).collect();
        Track::new(samples, sample_rate).unwrap()
    }
}
