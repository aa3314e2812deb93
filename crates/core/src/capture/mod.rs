use std::{
    io::Cursor,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::{HumSearchError, Result};

/// Filename submitted for clips that carry no name of their own.
pub const DEFAULT_UPLOAD_NAME: &str = "recording.webm";
/// Filename given to clips captured from the microphone.
pub const RECORDING_NAME: &str = "recording.wav";

/// An audio payload ready to be uploaded, either captured or picked from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    filename: Option<String>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, filename: Option<String>) -> Self {
        Self {
            bytes,
            filename: filename.filter(|name| !name.trim().is_empty()),
        }
    }

    /// Reads a user-selected audio file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(HumSearchError::InvalidInput("audio file is empty"));
        }
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "loaded audio file");
        Ok(Self::new(bytes, filename))
    }

    /// Packages captured mono samples as a 16-bit WAV clip.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self> {
        let bytes = encode_wav(samples, sample_rate)?;
        Ok(Self::new(bytes, Some(RECORDING_NAME.to_string())))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Name used for the multipart upload.
    pub fn upload_name(&self) -> &str {
        self.filename().unwrap_or(DEFAULT_UPLOAD_NAME)
    }

    pub fn mime_type(&self) -> &'static str {
        let extension = Path::new(self.upload_name())
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match extension.as_deref() {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("ogg") | Some("oga") => "audio/ogg",
            Some("flac") => "audio/flac",
            Some("m4a") | Some("mp4") => "audio/mp4",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        }
    }
}

/// Encodes mono `f32` samples as a 16-bit PCM WAV document.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if sample_rate == 0 {
        return Err(HumSearchError::InvalidInput("sample rate must be positive"));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// A live microphone stream owned by one recording session.
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;

    /// Returns the samples captured since the previous call.
    fn drain(&mut self) -> Result<Vec<f32>>;

    /// Stops capture and releases the device.
    fn stop(self);
}

/// Something that can hand out microphone streams.
pub trait CaptureDevice {
    type Stream: CaptureStream;

    fn open(&mut self) -> Result<Self::Stream>;
}

/// The host's input device, accessed through cpal.
#[derive(Debug, Clone, Default)]
pub struct Microphone {
    device_name: Option<String>,
}

impl Microphone {
    /// Uses the default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the input device with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Lists the names of the available input devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| HumSearchError::Device(format!("failed to enumerate devices: {err}")))?
            .filter_map(|device| device.name().ok())
            .collect();
        Ok(devices)
    }

    fn device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| HumSearchError::Device("no input device available".into())),
            Some(name) => host
                .input_devices()
                .map_err(|err| HumSearchError::Device(err.to_string()))?
                .find(|device| device.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| HumSearchError::Device(format!("input device `{name}` not found"))),
        }
    }
}

impl CaptureDevice for Microphone {
    type Stream = MicrophoneStream;

    fn open(&mut self) -> Result<MicrophoneStream> {
        let device = self.device()?;
        let supported = device
            .default_input_config()
            .map_err(|err| classify_device_error(err.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = usize::from(config.channels.max(1));
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let stream = match sample_format {
            SampleFormat::F32 => {
                let buffer = buffer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push_frames(&buffer, data, channels, |s| s)
                    },
                    log_stream_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let buffer = buffer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        push_frames(&buffer, data, channels, |s| s as f32 / 32_768.0)
                    },
                    log_stream_error,
                    None,
                )
            }
            SampleFormat::U16 => {
                let buffer = buffer.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        push_frames(&buffer, data, channels, |s| {
                            (s as f32 - 32_768.0) / 32_768.0
                        })
                    },
                    log_stream_error,
                    None,
                )
            }
            other => {
                return Err(HumSearchError::Device(format!(
                    "unsupported input sample format {other:?}"
                )))
            }
        }
        .map_err(|err| classify_device_error(err.to_string()))?;

        stream
            .play()
            .map_err(|err| classify_device_error(err.to_string()))?;

        tracing::info!(
            sample_rate = config.sample_rate.0,
            channels,
            "microphone stream started"
        );

        Ok(MicrophoneStream {
            stream,
            buffer,
            sample_rate: config.sample_rate.0,
        })
    }
}

/// Capture stream backed by a running cpal input stream.
pub struct MicrophoneStream {
    stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl MicrophoneStream {
    fn lock_buffer(&self) -> Result<MutexGuard<'_, Vec<f32>>> {
        self.buffer
            .lock()
            .map_err(|_| HumSearchError::msg("capture buffer has been poisoned"))
    }
}

impl CaptureStream for MicrophoneStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.lock_buffer()?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn stop(self) {
        if let Err(err) = self.stream.pause() {
            tracing::debug!(%err, "pausing input stream before release failed");
        }
        drop(self.stream);
        tracing::info!("microphone stream released");
    }
}

impl std::fmt::Debug for MicrophoneStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrophoneStream")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

fn push_frames<T: Copy>(
    buffer: &Mutex<Vec<f32>>,
    data: &[T],
    channels: usize,
    convert: impl Fn(T) -> f32,
) {
    let Ok(mut buffer) = buffer.lock() else {
        return;
    };
    buffer.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().map(|s| convert(*s)).sum::<f32>() / frame.len() as f32),
    );
}

fn log_stream_error(err: cpal::StreamError) {
    tracing::warn!(%err, "input stream error");
}

/// Hosts report a refused microphone through backend-specific messages.
fn classify_device_error(message: String) -> HumSearchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        HumSearchError::Permission(message)
    } else {
        HumSearchError::Device(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_clips_upload_as_webm() {
        let clip = AudioClip::new(vec![1, 2, 3], None);
        assert_eq!(clip.upload_name(), "recording.webm");
        assert_eq!(clip.mime_type(), "audio/webm");

        let blank = AudioClip::new(vec![1], Some("  ".into()));
        assert_eq!(blank.upload_name(), DEFAULT_UPLOAD_NAME);
    }

    #[test]
    fn keeps_user_filenames() {
        let clip = AudioClip::new(vec![0; 4], Some("hum.MP3".into()));
        assert_eq!(clip.upload_name(), "hum.MP3");
        assert_eq!(clip.mime_type(), "audio/mpeg");
    }

    #[test]
    fn captured_samples_become_wav() {
        let samples: Vec<f32> = (0..4_800).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let clip = AudioClip::from_samples(&samples, 16_000).unwrap();

        assert_eq!(clip.upload_name(), RECORDING_NAME);
        assert_eq!(clip.mime_type(), "audio/wav");

        let reader = hound::WavReader::new(Cursor::new(clip.bytes())).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 4_800);
    }

    #[test]
    fn reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hum.ogg");
        std::fs::write(&path, b"OggS-not-really").unwrap();

        let clip = AudioClip::from_file(&path).unwrap();
        assert_eq!(clip.filename(), Some("hum.ogg"));
        assert_eq!(clip.mime_type(), "audio/ogg");
    }

    #[test]
    fn empty_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            AudioClip::from_file(&path),
            Err(HumSearchError::InvalidInput(_))
        ));
    }

    #[test]
    fn downmixes_interleaved_frames() {
        let buffer = Mutex::new(Vec::new());
        push_frames(&buffer, &[1.0_f32, 0.0, 0.5, 0.5], 2, |s| s);
        assert_eq!(*buffer.lock().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn refused_access_maps_to_permission() {
        assert!(matches!(
            classify_device_error("Permission denied (os error 13)".into()),
            HumSearchError::Permission(_)
        ));
        assert!(matches!(
            classify_device_error("device busy".into()),
            HumSearchError::Device(_)
        ));
    }
}
