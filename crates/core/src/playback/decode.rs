use std::io::{Cursor, ErrorKind};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::Track;
use crate::{HumSearchError, Result};

/// Decodes a complete audio document (mp3, wav, ogg/vorbis, flac) into a mono
/// [`Track`]. `extension` is an optional format hint such as `"mp3"`.
pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<Track> {
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| HumSearchError::Decode("no decodable audio track".into()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                let channels = spec.channels.count().max(1);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(
                    buffer
                        .samples()
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                );
            }
            Err(SymphoniaError::DecodeError(err)) => {
                tracing::debug!(err, "skipping undecodable packet");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let sample_rate =
        sample_rate.ok_or_else(|| HumSearchError::Decode("unknown sample rate".into()))?;
    tracing::debug!(samples = samples.len(), sample_rate, "decoded audio");
    Track::new(samples, sample_rate)
}
