//! Symphonia-backed stream decoding
//!
//! Decodes one packet per refill and carries leftover samples between
//! reads, so `read_frames` stays a single bounded native read however
//! the caller sizes its requests.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use sf_core::Sample;

use crate::{AudioError, AudioResult, DecodeBackend, DecodedStream};

/// Universal decode backend over symphonia.
///
/// Supports WAV, AIFF, FLAC, ALAC, MP3, OGG Vorbis and AAC/M4A.
#[derive(Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeBackend for SymphoniaDecoder {
    fn open(&self, path: &Path) -> AudioResult<Box<dyn DecodedStream>> {
        if !path.exists() {
            return Err(AudioError::NotFound(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| AudioError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::FormatUnsupported(format!("{}: {}", path.display(), e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                AudioError::FormatUnsupported(format!("{}: no audio track", path.display()))
            })?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::FormatUnsupported(format!("{}: {}", path.display(), e)))?;

        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
        let duration = codec_params
            .n_frames
            .map(|frames| frames as f64 / sample_rate as f64);

        Ok(Box::new(SymphoniaStream {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            duration,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
            path: path.display().to_string(),
        }))
    }
}

struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    duration: Option<f64>,
    /// Samples decoded from the last packet but not yet handed out.
    pending: Vec<Sample>,
    pending_pos: usize,
    eof: bool,
    path: String,
}

impl SymphoniaStream {
    /// Decode packets until one yields samples for our track, or the
    /// stream ends. In-stream decode errors end the track rather than
    /// failing the session.
    fn refill_pending(&mut self) {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return;
                }
                Err(e) => {
                    log::warn!("'{}': packet read error, ending track: {}", self.path, e);
                    self.eof = true;
                    return;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<Sample>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(buf.samples());
                    self.pending_pos = 0;
                    return;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet; skip it
                    log::warn!("'{}': decode error, skipping packet: {}", self.path, e);
                    continue;
                }
                Err(e) => {
                    log::warn!("'{}': decoder failed, ending track: {}", self.path, e);
                    self.eof = true;
                    return;
                }
            }
        }
    }
}

impl DecodedStream for SymphoniaStream {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration_hint(&self) -> Option<f64> {
        self.duration
    }

    fn read_frames(&mut self, dest: &mut [Sample]) -> AudioResult<usize> {
        debug_assert_eq!(dest.len() % self.channels as usize, 0);

        let mut written = 0;
        while written < dest.len() {
            if self.pending_pos >= self.pending.len() {
                if self.eof {
                    break;
                }
                self.refill_pending();
                continue;
            }

            let available = self.pending.len() - self.pending_pos;
            let take = available.min(dest.len() - written);
            dest[written..written + take]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
            self.pending_pos += take;
            written += take;
        }

        Ok(written / self.channels as usize)
    }
}
