//! Clip source
//!
//! Implements the audio-clip semantics on top of a decode backend:
//! an ordered playlist, looping, pitch, a start/stop time window,
//! inter-track silence, and the end-of-stream handshake with the
//! playback engine.
//!
//! The engine pulls PCM with [`ClipSource::fill`]. A fill with `None`
//! as destination is the flush handshake: it means the last real buffer
//! has finished playing downstream, and is the only thing that marks
//! the clip finished.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sf_core::{Sample, Seconds};

use sf_audio::{DecodeBackend, DecodedStream};

/// Default rate reported before the first track is opened.
const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Decoder/source side of the pipeline: owns the playlist cursor and at
/// most one open decoded stream at a time.
pub struct ClipSource {
    decoder: Arc<dyn DecodeBackend>,
    playlist: Vec<PathBuf>,
    description: String,

    looping: bool,
    pitch: f32,
    start_time: Seconds,
    stop_time: Seconds,
    pause_between_tracks: Duration,

    current_index: usize,
    active: bool,
    finished: bool,
    /// The last track ended (loop off); every further fill returns 0.
    exhausted: bool,

    channels: u16,
    sample_rate: u32,
    stream: Option<Box<dyn DecodedStream>>,
    /// Remaining frames of inter-track silence.
    pause_frames: usize,
    /// Frames delivered since the session started.
    frames_delivered: u64,
    track_duration: Option<f64>,
    /// Staging area for channel down/up-mix.
    mix_scratch: Vec<Sample>,
}

impl ClipSource {
    pub fn new(decoder: Arc<dyn DecodeBackend>, pause_between_tracks: Duration) -> Self {
        Self {
            decoder,
            playlist: Vec::new(),
            description: String::new(),
            looping: false,
            pitch: 1.0,
            start_time: 0.0,
            stop_time: 0.0,
            pause_between_tracks,
            current_index: 0,
            active: false,
            finished: false,
            exhausted: false,
            channels: 2,
            sample_rate: FALLBACK_SAMPLE_RATE,
            stream: None,
            pause_frames: 0,
            frames_delivered: 0,
            track_duration: None,
            mix_scratch: Vec::new(),
        }
    }

    /// Replace the playlist. This is a full reset: any open stream is
    /// closed and the playback cursor and end-of-stream flags are
    /// cleared. The caller stops the engine first.
    pub fn set_playlist(&mut self, playlist: Vec<PathBuf>) {
        self.stream = None;
        self.playlist = playlist;
        self.current_index = 0;
        self.active = false;
        self.finished = false;
        self.exhausted = false;
        self.pause_frames = 0;
        self.frames_delivered = 0;
        self.track_duration = None;
    }

    pub fn playlist(&self) -> &[PathBuf] {
        &self.playlist
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Store the requested pitch (> 0). The engine samples this once per
    /// session; changing it while active takes effect only after a
    /// stop/restart.
    pub fn set_pitch(&mut self, pitch: f32) {
        if pitch > 0.0 {
            self.pitch = pitch;
        }
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_start_time(&mut self, time: Seconds) {
        self.start_time = time;
    }

    pub fn start_time(&self) -> Seconds {
        self.start_time
    }

    pub fn set_stop_time(&mut self, time: Seconds) {
        self.stop_time = time;
    }

    pub fn stop_time(&self) -> Seconds {
        self.stop_time
    }

    /// Time-window gate, evaluated by the owner each tick. A stop time
    /// at or before the start time means "play until the clip ends".
    pub fn should_start(&self, now: Seconds) -> bool {
        if self.active || now < self.start_time {
            return false;
        }
        // Window already closed
        !(self.stop_time > self.start_time && now >= self.stop_time)
    }

    pub fn should_stop(&self, now: Seconds) -> bool {
        self.active && self.stop_time > self.start_time && now >= self.stop_time
    }

    /// Begin a playback session with the given output channel count.
    pub fn start_playing(&mut self, channels: u16) {
        self.stream = None;
        self.current_index = 0;
        self.active = true;
        self.finished = false;
        self.exhausted = false;
        self.pause_frames = 0;
        self.frames_delivered = 0;
        self.channels = channels.max(1);
    }

    /// End the session: close the decoder, keep playlist and fields.
    pub fn stop_playing(&mut self) {
        self.stream = None;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Output channel count for the current session.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate of the currently open track, or the fallback rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio delivered since the session started.
    pub fn elapsed_seconds(&self) -> f64 {
        self.frames_delivered as f64 / self.sample_rate as f64
    }

    /// Duration of the current track, when the container reports one.
    pub fn track_duration_hint(&self) -> Option<f64> {
        self.track_duration
    }

    /// Produce up to `dest.len() / channels` frames of interleaved PCM.
    ///
    /// `None` is the flush handshake: the engine observed the native
    /// queue fully drained after a natural end, and the clip becomes
    /// finished. Returns the number of frames written (0 on flush,
    /// end-of-stream, or when nothing could be opened).
    pub fn fill(&mut self, dest: Option<&mut [Sample]>) -> usize {
        let Some(dest) = dest else {
            self.finished = true;
            return 0;
        };

        let channels = self.channels as usize;
        let total_frames = dest.len() / channels;

        if self.playlist.is_empty() || self.exhausted {
            dest.fill(0);
            return 0;
        }

        let mut written = 0;
        // Open attempts (failed, or succeeded without producing frames)
        // since the last progress; bounded by one pass over the playlist.
        let mut attempts = 0;

        while written < total_frames {
            if self.pause_frames > 0 {
                let n = self.pause_frames.min(total_frames - written);
                dest[written * channels..(written + n) * channels].fill(0);
                self.pause_frames -= n;
                written += n;
                continue;
            }

            if self.stream.is_none() {
                if attempts >= self.playlist.len() {
                    break;
                }
                attempts += 1;
                let path = self.playlist[self.current_index].clone();
                match self.decoder.open(&path) {
                    Ok(stream) => {
                        log::debug!(
                            "clip '{}': opened '{}' ({} ch @ {} Hz)",
                            self.description,
                            path.display(),
                            stream.channels(),
                            stream.sample_rate()
                        );
                        self.sample_rate = stream.sample_rate().max(1);
                        self.track_duration = stream.duration_hint();
                        self.stream = Some(stream);
                    }
                    Err(e) => {
                        log::warn!("clip '{}': {}", self.description, e);
                        if !self.advance_track() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let want = total_frames - written;
            let got = self.read_mixed(&mut *dest, written, want);
            if got > 0 {
                attempts = 0;
                written += got;
                self.frames_delivered += got as u64;
            }

            if got < want {
                // End of track
                self.stream = None;
                let last = self.current_index + 1 >= self.playlist.len();
                if last && !self.looping {
                    self.exhausted = true;
                    break;
                }
                self.advance_track();
                if self.playlist.len() > 1 {
                    self.pause_frames = (self.pause_between_tracks.as_secs_f64()
                        * self.sample_rate as f64) as usize;
                }
            }
        }

        if written == 0 {
            dest.fill(0);
        }
        written
    }

    /// Move the cursor to the next entry, wrapping. Returns false when
    /// the playlist ran out with looping off.
    fn advance_track(&mut self) -> bool {
        self.current_index += 1;
        if self.current_index >= self.playlist.len() {
            if self.looping {
                self.current_index = 0;
            } else {
                self.current_index = 0;
                self.exhausted = true;
                return false;
            }
        }
        true
    }

    /// Read `want` frames from the open stream into `dest` starting at
    /// frame `offset`, mixing to the session channel count. Read errors
    /// end the track (short read), they do not fail the session.
    fn read_mixed(&mut self, dest: &mut [Sample], offset: usize, want: usize) -> usize {
        let channels = self.channels as usize;
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return 0,
        };
        let stream_channels = stream.channels().max(1) as usize;

        if stream_channels == channels {
            let slice = &mut dest[offset * channels..(offset + want) * channels];
            return match stream.read_frames(slice) {
                Ok(frames) => frames,
                Err(e) => {
                    log::warn!("clip '{}': read failed: {}", self.description, e);
                    0
                }
            };
        }

        self.mix_scratch.resize(want * stream_channels, 0);
        let frames = match stream.read_frames(&mut self.mix_scratch) {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!("clip '{}': read failed: {}", self.description, e);
                0
            }
        };

        for frame in 0..frames {
            let src = &self.mix_scratch[frame * stream_channels..(frame + 1) * stream_channels];
            let dst =
                &mut dest[(offset + frame) * channels..(offset + frame + 1) * channels];
            match (stream_channels, channels) {
                (_, 1) => {
                    // Downmix: average all source channels
                    let sum: i32 = src.iter().map(|&s| s as i32).sum();
                    dst[0] = (sum / stream_channels as i32) as Sample;
                }
                (1, _) => {
                    dst.fill(src[0]);
                }
                _ => {
                    for (ch, out) in dst.iter_mut().enumerate() {
                        *out = src[ch.min(stream_channels - 1)];
                    }
                }
            }
        }
        frames
    }
}
