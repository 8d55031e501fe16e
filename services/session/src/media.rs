//! Camera and microphone stream ownership.
//!
//! The stream belongs to the current exercise instance only. It is released
//! on every exit path: stop, shutdown, or a failed reacquire. Toggling the
//! microphone flips the audio track in place without stopping the stream,
//! so re-enabling is immediate.

use async_trait::async_trait;
use eloquence_core::error::MediaAcquisitionError;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Preferred capture parameters for the combined audio+video request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio: bool,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            audio: true,
        }
    }
}

#[derive(Debug)]
struct TrackState {
    enabled: AtomicBool,
    live: AtomicBool,
}

/// One capture track. Cloning shares the underlying state, so a test (or a
/// preview surface) can observe liveness after the manager released it.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    kind: TrackKind,
    state: Arc<TrackState>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            state: Arc::new(TrackState {
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.state.live.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables the track in place; the track stays live.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::Release);
    }

    /// Stops the track for good. Terminal; a stopped track never comes back.
    pub fn stop(&self) {
        self.state.live.store(false, Ordering::Release);
    }
}

/// The combined audio+video stream handed out by a capture backend.
#[derive(Debug, Default)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Platform seam for the actual device capture.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError>;
}

/// Exclusive owner of the exercise's camera/microphone stream.
pub struct MediaDeviceManager {
    backend: Arc<dyn CaptureBackend>,
    constraints: StreamConstraints,
    stream: Option<MediaStream>,
    camera_enabled: bool,
    mic_enabled: bool,
}

impl MediaDeviceManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, constraints: StreamConstraints) -> Self {
        Self {
            backend,
            constraints,
            stream: None,
            camera_enabled: false,
            mic_enabled: false,
        }
    }

    /// Requests the combined audio+video stream. On denial the exercise
    /// proceeds in a camera-disabled state; the caller logs the error and
    /// continues rather than aborting.
    pub async fn acquire(&mut self) -> Result<(), MediaAcquisitionError> {
        // No two owners: any stream from a previous attempt goes first.
        self.release();
        match self.backend.open(&self.constraints).await {
            Ok(stream) => {
                info!(tracks = stream.tracks().len(), "Media stream acquired");
                self.stream = Some(stream);
                self.camera_enabled = true;
                self.mic_enabled = true;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Media acquisition failed, camera disabled");
                self.camera_enabled = false;
                Err(e)
            }
        }
    }

    /// Stops every track and drops the stream. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
            debug!("Media stream released");
        }
        self.camera_enabled = false;
        self.mic_enabled = false;
    }

    /// Flips the audio track's enabled flag without stopping the stream.
    /// Returns the new microphone state.
    pub fn toggle_mic(&mut self) -> bool {
        self.mic_enabled = !self.mic_enabled;
        if let Some(stream) = &self.stream {
            for track in stream.audio_tracks() {
                track.set_enabled(self.mic_enabled);
            }
        }
        self.mic_enabled
    }

    /// Disabling stops the video tracks; enabling reacquires the stream.
    /// Returns the new camera state.
    pub async fn toggle_camera(&mut self) -> Result<bool, MediaAcquisitionError> {
        if self.camera_enabled {
            if let Some(stream) = &self.stream {
                for track in stream.video_tracks() {
                    track.stop();
                }
            }
            self.camera_enabled = false;
            Ok(false)
        } else {
            self.acquire().await?;
            Ok(true)
        }
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn live_track_count(&self) -> usize {
        self.stream.as_ref().map_or(0, MediaStream::live_track_count)
    }
}

/// Capture backend test double shared by this module's and the controller's
/// tests. Hands out audio+video track pairs and keeps a handle on every
/// track it ever created so liveness can be asserted after release.
#[cfg(test)]
pub(crate) struct FakeCaptureBackend {
    pub fail: AtomicBool,
    pub issued: std::sync::Mutex<Vec<MediaTrack>>,
}

#[cfg(test)]
impl FakeCaptureBackend {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            issued: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn live_issued_tracks(&self) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_live())
            .count()
    }
}

#[cfg(test)]
#[async_trait]
impl CaptureBackend for FakeCaptureBackend {
    async fn open(
        &self,
        _constraints: &StreamConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError> {
        if self.fail.load(Ordering::Acquire) {
            return Err(MediaAcquisitionError::Denied("NotAllowedError".into()));
        }
        let tracks = vec![MediaTrack::new(TrackKind::Audio), MediaTrack::new(TrackKind::Video)];
        self.issued.lock().unwrap().extend(tracks.iter().cloned());
        Ok(MediaStream::new(tracks))
    }
}
