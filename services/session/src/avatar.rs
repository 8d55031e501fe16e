//! Avatar presentation: maps the remote agent's speaking state to a looping
//! video selection with a debounced crossfade.
//!
//! The presenter reacts to speaking edges only, never levels. On an
//! idle-to-talking edge the next talking clip is picked round-robin; on a
//! talking-to-idle edge the single idle clip comes back. A transition lock
//! blocks a second source swap while one is in flight; a request arriving
//! mid-swap is dropped, not queued, and the next natural edge resolves any
//! missed state.

use async_trait::async_trait;
use eloquence_core::agent::AgentProfile;
use eloquence_core::speaking::SpeakingEdge;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tracing::debug;

/// How long the surface stays dimmed after a source swap.
pub const CROSSFADE_HOLD: Duration = Duration::from_millis(200);

const DIMMED_OPACITY: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    Idle,
    Talking,
}

/// The currently selected clip. `talking_index` advances round-robin modulo
/// the pool size, and only on an idle-to-talking edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSelection {
    pub mode: VideoMode,
    pub talking_index: usize,
}

impl VideoSelection {
    pub fn new() -> Self {
        Self {
            mode: VideoMode::Idle,
            talking_index: 0,
        }
    }
}

impl Default for VideoSelection {
    fn default() -> Self {
        Self::new()
    }
}

/// The video element the presenter drives.
#[async_trait]
pub trait VideoSurface: Send + Sync {
    async fn set_opacity(&self, opacity: f32);
    async fn set_source(&self, source: &str);
    async fn reload_and_play(&self);
}

pub struct AvatarPresenter {
    surface: Arc<dyn VideoSurface>,
    profile: &'static AgentProfile,
    selection: Mutex<VideoSelection>,
    swap_in_flight: Arc<AtomicBool>,
}

impl AvatarPresenter {
    pub fn new(surface: Arc<dyn VideoSurface>, profile: &'static AgentProfile) -> Self {
        Self {
            surface,
            profile,
            selection: Mutex::new(VideoSelection::new()),
            swap_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the profile when the exercise moves to its next phase.
    pub fn set_profile(&mut self, profile: &'static AgentProfile) {
        self.profile = profile;
    }

    pub fn selection(&self) -> VideoSelection {
        *self.selection.lock().unwrap()
    }

    pub fn swap_in_flight(&self) -> bool {
        self.swap_in_flight.load(Ordering::Acquire)
    }

    /// Reacts to a speaking edge. Must run inside a tokio runtime; the swap
    /// itself happens on a spawned task so the caller never waits out the
    /// crossfade hold.
    pub fn on_edge(&self, edge: SpeakingEdge) {
        if self
            .swap_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(?edge, "Source swap in flight, dropping edge");
            return;
        }

        let target = {
            let mut selection = self.selection.lock().unwrap();
            match edge {
                SpeakingEdge::Started => {
                    let pool = self.profile.talking_videos;
                    let clip = pool[selection.talking_index % pool.len()];
                    selection.talking_index = (selection.talking_index + 1) % pool.len();
                    selection.mode = VideoMode::Talking;
                    clip
                }
                SpeakingEdge::Stopped => {
                    selection.mode = VideoMode::Idle;
                    self.profile.idle_video
                }
            }
        };

        debug!(target, "Swapping avatar source");
        let surface = self.surface.clone();
        let lock = self.swap_in_flight.clone();
        tokio::spawn(async move {
            surface.set_opacity(DIMMED_OPACITY).await;
            surface.set_source(target).await;
            surface.reload_and_play().await;
            tokio::time::sleep(CROSSFADE_HOLD).await;
            surface.set_opacity(1.0).await;
            lock.store(false, Ordering::Release);
        });
    }

    /// Puts the idle clip up without waiting, used when a phase starts.
    pub fn show_idle(&self) {
        let mut selection = self.selection.lock().unwrap();
        selection.mode = VideoMode::Idle;
        let surface = self.surface.clone();
        let idle = self.profile.idle_video;
        tokio::spawn(async move {
            surface.set_source(idle).await;
            surface.reload_and_play().await;
        });
    }
}

/// Surface test double recording every call, shared with controller tests.
#[cfg(test)]
pub(crate) struct RecordingSurface {
    pub calls: Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix("source:").map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl VideoSurface for RecordingSurface {
    async fn set_opacity(&self, opacity: f32) {
        self.calls.lock().unwrap().push(format!("opacity:{opacity}"));
    }

    async fn set_source(&self, source: &str) {
        self.calls.lock().unwrap().push(format!("source:{source}"));
    }

    async fn reload_and_play(&self) {
        self.calls.lock().unwrap().push("play".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eloquence_core::agent::{AgentKind, Phase, profile_for};

    fn presenter(surface: &Arc<RecordingSurface>) -> AvatarPresenter {
        AvatarPresenter::new(
            surface.clone() as Arc<dyn VideoSurface>,
            profile_for(AgentKind::Press, Phase::Conversation),
        )
    }

    async fn settle() {
        // Past the crossfade hold; paused time auto-advances.
        tokio::time::sleep(CROSSFADE_HOLD + Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn talking_index_cycles_round_robin() {
        let surface = Arc::new(RecordingSurface::new());
        let presenter = presenter(&surface);

        presenter.on_edge(SpeakingEdge::Started);
        settle().await;
        presenter.on_edge(SpeakingEdge::Stopped);
        settle().await;
        presenter.on_edge(SpeakingEdge::Started);
        settle().await;
        presenter.on_edge(SpeakingEdge::Stopped);
        settle().await;
        presenter.on_edge(SpeakingEdge::Started);
        settle().await;

        assert_eq!(
            surface.sources(),
            vec![
                "/videos/talking1.mp4",
                "/videos/not_talking.mp4",
                "/videos/talking3.mp4",
                "/videos/not_talking.mp4",
                "/videos/talking1.mp4",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn swap_protocol_dims_swaps_plays_then_restores() {
        let surface = Arc::new(RecordingSurface::new());
        let presenter = presenter(&surface);
        presenter.on_edge(SpeakingEdge::Started);
        settle().await;
        assert_eq!(
            *surface.calls.lock().unwrap(),
            vec!["opacity:0.3", "source:/videos/talking1.mp4", "play", "opacity:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mid_swap_edges_are_dropped_not_queued() {
        let surface = Arc::new(RecordingSurface::new());
        let presenter = presenter(&surface);
        presenter.on_edge(SpeakingEdge::Started);
        // Arrives while the first swap is still inside its hold.
        presenter.on_edge(SpeakingEdge::Stopped);
        settle().await;
        assert_eq!(surface.sources(), vec!["/videos/talking1.mp4"]);
        // The dropped edge did not advance the selection either.
        assert_eq!(presenter.selection().mode, VideoMode::Talking);
        assert!(!presenter.swap_in_flight());
        // The next natural edge resolves the missed state.
        presenter.on_edge(SpeakingEdge::Stopped);
        settle().await;
        assert_eq!(presenter.selection().mode, VideoMode::Idle);
    }
}
