//! Playback arbitration.
//!
//! Serializes "force play" requests against the single external player
//! instance. Overlapping asynchronous stop-then-start sequences (rapid
//! re-layout, lifecycle churn) must never produce two concurrently starting
//! sessions or a restart racing a not-yet-finished stop, so the arbiter
//! coalesces re-entrant requests behind a debounce guard and defers restarts
//! until the prior stop's completion callback arrives.

use crate::config::PlaybackConfig;
use crate::error::{AnimError, Result};
use crate::player::{Player, PlayerEvent};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Invoked once when the first frame of an accepted force-play renders.
pub type FirstFrameCallback = Box<dyn FnOnce() + Send>;

/// Externally registered observer of forwarded player events.
pub type EventListener = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Arbiter lifecycle phase.
///
/// `Idle → Starting → Running → Stopping → Idle`; `Destroyed` is terminal
/// and reachable from any phase. Transitions happen only under the state
/// lock, with guard conditions expressed as predicates here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
    Destroyed,
}

impl Phase {
    /// A new session may only begin from `Idle`.
    pub fn can_start(self) -> bool {
        self == Phase::Idle
    }

    /// Returns `true` once no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self == Phase::Destroyed
    }
}

/// A restart captured while waiting for the previous session to stop.
struct PendingRestart {
    file: PathBuf,
    loop_count: i32,
    on_first_frame: Option<FirstFrameCallback>,
}

struct ArbiterState {
    phase: Phase,
    /// Set while an accepted force-play has not yet started, rendered its
    /// first frame, failed, or been torn down.
    force_outstanding: bool,
    last_force_at: Option<Instant>,
    pending_restart: Option<PendingRestart>,
    on_first_frame: Option<FirstFrameCallback>,
    attached: bool,
    loop_count: i32,
}

/// Owns the single external [`Player`] handle and the most recent play
/// session, guaranteeing at most one starting-or-running session per view.
pub struct PlaybackArbiter {
    player: Arc<dyn Player>,
    config: PlaybackConfig,
    state: Mutex<ArbiterState>,
    listener: Mutex<Option<EventListener>>,
    /// Runtime captured at construction for scheduling the restart grace
    /// delay; player callbacks may arrive from threads outside any runtime.
    runtime: Option<tokio::runtime::Handle>,
}

impl PlaybackArbiter {
    /// Create an arbiter owning `player`.
    pub fn new(player: Arc<dyn Player>, config: PlaybackConfig) -> Arc<Self> {
        Arc::new(Self {
            player,
            config,
            state: Mutex::new(ArbiterState {
                phase: Phase::Idle,
                force_outstanding: false,
                last_force_at: None,
                pending_restart: None,
                on_first_frame: None,
                attached: true,
                loop_count: 0,
            }),
            listener: Mutex::new(None),
            runtime: tokio::runtime::Handle::try_current().ok(),
        })
    }

    /// Register the observer that forwarded player events are delivered to.
    pub fn set_listener(&self, listener: EventListener) {
        *self.listener.lock() = Some(listener);
    }

    /// Mark the owning view attached or detached. A deferred restart only
    /// runs while attached.
    pub fn set_attached(&self, attached: bool) {
        self.state.lock().attached = attached;
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Returns `true` while the player reports an active session.
    pub fn is_running(&self) -> bool {
        self.player.is_running()
    }

    /// Force playback of `file`, stopping any active session first.
    ///
    /// A request arriving while a prior force-play is still outstanding
    /// within the debounce window returns [`AnimError::ReentrancyRejected`]
    /// without touching the player. This is expected steady-state behavior,
    /// not a fault.
    pub fn force_play(
        self: &Arc<Self>,
        file: PathBuf,
        loop_count: i32,
        on_first_frame: Option<FirstFrameCallback>,
    ) -> Result<()> {
        let start = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return Err(AnimError::State("arbiter is destroyed".into()));
            }
            let now = Instant::now();
            let within_window = state
                .last_force_at
                .is_some_and(|t| now.duration_since(t) < self.config.force_play_debounce);
            if state.force_outstanding && within_window {
                debug!("force-play suppressed by re-entrancy guard");
                return Err(AnimError::ReentrancyRejected);
            }
            state.force_outstanding = true;
            state.last_force_at = Some(now);

            if self.player.is_running() {
                state.pending_restart = Some(PendingRestart {
                    file,
                    loop_count,
                    on_first_frame,
                });
                state.phase = Phase::Stopping;
                None
            } else {
                Some((file, on_first_frame))
            }
        };

        match start {
            None => {
                debug!("player running, restart deferred until stop completes");
                self.player.stop();
                Ok(())
            }
            Some((file, on_first_frame)) => self.begin(file, loop_count, on_first_frame),
        }
    }

    /// Request playback stop.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Starting | Phase::Running) {
                state.phase = Phase::Stopping;
            }
        }
        debug!("stop requested");
        self.player.stop();
    }

    /// Tear everything down. The arbiter accepts no further requests.
    pub fn destroy(&self) {
        {
            let mut state = self.state.lock();
            state.phase = Phase::Destroyed;
            state.pending_restart = None;
            state.on_first_frame = None;
            state.force_outstanding = false;
        }
        info!("arbiter destroyed");
        self.player.stop();
        self.player.release_surface();
    }

    /// Deliver a player lifecycle event.
    ///
    /// Each event clears the force-play guard *before* forwarding to the
    /// registered listener, so a legitimately finished force-play never
    /// blocks the next one; a failure clears it too (self-healing).
    pub fn handle_event(self: &Arc<Self>, event: PlayerEvent) {
        match &event {
            PlayerEvent::Started => {
                let mut state = self.state.lock();
                state.force_outstanding = false;
                if state.phase == Phase::Starting {
                    state.phase = Phase::Running;
                }
            }
            PlayerEvent::FrameRendered(index) => {
                if *index == 1 {
                    let callback = {
                        let mut state = self.state.lock();
                        state.force_outstanding = false;
                        state.on_first_frame.take()
                    };
                    if let Some(callback) = callback {
                        callback();
                    }
                }
            }
            PlayerEvent::Completed => self.on_completed(),
            PlayerEvent::Destroyed => {
                let restart = {
                    let mut state = self.state.lock();
                    state.force_outstanding = false;
                    if !state.phase.is_terminal() {
                        state.phase = Phase::Idle;
                    }
                    state.pending_restart.take()
                };
                // The clean stop is done; a deferred restart may run now.
                if let Some(restart) = restart {
                    self.run_pending(restart);
                }
            }
            PlayerEvent::Failed { kind, message } => {
                warn!(?kind, detail = %message, "playback failed");
                let mut state = self.state.lock();
                state.force_outstanding = false;
                state.on_first_frame = None;
                if !state.phase.is_terminal() {
                    state.phase = Phase::Idle;
                }
            }
        }

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(&event);
        }
    }

    fn on_completed(self: &Arc<Self>) {
        let (teardown, restart) = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                (false, None)
            } else if state.loop_count <= 0 {
                // Play-once semantics: release the surface. A pending restart
                // stays queued; the player's Destroyed event runs it.
                state.phase = Phase::Idle;
                (true, None)
            } else {
                state.phase = Phase::Idle;
                (false, state.pending_restart.take())
            }
        };

        if teardown {
            debug!("play-once session complete, releasing surface");
            self.player.release_surface();
        } else if let Some(restart) = restart {
            // Let teardown settle before restarting. Completion callbacks can
            // arrive from the player's own thread, outside any runtime: prefer
            // the caller's runtime, then the one captured at construction, and
            // with neither restart inline without the grace delay.
            let handle = tokio::runtime::Handle::try_current()
                .ok()
                .or_else(|| self.runtime.clone());
            match handle {
                Some(handle) => {
                    let arbiter = Arc::clone(self);
                    let grace = self.config.restart_grace;
                    handle.spawn(async move {
                        tokio::time::sleep(grace).await;
                        arbiter.run_pending(restart);
                    });
                }
                None => self.run_pending(restart),
            }
        }
    }

    fn run_pending(&self, restart: PendingRestart) {
        let allowed = {
            let state = self.state.lock();
            state.attached && state.phase.can_start()
        };
        if !allowed {
            debug!("deferred restart dropped: view detached or phase changed");
            return;
        }
        if let Err(e) = self.begin(restart.file, restart.loop_count, restart.on_first_frame) {
            warn!(error = %e, "deferred restart failed");
        }
    }

    fn begin(
        &self,
        file: PathBuf,
        loop_count: i32,
        on_first_frame: Option<FirstFrameCallback>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return Err(AnimError::State("arbiter is destroyed".into()));
            }
            state.phase = Phase::Starting;
            state.loop_count = loop_count;
            state.on_first_frame = on_first_frame;
        }

        self.player.set_loop(loop_count);
        match self.player.start(&file) {
            Ok(()) => {
                debug!(file = %file.display(), loop_count, "playback starting");
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.phase = Phase::Idle;
                state.force_outstanding = false;
                state.on_first_frame = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::MockPlayer;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn arbiter_with(player: MockPlayer, config: PlaybackConfig) -> Arc<PlaybackArbiter> {
        PlaybackArbiter::new(Arc::new(player), config)
    }

    #[test]
    fn test_force_play_starts_idle_player() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().times(1).return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        assert_eq!(arbiter.phase(), Phase::Starting);
    }

    #[test]
    fn test_second_force_play_within_window_is_rejected() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().times(1).return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        let second = arbiter.force_play(PathBuf::from("/cache/b.mp4"), 1, None);
        assert!(matches!(second, Err(AnimError::ReentrancyRejected)));
    }

    #[test]
    fn test_guard_clears_after_window_expires() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().times(2).return_const(());
        player.expect_start().times(2).returning(|_| Ok(()));

        let config = PlaybackConfig::default()
            .with_force_play_debounce(Duration::from_millis(10));
        let arbiter = arbiter_with(player, config);
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // Window expired: a stuck guard must not block playback forever.
        arbiter
            .force_play(PathBuf::from("/cache/b.mp4"), 1, None)
            .unwrap();
    }

    #[test]
    fn test_running_player_defers_restart_until_destroy() {
        let mut player = MockPlayer::new();
        let mut running = mockall::Sequence::new();
        player
            .expect_is_running()
            .times(1)
            .in_sequence(&mut running)
            .return_const(true);
        player.expect_stop().times(1).return_const(());
        player.expect_set_loop().times(1).return_const(());
        player.expect_start().times(1).returning(|_| Ok(()));

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        assert_eq!(arbiter.phase(), Phase::Stopping);

        // stop completion arrives: restart runs.
        arbiter.handle_event(PlayerEvent::Destroyed);
        assert_eq!(arbiter.phase(), Phase::Starting);
    }

    #[test]
    fn test_events_clear_guard_before_forwarding() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().returning(|_| Ok(()));

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = observed.clone();
        let probe = Arc::clone(&arbiter);
        arbiter.set_listener(Arc::new(move |event| {
            if matches!(event, PlayerEvent::Failed { .. }) {
                // By the time the listener runs, the guard is already clear:
                // a new force-play must be accepted.
                let ok = probe
                    .force_play(PathBuf::from("/cache/b.mp4"), 1, None)
                    .is_ok();
                observed_clone.store(ok, Ordering::SeqCst);
            }
        }));

        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        arbiter.handle_event(PlayerEvent::Failed {
            kind: crate::player::FailureKind::Decode,
            message: "bad container".into(),
        });
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_first_frame_callback_fires_once() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().returning(|_| Ok(()));

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        arbiter
            .force_play(
                PathBuf::from("/cache/a.mp4"),
                1,
                Some(Box::new(move || fired_clone.store(true, Ordering::SeqCst))),
            )
            .unwrap();

        arbiter.handle_event(PlayerEvent::FrameRendered(0));
        assert!(!fired.load(Ordering::SeqCst));
        arbiter.handle_event(PlayerEvent::FrameRendered(1));
        assert!(fired.load(Ordering::SeqCst));
        // Subsequent frames must not re-fire the consumed callback.
        arbiter.handle_event(PlayerEvent::FrameRendered(1));
    }

    #[test]
    fn test_play_once_completion_releases_surface() {
        let mut player = MockPlayer::new();
        player.expect_is_running().return_const(false);
        player.expect_set_loop().return_const(());
        player.expect_start().returning(|_| Ok(()));
        player.expect_release_surface().times(1).return_const(());

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 0, None)
            .unwrap();
        arbiter.handle_event(PlayerEvent::Started);
        assert_eq!(arbiter.phase(), Phase::Running);
        arbiter.handle_event(PlayerEvent::Completed);
        assert_eq!(arbiter.phase(), Phase::Idle);
    }

    #[test]
    fn test_destroyed_arbiter_rejects_requests() {
        let mut player = MockPlayer::new();
        player.expect_stop().return_const(());
        player.expect_release_surface().return_const(());

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter.destroy();
        let result = arbiter.force_play(PathBuf::from("/cache/a.mp4"), 1, None);
        assert!(matches!(result, Err(AnimError::State(_))));
    }

    #[test]
    fn test_completion_with_deferred_restart_needs_no_runtime() {
        let mut player = MockPlayer::new();
        let mut order = mockall::Sequence::new();
        player
            .expect_is_running()
            .times(1)
            .in_sequence(&mut order)
            .return_const(false);
        player
            .expect_is_running()
            .times(1)
            .in_sequence(&mut order)
            .return_const(true);
        player.expect_set_loop().times(2).return_const(());
        player.expect_start().times(2).returning(|_| Ok(()));
        player.expect_stop().times(1).return_const(());

        // No runtime anywhere: the restart must run inline, not panic.
        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 3, None)
            .unwrap();
        arbiter.handle_event(PlayerEvent::Started);
        arbiter.handle_event(PlayerEvent::FrameRendered(1));
        arbiter
            .force_play(PathBuf::from("/cache/b.mp4"), 3, None)
            .unwrap();
        assert_eq!(arbiter.phase(), Phase::Stopping);

        arbiter.handle_event(PlayerEvent::Completed);
        assert_eq!(arbiter.phase(), Phase::Starting);
    }

    #[test]
    fn test_detached_view_drops_deferred_restart() {
        let mut player = MockPlayer::new();
        player.expect_is_running().times(1).return_const(true);
        player.expect_stop().times(1).return_const(());
        // start is never called.

        let arbiter = arbiter_with(player, PlaybackConfig::default());
        arbiter
            .force_play(PathBuf::from("/cache/a.mp4"), 1, None)
            .unwrap();
        arbiter.set_attached(false);
        arbiter.handle_event(PlayerEvent::Destroyed);
        assert_eq!(arbiter.phase(), Phase::Idle);
    }
}
