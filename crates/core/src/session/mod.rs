//! Owned context tying the grid, the frame loop and the audio engine to one
//! clock.

use crate::{
    atlas::GlyphAtlas,
    audio::{AudioEngine, AudioOutput, Cue, CueOutcome},
    config::AppConfig,
    debug::DebugFacade,
    frame::{FrameHost, FrameScheduler, FrameStats, FrameToken},
    grid::TerminalGrid,
    input::{InputLog, KeyEvent},
    render::Surface,
    timeline::{SharedClock, TickAccumulator},
    Result, TermToneError,
};

/// Result of one painted animation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub stats: FrameStats,
    /// Fixed-rate logic ticks that became due with this frame.
    pub logic_ticks: u32,
    /// Voices released because their stop time passed.
    pub finished_voices: usize,
}

pub struct Session<H: FrameHost, O: AudioOutput> {
    grid: TerminalGrid,
    frames: FrameScheduler<H>,
    audio: AudioEngine<O>,
    input: InputLog,
    ticks: TickAccumulator,
    clock: SharedClock,
}

impl<H: FrameHost, O: AudioOutput> Session<H, O> {
    /// Builds every component from `config` and schedules the first paint.
    pub fn new(config: &AppConfig, host: H, output: O, clock: SharedClock) -> Result<Self> {
        let atlas = GlyphAtlas::from_config(&config.atlas)?;
        let grid = TerminalGrid::new(atlas, &config.display);
        let mut frames = FrameScheduler::new(host, clock.clone());
        frames.request_frame();

        tracing::debug!(
            cols = grid.dimensions().cols,
            rows = grid.dimensions().rows,
            "session started"
        );

        Ok(Self {
            grid,
            frames,
            audio: AudioEngine::from_config(output, &config.audio),
            input: InputLog::default(),
            ticks: TickAccumulator::new(
                config.frame.tick_rate_hz,
                config.frame.max_ticks_per_frame,
            ),
            clock,
        })
    }

    pub fn grid(&self) -> &TerminalGrid {
        &self.grid
    }

    /// Direct cell access. Call [`Session::request_frame`] afterwards to get
    /// the changes on screen.
    pub fn grid_mut(&mut self) -> &mut TerminalGrid {
        &mut self.grid
    }

    pub fn frames(&self) -> &FrameScheduler<H> {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FrameScheduler<H> {
        &mut self.frames
    }

    pub fn audio(&self) -> &AudioEngine<O> {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioEngine<O> {
        &mut self.audio
    }

    pub fn input(&self) -> &InputLog {
        &self.input
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn resize(&mut self, viewport_width: u32, viewport_height: u32, pixel_ratio: f32) {
        self.grid.resize(viewport_width, viewport_height, pixel_ratio);
        self.frames.request_frame();
    }

    pub fn request_frame(&mut self) -> bool {
        self.frames.request_frame()
    }

    /// Records a key press. Key presses count as user gestures, so a
    /// suspended audio device is resumed here when the platform allows it.
    pub fn key(&mut self, event: KeyEvent) -> Result<()> {
        tracing::trace!(key = %event.key, "key event");
        self.input.record(event);
        match self.audio.resume() {
            Ok(()) => Ok(()),
            Err(TermToneError::DeviceSuspended | TermToneError::DeviceClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn cue(&mut self, cue: Cue) -> Result<CueOutcome> {
        self.audio.play_cue(cue)
    }

    /// Host callback. Returns `Ok(None)` when `token` is not the pending
    /// frame; logic ticks and voice cleanup only run for frames that paint.
    pub fn on_animation_frame(
        &mut self,
        token: FrameToken,
        surface: &mut dyn Surface,
    ) -> Result<Option<FrameTick>> {
        let Some(stats) = self.frames.on_animation_frame(token, &self.grid, surface)? else {
            return Ok(None);
        };
        let logic_ticks = self.ticks.advance(self.clock.now());
        let finished_voices = self.audio.collect_finished();
        Ok(Some(FrameTick {
            stats,
            logic_ticks,
            finished_voices,
        }))
    }

    /// Cancels the pending frame and closes the audio device.
    pub fn shutdown(&mut self) -> Result<()> {
        self.frames.cancel();
        self.audio.close()
    }

    pub fn debug(&self) -> DebugFacade<'_> {
        DebugFacade::new(
            &self.grid,
            &self.input,
            self.frames.state(),
            self.frames.stats(),
            self.audio.status(),
        )
    }
}

impl<H, O> std::fmt::Debug for Session<H, O>
where
    H: FrameHost + std::fmt::Debug,
    O: AudioOutput + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("grid", &self.grid.dimensions())
            .field("frames", &self.frames)
            .field("audio", &self.audio)
            .field("input", &self.input.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        audio::{AudioDeviceState, SoftwareOutput},
        frame::{FrameState, ManualFrameHost},
        render::RecordingSurface,
        timeline::ManualClock,
    };

    type TestSession = Session<ManualFrameHost, SoftwareOutput>;

    fn session(requires_gesture: bool) -> (ManualClock, TestSession) {
        let clock = ManualClock::new();
        let shared: SharedClock = Rc::new(clock.clone());
        let output = SoftwareOutput::new(shared.clone(), 8_000, requires_gesture);
        let session =
            Session::new(&AppConfig::default(), ManualFrameHost::new(), output, shared).unwrap();
        (clock, session)
    }

    fn pump(session: &mut TestSession, surface: &mut RecordingSurface) -> Vec<FrameTick> {
        let tokens = session.frames_mut().host_mut().take_ready();
        tokens
            .into_iter()
            .filter_map(|token| session.on_animation_frame(token, surface).unwrap())
            .collect()
    }

    #[test]
    fn first_frame_is_scheduled_on_start() {
        let (_, mut session) = session(false);
        assert_eq!(session.frames().state(), FrameState::Scheduled);

        let mut surface = RecordingSurface::new();
        let ticks = pump(&mut session, &mut surface);
        assert_eq!(ticks.len(), 1);
        assert!(ticks[0].stats.last_full_repaint);
        assert_eq!(ticks[0].stats.cells_drawn_last_frame, 80 * 30);
    }

    #[test]
    fn key_presses_resume_audio_once_allowed() {
        let (_, mut session) = session(true);
        session.key(KeyEvent::new("a")).unwrap();
        assert_eq!(session.audio().state(), AudioDeviceState::Suspended);

        session.audio_mut().output_mut().notify_user_gesture();
        session.key(KeyEvent::new("b")).unwrap();
        assert_eq!(session.audio().state(), AudioDeviceState::Running);
        assert_eq!(session.input().total(), 2);
        assert_eq!(session.debug().last_key().unwrap().key, "b");
    }

    #[test]
    fn cues_fail_until_the_device_runs() {
        let (_, mut session) = session(false);
        assert!(matches!(
            session.cue(Cue::Click),
            Err(TermToneError::DeviceSuspended)
        ));
        session.key(KeyEvent::new("Enter")).unwrap();
        assert!(matches!(session.cue(Cue::Click).unwrap(), CueOutcome::Played(_)));
    }

    #[test]
    fn painted_frames_advance_logic_ticks() {
        let (clock, mut session) = session(false);
        let mut surface = RecordingSurface::new();
        pump(&mut session, &mut surface);

        clock.advance(0.11);
        session.request_frame();
        let ticks = pump(&mut session, &mut surface);
        assert_eq!(ticks[0].logic_ticks, 3);

        clock.advance(10.0);
        session.request_frame();
        let ticks = pump(&mut session, &mut surface);
        assert_eq!(ticks[0].logic_ticks, 5);
    }

    #[test]
    fn resize_requests_a_full_repaint() {
        let (_, mut session) = session(false);
        let mut surface = RecordingSurface::new();
        pump(&mut session, &mut surface);

        session.resize(400, 200, 1.0);
        let ticks = pump(&mut session, &mut surface);
        assert!(ticks[0].stats.last_full_repaint);
        assert_eq!(ticks[0].stats.cells_drawn_last_frame, 40 * 10);
        assert_eq!(session.debug().terminal_size().cols, 40);
    }

    #[test]
    fn shutdown_releases_frame_and_device() {
        let (_, mut session) = session(false);
        session.shutdown().unwrap();
        assert_eq!(session.frames().host().registrations(), 0);
        assert_eq!(session.audio().state(), AudioDeviceState::Closed);
        session.key(KeyEvent::new("x")).unwrap();
    }
}
