mod cues;
mod envelope;
mod output;
mod software;

pub use cues::{Cue, CUE_PEAK};
pub use envelope::{
    HarmonicTable, RampTarget, ToneEnvelope, Waveform, ATTACK_SECONDS, RELEASE_SECONDS,
};
pub use output::{AudioDeviceState, AudioOutput, AudioParam, NodeId};
pub use software::{DeviceCall, SoftwareOutput};

use serde::{Deserialize, Serialize};

use crate::{config::AudioConfig, Result, TermToneError};

/// Caller-chosen limits on how many tones may sound at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VoicePolicy {
    /// Upper bound on simultaneously sounding voices. `None` means unbounded.
    pub max_voices: Option<usize>,
    /// Minimum spacing in seconds between two cues.
    pub min_gap: Option<f64>,
}

impl VoicePolicy {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

impl From<&AudioConfig> for VoicePolicy {
    fn from(config: &AudioConfig) -> Self {
        Self {
            max_voices: config.max_voices,
            min_gap: config.min_gap_ms.map(|ms| ms as f64 / 1000.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started(VoiceId),
    /// The voice cap was reached; nothing was sent to the device.
    Throttled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CueOutcome {
    Played(Vec<VoiceId>),
    /// Another cue played less than `min_gap` ago, or the voice limit left
    /// no room for any of its tones.
    Throttled,
    /// Volume is zero.
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioStatus {
    pub state: AudioDeviceState,
    pub active_voices: usize,
    pub volume: f32,
}

#[derive(Debug)]
struct Voice {
    id: VoiceId,
    oscillator: NodeId,
    gain: NodeId,
    stop_time: f64,
}

/// Nodes created for a voice that is still being wired up. Dropping the guard
/// releases them, so a failure half way through leaks nothing.
struct NodeGuard<'a, O: AudioOutput> {
    output: &'a mut O,
    nodes: Vec<NodeId>,
}

impl<'a, O: AudioOutput> NodeGuard<'a, O> {
    fn new(output: &'a mut O) -> Self {
        Self {
            output,
            nodes: Vec::with_capacity(2),
        }
    }

    fn track(&mut self, node: Result<NodeId>) -> Result<NodeId> {
        let node = node?;
        self.nodes.push(node);
        Ok(node)
    }

    fn commit(mut self) {
        self.nodes.clear();
    }
}

impl<O: AudioOutput> Drop for NodeGuard<'_, O> {
    fn drop(&mut self) {
        for node in self.nodes.drain(..) {
            self.output.release(node);
        }
    }
}

/// Procedural tone engine over a single audio output.
///
/// The device starts out suspended. `resume` must succeed (typically after a
/// user gesture) before tones can play; `close` is terminal.
pub struct AudioEngine<O: AudioOutput> {
    output: O,
    state: AudioDeviceState,
    policy: VoicePolicy,
    volume: f32,
    voices: Vec<Voice>,
    next_voice: u64,
    last_cue_at: Option<f64>,
}

impl<O: AudioOutput> AudioEngine<O> {
    pub fn new(output: O, policy: VoicePolicy) -> Self {
        let state = output.state();
        Self {
            output,
            state,
            policy,
            volume: 1.0,
            voices: Vec::new(),
            next_voice: 0,
            last_cue_at: None,
        }
    }

    /// Builds an engine using the configured policy and volume.
    pub fn from_config(output: O, config: &AudioConfig) -> Self {
        let mut engine = Self::new(output, VoicePolicy::from(config));
        engine.set_volume(config.volume);
        engine
    }

    pub fn state(&self) -> AudioDeviceState {
        self.state
    }

    pub fn policy(&self) -> VoicePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: VoicePolicy) {
        self.policy = policy;
    }

    /// Effective gain multiplier applied to cues.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Maps a linear slider position onto a cubic curve so the quiet end of
    /// the range stays usable.
    pub fn set_volume(&mut self, slider: f32) {
        let slider = if slider.is_finite() { slider } else { 0.0 };
        self.volume = slider.clamp(0.0, 1.0).powi(3);
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn status(&self) -> AudioStatus {
        AudioStatus {
            state: self.state,
            active_voices: self.voices.len(),
            volume: self.volume,
        }
    }

    /// Moves a suspended device to running. A no-op when already running.
    /// Fails with [`TermToneError::DeviceSuspended`] when the platform still
    /// holds the device, so the caller can retry after the next user gesture.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            AudioDeviceState::Running => Ok(()),
            AudioDeviceState::Closed => Err(TermToneError::DeviceClosed),
            AudioDeviceState::Suspended => match self.output.resume()? {
                AudioDeviceState::Running => {
                    self.state = AudioDeviceState::Running;
                    tracing::info!("audio device running");
                    Ok(())
                }
                AudioDeviceState::Suspended => {
                    tracing::warn!("audio device refused to resume; waiting for a user gesture");
                    Err(TermToneError::DeviceSuspended)
                }
                AudioDeviceState::Closed => {
                    self.state = AudioDeviceState::Closed;
                    Err(TermToneError::DeviceClosed)
                }
            },
        }
    }

    /// Releases every voice and closes the device. Closing twice is harmless.
    pub fn close(&mut self) -> Result<()> {
        if self.state == AudioDeviceState::Closed {
            return Ok(());
        }
        for voice in self.voices.drain(..) {
            self.output.release(voice.oscillator);
            self.output.release(voice.gain);
        }
        self.state = AudioDeviceState::Closed;
        tracing::info!("audio device closed");
        self.output.close()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            AudioDeviceState::Running => Ok(()),
            AudioDeviceState::Suspended => Err(TermToneError::DeviceSuspended),
            AudioDeviceState::Closed => Err(TermToneError::DeviceClosed),
        }
    }

    /// Schedules one tone. The envelope is validated before the device is
    /// touched; every ramp is placed at its absolute time and the source stops
    /// itself at the envelope's end.
    pub fn play_tone(&mut self, envelope: &ToneEnvelope) -> Result<PlayOutcome> {
        envelope.validate()?;
        self.ensure_running()?;

        self.collect_finished();
        if let Some(max) = self.policy.max_voices {
            if self.voices.len() >= max {
                tracing::debug!(max, "voice limit reached");
                return Ok(PlayOutcome::Throttled);
            }
        }

        let stop_time = envelope.end_time();
        let mut guard = NodeGuard::new(&mut self.output);
        let created = guard.output.create_oscillator(&envelope.waveform);
        let oscillator = guard.track(created)?;
        let created = guard.output.create_gain();
        let gain = guard.track(created)?;

        guard.output.set_value_at_time(
            oscillator,
            AudioParam::Frequency,
            envelope.frequency,
            envelope.start_time,
        )?;
        for ramp in &envelope.frequency_ramps {
            guard.output.linear_ramp_to_value_at_time(
                oscillator,
                AudioParam::Frequency,
                ramp.value,
                ramp.time,
            )?;
        }

        let (first, rest) = envelope
            .gain_ramps
            .split_first()
            .ok_or_else(|| TermToneError::envelope("gain envelope has no targets"))?;
        guard
            .output
            .set_value_at_time(gain, AudioParam::Gain, first.value, first.time)?;
        for ramp in rest {
            guard
                .output
                .linear_ramp_to_value_at_time(gain, AudioParam::Gain, ramp.value, ramp.time)?;
        }

        guard.output.connect(oscillator, gain)?;
        guard.output.connect_to_destination(gain)?;
        guard.output.start(oscillator, envelope.start_time)?;
        guard.output.stop(oscillator, stop_time)?;
        guard.commit();

        self.next_voice += 1;
        let id = VoiceId(self.next_voice);
        self.voices.push(Voice {
            id,
            oscillator,
            gain,
            stop_time,
        });
        tracing::trace!(?id, frequency = envelope.frequency, stop_time, "tone scheduled");
        Ok(PlayOutcome::Started(id))
    }

    /// Plays a preset cue starting at the device's current time, scaled by
    /// the master volume.
    pub fn play_cue(&mut self, cue: Cue) -> Result<CueOutcome> {
        self.ensure_running()?;
        if self.volume <= 0.0 {
            return Ok(CueOutcome::Muted);
        }

        let now = self.output.current_time();
        if let (Some(gap), Some(last)) = (self.policy.min_gap, self.last_cue_at) {
            if now - last < gap {
                tracing::trace!(%cue, "cue throttled");
                return Ok(CueOutcome::Throttled);
            }
        }

        let envelopes = cue.envelopes(now, CUE_PEAK * self.volume);
        for envelope in &envelopes {
            envelope.validate()?;
        }

        let mut started = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            if let PlayOutcome::Started(id) = self.play_tone(envelope)? {
                started.push(id);
            }
        }
        if started.is_empty() {
            tracing::trace!(%cue, "cue blocked by the voice limit");
            return Ok(CueOutcome::Throttled);
        }

        self.last_cue_at = Some(now);
        tracing::debug!(%cue, voices = started.len(), "cue played");
        Ok(CueOutcome::Played(started))
    }

    /// Releases the nodes of voices whose stop time has passed.
    pub fn collect_finished(&mut self) -> usize {
        let now = self.output.current_time();
        let before = self.voices.len();
        let output = &mut self.output;
        self.voices.retain(|voice| {
            if voice.stop_time <= now {
                output.release(voice.oscillator);
                output.release(voice.gain);
                tracing::trace!(id = ?voice.id, "voice finished");
                false
            } else {
                true
            }
        });
        before - self.voices.len()
    }
}

impl<O: AudioOutput> Drop for AudioEngine<O> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "failed to close audio device");
        }
    }
}

impl<O: AudioOutput + std::fmt::Debug> std::fmt::Debug for AudioEngine<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("output", &self.output)
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("volume", &self.volume)
            .field("voices", &self.voices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::timeline::ManualClock;

    fn engine(policy: VoicePolicy) -> (ManualClock, AudioEngine<SoftwareOutput>) {
        let clock = ManualClock::new();
        let output = SoftwareOutput::new(Rc::new(clock.clone()), 8_000, false);
        (clock, AudioEngine::new(output, policy))
    }

    fn running(policy: VoicePolicy) -> (ManualClock, AudioEngine<SoftwareOutput>) {
        let (clock, mut engine) = engine(policy);
        engine.resume().unwrap();
        (clock, engine)
    }

    #[test]
    fn starts_suspended_and_resumes() {
        let (_, mut engine) = engine(VoicePolicy::unlimited());
        assert_eq!(engine.state(), AudioDeviceState::Suspended);
        engine.resume().unwrap();
        assert_eq!(engine.state(), AudioDeviceState::Running);
    }

    #[test]
    fn resume_while_running_is_a_no_op() {
        let (_, mut engine) = running(VoicePolicy::unlimited());
        let calls = engine.output().calls().len();
        engine.resume().unwrap();
        assert_eq!(engine.output().calls().len(), calls);
    }

    #[test]
    fn resume_after_close_fails() {
        let (_, mut engine) = running(VoicePolicy::unlimited());
        engine.close().unwrap();
        assert!(matches!(engine.resume(), Err(TermToneError::DeviceClosed)));
        assert!(matches!(engine.resume(), Err(TermToneError::DeviceClosed)));
    }

    #[test]
    fn refused_resume_surfaces_suspended() {
        let clock = ManualClock::new();
        let output = SoftwareOutput::new(Rc::new(clock), 8_000, true);
        let mut engine = AudioEngine::new(output, VoicePolicy::unlimited());

        assert!(matches!(engine.resume(), Err(TermToneError::DeviceSuspended)));
        assert_eq!(engine.state(), AudioDeviceState::Suspended);

        engine.output_mut().notify_user_gesture();
        engine.resume().unwrap();
        assert_eq!(engine.state(), AudioDeviceState::Running);
    }

    #[test]
    fn tones_need_a_running_device() {
        let (_, mut engine) = engine(VoicePolicy::unlimited());
        let note = ToneEnvelope::note(440.0, 0.0, 0.1, 0.3);
        assert!(matches!(
            engine.play_tone(&note),
            Err(TermToneError::DeviceSuspended)
        ));
        engine.resume().unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.play_tone(&note), Err(TermToneError::DeviceClosed)));
    }

    #[test]
    fn invalid_envelope_never_reaches_the_device() {
        let (_, mut engine) = running(VoicePolicy::unlimited());
        let calls = engine.output().calls().len();
        let t = 1.0;
        let envelope = ToneEnvelope {
            waveform: Waveform::Sine,
            frequency: 440.0,
            start_time: 0.0,
            gain_ramps: vec![
                RampTarget::new(0.0, 0.0),
                RampTarget::new(1.0, t),
                RampTarget::new(0.8, t - 1.0),
            ],
            frequency_ramps: Vec::new(),
        };

        assert!(matches!(
            engine.play_tone(&envelope),
            Err(TermToneError::InvalidEnvelope(_))
        ));
        assert_eq!(engine.output().calls().len(), calls);
    }

    #[test]
    fn play_tone_schedules_absolute_ramps_and_stop() {
        let (clock, mut engine) = running(VoicePolicy::unlimited());
        clock.set(2.0);
        let start = engine.current_time();
        let note = ToneEnvelope::note(440.0, start, 0.1, 0.3);
        let PlayOutcome::Started(_) = engine.play_tone(&note).unwrap() else {
            panic!("tone should start");
        };

        let calls = engine.output().calls();
        let stop = calls
            .iter()
            .find_map(|call| match call {
                DeviceCall::Stop { when, .. } => Some(*when),
                _ => None,
            })
            .unwrap();
        assert!((stop - (start + 0.1)).abs() < 1e-9);

        let gain_times: Vec<f64> = calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::SetValue {
                    param: AudioParam::Gain,
                    time,
                    ..
                }
                | DeviceCall::LinearRamp {
                    param: AudioParam::Gain,
                    time,
                    ..
                } => Some(*time),
                _ => None,
            })
            .collect();
        let expected: Vec<f64> = note.gain_ramps.iter().map(|ramp| ramp.time).collect();
        assert_eq!(gain_times, expected);
    }

    #[test]
    fn finished_voices_release_their_nodes() {
        let (clock, mut engine) = running(VoicePolicy::unlimited());
        engine
            .play_tone(&ToneEnvelope::note(440.0, 0.0, 0.1, 0.3))
            .unwrap();
        engine
            .play_tone(&ToneEnvelope::note(660.0, 0.0, 0.5, 0.3))
            .unwrap();
        assert_eq!(engine.active_voices(), 2);
        assert_eq!(engine.output().live_nodes(), 4);

        clock.advance(0.2);
        assert_eq!(engine.collect_finished(), 1);
        assert_eq!(engine.output().live_nodes(), 2);

        engine.close().unwrap();
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn voice_cap_throttles_without_device_calls() {
        let (_, mut engine) = running(VoicePolicy {
            max_voices: Some(1),
            min_gap: None,
        });
        let note = ToneEnvelope::note(440.0, 0.0, 1.0, 0.3);
        assert!(matches!(engine.play_tone(&note).unwrap(), PlayOutcome::Started(_)));

        let calls = engine.output().calls().len();
        assert_eq!(engine.play_tone(&note).unwrap(), PlayOutcome::Throttled);
        assert_eq!(engine.output().calls().len(), calls);
    }

    #[test]
    fn concurrent_tones_are_independent_without_a_cap() {
        let (_, mut engine) = running(VoicePolicy::unlimited());
        for step in 0..16 {
            let note = ToneEnvelope::note(200.0 + step as f32 * 50.0, 0.0, 1.0, 0.05);
            engine.play_tone(&note).unwrap();
        }
        assert_eq!(engine.active_voices(), 16);
    }

    #[test]
    fn cues_respect_min_gap() {
        let (clock, mut engine) = running(VoicePolicy {
            max_voices: None,
            min_gap: Some(0.06),
        });
        assert!(matches!(
            engine.play_cue(Cue::Click).unwrap(),
            CueOutcome::Played(_)
        ));
        clock.advance(0.03);
        assert_eq!(engine.play_cue(Cue::Click).unwrap(), CueOutcome::Throttled);
        clock.advance(0.05);
        assert!(matches!(
            engine.play_cue(Cue::Click).unwrap(),
            CueOutcome::Played(_)
        ));
    }

    #[test]
    fn cue_blocked_by_voice_limit_does_not_start_the_gap() {
        let (clock, mut engine) = running(VoicePolicy {
            max_voices: Some(1),
            min_gap: Some(0.06),
        });
        engine
            .play_tone(&ToneEnvelope::note(440.0, 0.0, 0.02, 0.3))
            .unwrap();

        assert_eq!(engine.play_cue(Cue::Click).unwrap(), CueOutcome::Throttled);

        clock.advance(0.03);
        assert!(matches!(
            engine.play_cue(Cue::Click).unwrap(),
            CueOutcome::Played(voices) if !voices.is_empty()
        ));
    }

    #[test]
    fn muted_engine_skips_cues() {
        let (_, mut engine) = running(VoicePolicy::unlimited());
        engine.set_volume(0.0);
        assert_eq!(engine.play_cue(Cue::Error).unwrap(), CueOutcome::Muted);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn volume_follows_a_cubic_curve() {
        let (_, mut engine) = engine(VoicePolicy::unlimited());
        engine.set_volume(0.5);
        assert!((engine.volume() - 0.125).abs() < 1e-6);
        engine.set_volume(4.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(f32::NAN);
        assert_eq!(engine.volume(), 0.0);
    }

    #[test]
    fn close_releases_sounding_voices() {
        let clock = ManualClock::new();
        let output = SoftwareOutput::new(Rc::new(clock), 8_000, false);
        let mut engine = AudioEngine::new(output, VoicePolicy::unlimited());
        engine.resume().unwrap();
        engine
            .play_tone(&ToneEnvelope::note(440.0, 0.0, 1.0, 0.3))
            .unwrap();
        engine.close().unwrap();
        assert_eq!(engine.output().live_nodes(), 0);
        assert_eq!(engine.output().calls().last(), Some(&DeviceCall::Close));
    }

    #[test]
    fn dropping_the_engine_releases_sounding_voices() {
        let clock = ManualClock::new();
        let mut output = SoftwareOutput::new(Rc::new(clock), 8_000, false);
        {
            let mut engine = AudioEngine::new(&mut output, VoicePolicy::unlimited());
            engine.resume().unwrap();
            engine
                .play_tone(&ToneEnvelope::note(440.0, 0.0, 1.0, 0.3))
                .unwrap();
            engine
                .play_tone(&ToneEnvelope::note(660.0, 0.0, 1.0, 0.3))
                .unwrap();
            assert_eq!(engine.output().live_nodes(), 4);
        }

        let released = output
            .calls()
            .iter()
            .filter(|call| matches!(call, DeviceCall::Release(_)))
            .count();
        assert_eq!(released, 4);
        assert_eq!(output.live_nodes(), 0);
        assert_eq!(output.state(), AudioDeviceState::Closed);
        assert_eq!(output.calls().last(), Some(&DeviceCall::Close));
    }
}
