use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioDeviceState, AudioOutput, AudioParam, NodeId, Waveform},
    timeline::SharedClock,
    Result, TermToneError,
};

/// Every call an [`AudioOutput`] receives, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceCall {
    Resume,
    Close,
    CreateOscillator(NodeId),
    CreateGain(NodeId),
    SetValue {
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    },
    LinearRamp {
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    },
    Connect {
        from: NodeId,
        to: NodeId,
    },
    ConnectDestination(NodeId),
    Start {
        node: NodeId,
        when: f64,
    },
    Stop {
        node: NodeId,
        when: f64,
    },
    Release(NodeId),
}

#[derive(Debug, Clone, Copy)]
enum AutomationEvent {
    Set { value: f32, time: f64 },
    Ramp { value: f32, time: f64 },
}

#[derive(Debug, Clone)]
struct Automation {
    default: f32,
    events: Vec<AutomationEvent>,
}

impl Automation {
    fn new(default: f32) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    fn value_at(&self, time: f64) -> f32 {
        let (mut value, mut since) = (self.default, 0.0);
        for event in &self.events {
            match *event {
                AutomationEvent::Set { value: next, time: at } => {
                    if time < at {
                        return value;
                    }
                    value = next;
                    since = at;
                }
                AutomationEvent::Ramp { value: next, time: at } => {
                    if time < at {
                        if at <= since {
                            return value;
                        }
                        let progress = ((time - since) / (at - since)) as f32;
                        return value + (next - value) * progress.clamp(0.0, 1.0);
                    }
                    value = next;
                    since = at;
                }
            }
        }
        value
    }
}

#[derive(Debug, Clone)]
enum Node {
    Oscillator {
        waveform: Waveform,
        frequency: Automation,
        start: Option<f64>,
        stop: Option<f64>,
        output: Option<NodeId>,
    },
    Gain {
        gain: Automation,
        to_destination: bool,
    },
}

struct OscillatorSlots<'a> {
    start: &'a mut Option<f64>,
    stop: &'a mut Option<f64>,
    output: &'a mut Option<NodeId>,
}

/// Headless audio device.
///
/// Honours an autoplay policy (it refuses to run before
/// [`notify_user_gesture`](Self::notify_user_gesture) when constructed with
/// `requires_gesture`), records every call it receives and can synthesize the
/// scheduled graph into mono samples.
pub struct SoftwareOutput {
    clock: SharedClock,
    epoch: f64,
    sample_rate: u32,
    state: AudioDeviceState,
    requires_gesture: bool,
    gesture_seen: bool,
    next_node: u64,
    nodes: BTreeMap<NodeId, Node>,
    calls: Vec<DeviceCall>,
    call_limit: usize,
}

impl SoftwareOutput {
    /// Calls retained by default before the oldest half is discarded.
    pub const DEFAULT_CALL_LIMIT: usize = 16_384;

    pub fn new(clock: SharedClock, sample_rate: u32, requires_gesture: bool) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            sample_rate: sample_rate.max(1),
            state: AudioDeviceState::Suspended,
            requires_gesture,
            gesture_seen: false,
            next_node: 0,
            nodes: BTreeMap::new(),
            calls: Vec::new(),
            call_limit: Self::DEFAULT_CALL_LIMIT,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn notify_user_gesture(&mut self) {
        self.gesture_seen = true;
    }

    /// Caps the call log at `limit` entries (at least two).
    pub fn with_call_limit(mut self, limit: usize) -> Self {
        self.call_limit = limit.max(2);
        self.trim_calls();
        self
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Hands the recorded calls to the caller and starts a fresh log.
    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    fn log(&mut self, call: DeviceCall) {
        self.calls.push(call);
        self.trim_calls();
    }

    fn trim_calls(&mut self) {
        if self.calls.len() > self.call_limit {
            let excess = self.calls.len() - self.call_limit / 2;
            self.calls.drain(..excess);
        }
    }

    /// Nodes created and not yet released.
    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == AudioDeviceState::Closed {
            Err(TermToneError::DeviceClosed)
        } else {
            Ok(())
        }
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        self.next_node += 1;
        let id = NodeId(self.next_node);
        self.nodes.insert(id, node);
        id
    }

    fn automation(&mut self, node: NodeId, param: AudioParam) -> Result<&mut Automation> {
        match (self.nodes.get_mut(&node), param) {
            (Some(Node::Oscillator { frequency, .. }), AudioParam::Frequency) => Ok(frequency),
            (Some(Node::Gain { gain, .. }), AudioParam::Gain) => Ok(gain),
            (Some(_), _) => Err(TermToneError::msg(format!(
                "node {node:?} has no {param:?} parameter"
            ))),
            (None, _) => Err(TermToneError::msg(format!("unknown audio node {node:?}"))),
        }
    }

    fn oscillator(&mut self, node: NodeId) -> Result<OscillatorSlots<'_>> {
        match self.nodes.get_mut(&node) {
            Some(Node::Oscillator {
                start,
                stop,
                output,
                ..
            }) => Ok(OscillatorSlots {
                start,
                stop,
                output,
            }),
            _ => Err(TermToneError::msg(format!("{node:?} is not an oscillator"))),
        }
    }

    /// Synthesizes `count` mono samples starting at device time `start`.
    pub fn render(&self, start: f64, count: usize) -> Vec<f32> {
        let mut mix = vec![0.0_f32; count];
        let step = 1.0 / self.sample_rate as f64;

        for node in self.nodes.values() {
            let Node::Oscillator {
                waveform,
                frequency,
                start: Some(begin),
                stop,
                output: Some(target),
            } = node
            else {
                continue;
            };
            let Some(Node::Gain {
                gain,
                to_destination: true,
            }) = self.nodes.get(target)
            else {
                continue;
            };

            let end = stop.unwrap_or(f64::INFINITY);
            let mut phase = 0.0_f64;
            for (index, sample) in mix.iter_mut().enumerate() {
                let time = start + index as f64 * step;
                if time < *begin || time >= end {
                    continue;
                }
                *sample += waveform.sample(phase) * gain.value_at(time);
                phase += frequency.value_at(time) as f64 * step;
            }
        }
        mix
    }
}

impl AudioOutput for SoftwareOutput {
    fn state(&self) -> AudioDeviceState {
        self.state
    }

    fn resume(&mut self) -> Result<AudioDeviceState> {
        self.log(DeviceCall::Resume);
        self.ensure_open()?;
        if !self.requires_gesture || self.gesture_seen {
            self.state = AudioDeviceState::Running;
        }
        Ok(self.state)
    }

    fn close(&mut self) -> Result<()> {
        self.log(DeviceCall::Close);
        self.state = AudioDeviceState::Closed;
        self.nodes.clear();
        Ok(())
    }

    fn current_time(&self) -> f64 {
        (self.clock.now() - self.epoch).max(0.0)
    }

    fn create_oscillator(&mut self, waveform: &Waveform) -> Result<NodeId> {
        self.ensure_open()?;
        let id = self.allocate(Node::Oscillator {
            waveform: waveform.clone(),
            frequency: Automation::new(440.0),
            start: None,
            stop: None,
            output: None,
        });
        self.log(DeviceCall::CreateOscillator(id));
        Ok(id)
    }

    fn create_gain(&mut self) -> Result<NodeId> {
        self.ensure_open()?;
        let id = self.allocate(Node::Gain {
            gain: Automation::new(1.0),
            to_destination: false,
        });
        self.log(DeviceCall::CreateGain(id));
        Ok(id)
    }

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()> {
        self.log(DeviceCall::SetValue {
            node,
            param,
            value,
            time,
        });
        self.automation(node, param)?
            .events
            .push(AutomationEvent::Set { value, time });
        Ok(())
    }

    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()> {
        self.log(DeviceCall::LinearRamp {
            node,
            param,
            value,
            time,
        });
        self.automation(node, param)?
            .events
            .push(AutomationEvent::Ramp { value, time });
        Ok(())
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.log(DeviceCall::Connect { from, to });
        if !matches!(self.nodes.get(&to), Some(Node::Gain { .. })) {
            return Err(TermToneError::msg(format!("cannot connect into {to:?}")));
        }
        *self.oscillator(from)?.output = Some(to);
        Ok(())
    }

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()> {
        self.log(DeviceCall::ConnectDestination(node));
        match self.nodes.get_mut(&node) {
            Some(Node::Gain { to_destination, .. }) => {
                *to_destination = true;
                Ok(())
            }
            _ => Err(TermToneError::msg(format!(
                "{node:?} cannot feed the destination"
            ))),
        }
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<()> {
        self.log(DeviceCall::Start { node, when });
        *self.oscillator(node)?.start = Some(when);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<()> {
        self.log(DeviceCall::Stop { node, when });
        *self.oscillator(node)?.stop = Some(when);
        Ok(())
    }

    fn release(&mut self, node: NodeId) {
        self.log(DeviceCall::Release(node));
        self.nodes.remove(&node);
    }
}

impl std::fmt::Debug for SoftwareOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareOutput")
            .field("state", &self.state)
            .field("sample_rate", &self.sample_rate)
            .field("requires_gesture", &self.requires_gesture)
            .field("gesture_seen", &self.gesture_seen)
            .field("nodes", &self.nodes.len())
            .field("calls", &self.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::timeline::ManualClock;

    fn output(requires_gesture: bool) -> (ManualClock, SoftwareOutput) {
        let clock = ManualClock::new();
        let output = SoftwareOutput::new(Rc::new(clock.clone()), 1_000, requires_gesture);
        (clock, output)
    }

    #[test]
    fn autoplay_policy_holds_until_gesture() {
        let (_, mut output) = output(true);
        assert_eq!(output.resume().unwrap(), AudioDeviceState::Suspended);
        output.notify_user_gesture();
        assert_eq!(output.resume().unwrap(), AudioDeviceState::Running);
    }

    #[test]
    fn closed_device_refuses_new_nodes() {
        let (_, mut output) = output(false);
        output.close().unwrap();
        assert!(matches!(
            output.create_gain().unwrap_err(),
            TermToneError::DeviceClosed
        ));
        assert!(matches!(output.resume().unwrap_err(), TermToneError::DeviceClosed));
    }

    #[test]
    fn device_time_follows_the_shared_clock() {
        let clock = ManualClock::new();
        clock.set(3.0);
        let output = SoftwareOutput::new(Rc::new(clock.clone()), 1_000, false);
        assert_eq!(output.current_time(), 0.0);
        clock.advance(0.25);
        assert_eq!(output.current_time(), 0.25);
    }

    #[test]
    fn automation_interpolates_linear_ramps() {
        let mut automation = Automation::new(1.0);
        automation.events.push(AutomationEvent::Set { value: 0.0, time: 1.0 });
        automation.events.push(AutomationEvent::Ramp { value: 1.0, time: 2.0 });

        assert_eq!(automation.value_at(0.5), 1.0);
        assert_eq!(automation.value_at(1.0), 0.0);
        assert!((automation.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(automation.value_at(3.0), 1.0);
    }

    #[test]
    fn renders_only_connected_started_oscillators() {
        let (_, mut output) = output(false);
        output.resume().unwrap();

        let osc = output.create_oscillator(&Waveform::Square).unwrap();
        let gain = output.create_gain().unwrap();
        output.set_value_at_time(gain, AudioParam::Gain, 0.5, 0.0).unwrap();
        output.connect(osc, gain).unwrap();
        output.connect_to_destination(gain).unwrap();

        assert!(output.render(0.0, 10).iter().all(|s| *s == 0.0));

        output.start(osc, 0.0).unwrap();
        output.stop(osc, 0.005).unwrap();
        let samples = output.render(0.0, 10);
        assert_eq!(samples[0], 0.5);
        assert!(samples[6..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn call_log_stays_bounded() {
        let (_, output) = output(false);
        let mut output = output.with_call_limit(8);
        for _ in 0..50 {
            let gain = output.create_gain().unwrap();
            output.release(gain);
        }
        assert!(output.calls().len() <= 8);
        assert!(matches!(output.calls().last(), Some(DeviceCall::Release(_))));

        let taken = output.take_calls();
        assert!(!taken.is_empty());
        assert!(output.calls().is_empty());
    }

    #[test]
    fn release_frees_nodes() {
        let (_, mut output) = output(false);
        let osc = output.create_oscillator(&Waveform::Sine).unwrap();
        assert_eq!(output.live_nodes(), 1);
        output.release(osc);
        output.release(osc);
        assert_eq!(output.live_nodes(), 0);
    }
}
