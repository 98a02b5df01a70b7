use serde::{Deserialize, Serialize};

use crate::{audio::Waveform, Result};

/// Lifecycle of the single audio output handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioDeviceState {
    Suspended,
    Running,
    Closed,
}

/// Handle to a node created on the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioParam {
    Frequency,
    Gain,
}

/// Platform audio graph: oscillator and gain nodes whose parameters are
/// automated against the device's own clock.
pub trait AudioOutput {
    fn state(&self) -> AudioDeviceState;

    /// Requests that the device start running. The platform may leave it
    /// suspended until a user gesture; the returned state says which.
    fn resume(&mut self) -> Result<AudioDeviceState>;

    fn close(&mut self) -> Result<()>;

    /// Device time in seconds, derived from the shared clock.
    fn current_time(&self) -> f64;

    fn create_oscillator(&mut self, waveform: &Waveform) -> Result<NodeId>;

    fn create_gain(&mut self) -> Result<NodeId>;

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()>;

    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()>;

    fn start(&mut self, node: NodeId, when: f64) -> Result<()>;

    fn stop(&mut self, node: NodeId, when: f64) -> Result<()>;

    /// Frees a node. Never fails; unknown ids are ignored.
    fn release(&mut self, node: NodeId);
}

/// Lets an engine drive a device the caller keeps ownership of.
impl<O: AudioOutput + ?Sized> AudioOutput for &mut O {
    fn state(&self) -> AudioDeviceState {
        (**self).state()
    }

    fn resume(&mut self) -> Result<AudioDeviceState> {
        (**self).resume()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn create_oscillator(&mut self, waveform: &Waveform) -> Result<NodeId> {
        (**self).create_oscillator(waveform)
    }

    fn create_gain(&mut self) -> Result<NodeId> {
        (**self).create_gain()
    }

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()> {
        (**self).set_value_at_time(node, param, value, time)
    }

    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: AudioParam,
        value: f32,
        time: f64,
    ) -> Result<()> {
        (**self).linear_ramp_to_value_at_time(node, param, value, time)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        (**self).connect(from, to)
    }

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()> {
        (**self).connect_to_destination(node)
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<()> {
        (**self).start(node, when)
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<()> {
        (**self).stop(node, when)
    }

    fn release(&mut self, node: NodeId) {
        (**self).release(node)
    }
}
