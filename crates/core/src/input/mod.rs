use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Key press as delivered by the host. Only recorded, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            alt: false,
            ctrl: false,
            shift: false,
        }
    }

    pub fn with_modifiers(mut self, alt: bool, ctrl: bool, shift: bool) -> Self {
        self.alt = alt;
        self.ctrl = ctrl;
        self.shift = shift;
        self
    }
}

/// Bounded history of the most recent key events.
#[derive(Debug, Clone)]
pub struct InputLog {
    capacity: usize,
    events: VecDeque<KeyEvent>,
    total: u64,
}

impl InputLog {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            total: 0,
        }
    }

    pub fn record(&mut self, event: KeyEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.total += 1;
    }

    pub fn last(&self) -> Option<&KeyEvent> {
        self.events.back()
    }

    /// Retained events, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &KeyEvent> + '_ {
        self.events.iter()
    }

    /// Events recorded since creation, including those already evicted.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for InputLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
