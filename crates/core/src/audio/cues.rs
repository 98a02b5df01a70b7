use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{audio::ToneEnvelope, TermToneError};

/// Base amplitude of a cue before the master volume is applied.
pub const CUE_PEAK: f32 = 0.3;

/// Named feedback sounds for interface events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cue {
    Click,
    TabSwitch,
    MenuOpen,
    MenuClose,
    Error,
    Rise,
    Collect,
    LevelUp,
    Purchase,
    Sell,
    Fanfare,
}

/// `(frequency in Hz, duration in milliseconds)` played back to back.
type Notes = &'static [(f32, f64)];

enum Pattern {
    Notes(Notes),
    Sweep { from: f32, to: f32, millis: f64 },
    /// Simultaneous note sequences; the peak is shared between layers.
    Layers(&'static [Notes]),
}

impl Cue {
    pub const ALL: [Cue; 11] = [
        Cue::Click,
        Cue::TabSwitch,
        Cue::MenuOpen,
        Cue::MenuClose,
        Cue::Error,
        Cue::Rise,
        Cue::Collect,
        Cue::LevelUp,
        Cue::Purchase,
        Cue::Sell,
        Cue::Fanfare,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Cue::Click => "click",
            Cue::TabSwitch => "tab-switch",
            Cue::MenuOpen => "menu-open",
            Cue::MenuClose => "menu-close",
            Cue::Error => "error",
            Cue::Rise => "rise",
            Cue::Collect => "collect",
            Cue::LevelUp => "level-up",
            Cue::Purchase => "purchase",
            Cue::Sell => "sell",
            Cue::Fanfare => "fanfare",
        }
    }

    fn pattern(self) -> Pattern {
        match self {
            Cue::Click => Pattern::Notes(&[(1200.0, 25.0)]),
            Cue::TabSwitch => Pattern::Sweep {
                from: 600.0,
                to: 800.0,
                millis: 60.0,
            },
            Cue::MenuOpen => Pattern::Notes(&[(400.0, 50.0), (600.0, 50.0)]),
            Cue::MenuClose => Pattern::Notes(&[(600.0, 50.0), (400.0, 50.0)]),
            Cue::Error => Pattern::Notes(&[(200.0, 80.0)]),
            Cue::Rise => Pattern::Sweep {
                from: 300.0,
                to: 500.0,
                millis: 150.0,
            },
            Cue::Collect => Pattern::Sweep {
                from: 800.0,
                to: 1200.0,
                millis: 50.0,
            },
            // C5 D5 E5 F5 G5
            Cue::LevelUp => Pattern::Notes(&[
                (523.0, 60.0),
                (587.0, 60.0),
                (659.0, 60.0),
                (698.0, 60.0),
                (784.0, 120.0),
            ]),
            Cue::Purchase => Pattern::Notes(&[(1500.0, 30.0), (2000.0, 50.0)]),
            Cue::Sell => Pattern::Sweep {
                from: 1000.0,
                to: 600.0,
                millis: 80.0,
            },
            // Soft C/E pad under a high arpeggio.
            Cue::Fanfare => Pattern::Layers(&[
                &[(523.0, 300.0)],
                &[(659.0, 300.0)],
                &[(1047.0, 60.0), (1319.0, 60.0), (1568.0, 60.0), (2093.0, 200.0)],
            ]),
        }
    }

    /// Expands the cue into envelopes starting at device time `start`.
    pub fn envelopes(self, start: f64, peak: f32) -> Vec<ToneEnvelope> {
        match self.pattern() {
            Pattern::Notes(notes) => sequence(notes, start, peak),
            Pattern::Sweep { from, to, millis } => {
                vec![ToneEnvelope::sweep(from, to, start, millis / 1000.0, peak)]
            }
            Pattern::Layers(layers) => {
                let layer_peak = peak / layers.len() as f32;
                layers
                    .iter()
                    .flat_map(|notes| sequence(notes, start, layer_peak))
                    .collect()
            }
        }
    }
}

fn sequence(notes: Notes, start: f64, peak: f32) -> Vec<ToneEnvelope> {
    let mut at = start;
    notes
        .iter()
        .map(|&(frequency, millis)| {
            let duration = millis / 1000.0;
            let envelope = ToneEnvelope::note(frequency, at, duration, peak);
            at += duration;
            envelope
        })
        .collect()
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Cue {
    type Err = TermToneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cue::ALL
            .into_iter()
            .find(|cue| cue.name() == s)
            .ok_or_else(|| TermToneError::msg(format!("unknown cue `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cue_expands_to_valid_envelopes() {
        for cue in Cue::ALL {
            let envelopes = cue.envelopes(0.25, CUE_PEAK);
            assert!(!envelopes.is_empty(), "{cue}");
            for envelope in &envelopes {
                envelope.validate().unwrap();
                assert!(envelope.start_time >= 0.25);
            }
        }
    }

    #[test]
    fn note_sequences_play_back_to_back() {
        let envelopes = Cue::MenuOpen.envelopes(1.0, CUE_PEAK);
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].frequency, 400.0);
        assert!((envelopes[1].start_time - envelopes[0].end_time()).abs() < 1e-9);
    }

    #[test]
    fn layers_share_the_peak() {
        let envelopes = Cue::Fanfare.envelopes(0.0, 0.3);
        assert_eq!(envelopes.len(), 6);
        let loudest = envelopes
            .iter()
            .flat_map(|envelope| envelope.gain_ramps.iter())
            .map(|ramp| ramp.value)
            .fold(0.0_f32, f32::max);
        assert!((loudest - 0.1).abs() < 1e-6);
        // All layers start together.
        assert_eq!(envelopes[0].start_time, envelopes[1].start_time);
    }

    #[test]
    fn names_parse_back() {
        for cue in Cue::ALL {
            assert_eq!(cue.name().parse::<Cue>().unwrap(), cue);
        }
        assert!("kazoo".parse::<Cue>().is_err());
    }
}
