use serde::{Deserialize, Serialize};

const MAX_AUDIO_EVENTS: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::Triangle,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sine" => Some(Self::Sine),
            "square" => Some(Self::Square),
            "sawtooth" | "saw" => Some(Self::Sawtooth),
            "triangle" => Some(Self::Triangle),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bandpass {
    pub freq: f64,
    pub q: f64,
}

/// One synthesis instruction for the host renderer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SynthAction {
    Tone {
        freq: f64,
        duration_s: f64,
        wave: Waveform,
        volume: f64,
    },
    Sweep {
        from: f64,
        to: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        peak: Option<f64>,
        duration_s: f64,
        wave: Waveform,
        volume: f64,
    },
    Noise {
        duration_s: f64,
        volume: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        bandpass: Option<Bandpass>,
    },
    Modulated {
        carrier: f64,
        lfo_hz: f64,
        depth: f64,
        duration_s: f64,
        volume: f64,
    },
    DroneStart {
        voice: u64,
        freqs: Vec<f64>,
        wave: Waveform,
        volume: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        lfo_hz: Option<f64>,
    },
    DroneStop {
        voice: u64,
    },
    Speak {
        text: String,
        rate: f64,
        pitch: f64,
    },
    SpeechCancel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SynthEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: SynthAction,
}

/// Bounded log of synthesis events a host drains and renders.
#[derive(Default)]
pub struct AudioLog {
    recent: Vec<SynthEvent>,
    total: u64,
}

impl AudioLog {
    pub fn push(&mut self, at_ms: u64, action: SynthAction) {
        self.total = self.total.saturating_add(1);
        self.push_event(SynthEvent { at_ms, action });
    }

    fn push_event(&mut self, event: SynthEvent) {
        self.recent.push(event);
        if self.recent.len() > MAX_AUDIO_EVENTS {
            let excess = self.recent.len() - MAX_AUDIO_EVENTS;
            self.recent.drain(0..excess);
        }
    }

    pub fn recent(&self) -> &[SynthEvent] {
        &self.recent
    }

    pub fn drain(&mut self) -> Vec<SynthEvent> {
        std::mem::take(&mut self.recent)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded_but_counts_everything() {
        let mut log = AudioLog::default();
        for i in 0..(MAX_AUDIO_EVENTS + 10) {
            log.push(
                i as u64,
                SynthAction::Tone {
                    freq: 440.0,
                    duration_s: 0.5,
                    wave: Waveform::Sine,
                    volume: 0.15,
                },
            );
        }
        assert_eq!(log.recent().len(), MAX_AUDIO_EVENTS);
        assert_eq!(log.total(), (MAX_AUDIO_EVENTS + 10) as u64);
        assert_eq!(log.recent()[0].at_ms, 10);
        assert_eq!(log.drain().len(), MAX_AUDIO_EVENTS);
        assert!(log.recent().is_empty());
    }

    #[test]
    fn waveform_names() {
        assert_eq!(Waveform::parse("SAWTOOTH"), Some(Waveform::Sawtooth));
        assert_eq!(Waveform::parse("triangle"), Some(Waveform::Triangle));
        assert_eq!(Waveform::parse("pink"), None);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SynthEvent {
            at_ms: 5,
            action: SynthAction::DroneStop { voice: 3 },
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "drone_stop");
        assert_eq!(json["voice"], 3);
        assert_eq!(json["at_ms"], 5);
    }
}
