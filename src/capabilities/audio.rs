//! Sound capabilities. One-shot sounds go straight to the audio log; patterns
//! are scheduled as task groups and sustained voices live in the drone
//! registry.

use rhai::{Dynamic, Map};

use super::{CapabilityEntry, Category, EffectStep, Invocation};
use crate::audio::{Bandpass, SynthAction, Waveform};
use crate::engine::handles::StopTarget;
use crate::engine::{to_number, to_text, Args, VoiceHandle};
use crate::registry::DroneVoice;
use crate::state::SandboxState;

pub const MIN_FREQ: f64 = 20.0;
pub const MAX_FREQ: f64 = 20_000.0;
pub const MAX_TONE_SECONDS: f64 = 10.0;
pub const MAX_VOLUME: f64 = 0.3;
const TONE_VOLUME: f64 = 0.15;
/// Notes a single pattern may schedule.
const MAX_PATTERN_NOTES: usize = 512;
const MAX_SPEECH_CHARS: usize = 500;
const DEEP_DRONE_CENTS: [f64; 5] = [-7.0, -3.0, 0.0, 3.0, 7.0];

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("tone", Category::Audio, "tone(f, dur_s?, wave?)", tone),
    CapabilityEntry::new("sound", Category::Audio, "", tone),
    CapabilityEntry::new("chord", Category::Audio, "chord([f], dur?, wave?)", chord),
    CapabilityEntry::new("noise", Category::Audio, "noise(dur?, vol?)", noise),
    CapabilityEntry::new("drone", Category::Audio, "drone(f, wave?, vol?) -> voice", drone),
    CapabilityEntry::new(
        "deepDrone",
        Category::Audio,
        "deepDrone(f, dur?, vol?) -> voice",
        deep_drone,
    ),
    CapabilityEntry::new(
        "binaural",
        Category::Audio,
        "binaural(f, beat?, dur?, vol?) -> voice",
        binaural,
    ),
    CapabilityEntry::new("sweep", Category::Audio, "sweep(f1, f2, dur?, wave?)", sweep),
    CapabilityEntry::new("breath", Category::Audio, "breath(dur?, freq?, q?)", breath),
    CapabilityEntry::new(
        "pulse",
        Category::Audio,
        "pulse(f, bpm?, dur?, wave?) -> voice",
        pulse,
    ),
    CapabilityEntry::new("dissonance", Category::Audio, "dissonance(f, dur?, vol?)", dissonance),
    CapabilityEntry::new("stab", Category::Audio, "stab(f, vol?)", stab),
    CapabilityEntry::new("scream", Category::Audio, "scream(dur?, vol?)", scream),
    CapabilityEntry::new("siren", Category::Audio, "siren(dur?, speed?, vol?)", siren),
    CapabilityEntry::new("rumble", Category::Audio, "rumble(dur?, vol?)", rumble),
    CapabilityEntry::new("speak", Category::Audio, "speak(text, rate?, pitch?)", speak),
    CapabilityEntry::new(
        "arp",
        Category::Audio,
        "arp([f], speed_ms?, dur_s?, wave?) -> voice",
        arp,
    ),
    CapabilityEntry::new(
        "sequence",
        Category::Audio,
        "sequence([#{f, d, t}], bpm?, loops?) -> voice",
        sequence,
    ),
    CapabilityEntry::new(
        "melody",
        Category::Audio,
        "melody([f], tempo_ms?, wave?) -> voice",
        melody,
    ),
    CapabilityEntry::new(
        "chime",
        Category::Audio,
        "chime(f?, count?, spacing_ms?) -> voice",
        chime,
    ),
    CapabilityEntry::new("glitchMusic", Category::Audio, "glitchMusic(dur?) -> voice", glitch_music),
    CapabilityEntry::new("bell", Category::Audio, "bell(f?, dur?)", bell),
    CapabilityEntry::new("silence", Category::Audio, "silence()", silence),
    CapabilityEntry::new("stopDrones", Category::Audio, "", silence),
    CapabilityEntry::new("stopAllDrones", Category::Audio, "", silence),
];

fn freq(value: f64) -> f64 {
    value.clamp(MIN_FREQ, MAX_FREQ)
}

fn wave(args: &Args, index: usize, default: Waveform) -> Waveform {
    args.text(index)
        .and_then(|name| Waveform::parse(&name))
        .unwrap_or(default)
}

pub fn tone_action(frequency: f64, duration_s: f64, wave: Waveform, volume: f64) -> SynthAction {
    SynthAction::Tone {
        freq: freq(frequency),
        duration_s: duration_s.clamp(0.01, MAX_TONE_SECONDS),
        wave,
        volume: volume.clamp(0.0, MAX_VOLUME),
    }
}

fn voice(inv: &Invocation, target: StopTarget) -> Dynamic {
    Dynamic::from(VoiceHandle::new(inv.state, target))
}

/// Schedule `notes` as one pattern voice. Each note is `(offset_ms, action)`.
fn start_pattern(
    inv: &Invocation,
    kind: &'static str,
    notes: Vec<(u64, SynthAction)>,
    length_ms: u64,
    register: bool,
) -> Dynamic {
    if notes.is_empty() {
        return voice(inv, StopTarget::Noop);
    }
    let mut state = inv.state.borrow_mut();
    let group = state.fx.group(kind);
    for (offset, action) in notes.into_iter().take(MAX_PATTERN_NOTES) {
        state.schedule_tone(offset, Some(&group), action);
    }
    if !register {
        drop(state);
        return voice(inv, StopTarget::Group(group));
    }
    let id = state.register_drone(kind, DroneVoice::Pattern { group: group.clone() });
    state.schedule_effect(length_ms, None, Some(&group), EffectStep::StopDrone { voice: id });
    drop(state);
    voice(inv, StopTarget::Drone(id))
}

fn start_oscillator(
    state: &mut SandboxState,
    kind: &'static str,
    freqs: Vec<f64>,
    wave: Waveform,
    volume: f64,
    lfo_hz: Option<f64>,
) -> u64 {
    let id = state.register_drone(kind, DroneVoice::Oscillator);
    state.play(SynthAction::DroneStart {
        voice: id,
        freqs: freqs.into_iter().map(freq).collect(),
        wave,
        volume: volume.clamp(0.0, MAX_VOLUME),
        lfo_hz,
    });
    id
}

fn tone(inv: &Invocation, args: &Args) -> Dynamic {
    let action = tone_action(
        args.number_or(0, 440.0),
        args.number_or(1, 0.5),
        wave(args, 2, Waveform::Sine),
        TONE_VOLUME,
    );
    inv.state.borrow_mut().play(action);
    Dynamic::UNIT
}

fn chord(inv: &Invocation, args: &Args) -> Dynamic {
    let duration = args.number_or(1, 0.5);
    let wave = wave(args, 2, Waveform::Sine);
    let mut state = inv.state.borrow_mut();
    for f in args.numbers(0).into_iter().take(16) {
        state.play(tone_action(f, duration, wave, TONE_VOLUME));
    }
    Dynamic::UNIT
}

fn noise(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().play(SynthAction::Noise {
        duration_s: args.clamped(0, 1.0, 0.01, MAX_TONE_SECONDS),
        volume: args.clamped(1, 0.06, 0.0, MAX_VOLUME),
        bandpass: None,
    });
    Dynamic::UNIT
}

fn drone(inv: &Invocation, args: &Args) -> Dynamic {
    let id = start_oscillator(
        &mut inv.state.borrow_mut(),
        "drone",
        vec![args.number_or(0, 110.0)],
        wave(args, 1, Waveform::Sine),
        args.clamped(2, 0.04, 0.0, MAX_VOLUME),
        None,
    );
    voice(inv, StopTarget::Drone(id))
}

fn deep_drone(inv: &Invocation, args: &Args) -> Dynamic {
    let base = args.number_or(0, 55.0);
    let seconds = args.number_or(1, 8.0).min(25.0);
    let freqs = DEEP_DRONE_CENTS
        .iter()
        .map(|cents| base * 2f64.powf(cents / 1200.0))
        .collect();
    let mut state = inv.state.borrow_mut();
    let id = start_oscillator(
        &mut state,
        "deepDrone",
        freqs,
        Waveform::Sine,
        args.clamped(2, 0.04, 0.0, MAX_VOLUME),
        Some(0.3),
    );
    if seconds > 0.0 {
        state.schedule_effect((seconds * 1000.0) as u64, None, None, EffectStep::StopDrone { voice: id });
    }
    drop(state);
    voice(inv, StopTarget::Drone(id))
}

fn binaural(inv: &Invocation, args: &Args) -> Dynamic {
    let base = args.number_or(0, 200.0);
    let beat = args.number_or(1, 4.0).clamp(0.1, 40.0);
    let seconds = args.number_or(2, 4.0).min(20.0);
    let mut state = inv.state.borrow_mut();
    let id = start_oscillator(
        &mut state,
        "binaural",
        vec![base, base + beat],
        Waveform::Sine,
        args.clamped(3, 0.06, 0.0, MAX_VOLUME),
        None,
    );
    if seconds > 0.0 {
        state.schedule_effect((seconds * 1000.0) as u64, None, None, EffectStep::StopDrone { voice: id });
    }
    drop(state);
    voice(inv, StopTarget::Drone(id))
}

fn sweep(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().play(SynthAction::Sweep {
        from: freq(args.number_or(0, 200.0)),
        to: freq(args.number_or(1, 800.0)),
        peak: None,
        duration_s: args.clamped(2, 2.0, 0.01, MAX_TONE_SECONDS),
        wave: wave(args, 3, Waveform::Sine),
        volume: 0.1,
    });
    Dynamic::UNIT
}

fn breath(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().play(SynthAction::Noise {
        duration_s: args.clamped(0, 2.0, 0.01, MAX_TONE_SECONDS),
        volume: TONE_VOLUME,
        bandpass: Some(Bandpass {
            freq: freq(args.number_or(1, 800.0)),
            q: args.clamped(2, 5.0, 0.1, 100.0),
        }),
    });
    Dynamic::UNIT
}

fn pulse(inv: &Invocation, args: &Args) -> Dynamic {
    let f = args.number_or(0, 110.0);
    let bpm = args.clamped(1, 120.0, 20.0, 1200.0);
    let seconds = args.number_or(2, 4.0).min(15.0);
    let wave = wave(args, 3, Waveform::Square);
    let beat = 60.0 / bpm;
    let count = (seconds / beat).floor().max(0.0) as usize;
    let notes = (0..count)
        .map(|i| {
            let offset = (i as f64 * beat * 1000.0) as u64;
            (offset, tone_action(f, beat * 0.3, wave, TONE_VOLUME))
        })
        .collect();
    start_pattern(inv, "pulse", notes, (seconds * 1000.0) as u64, true)
}

fn dissonance(inv: &Invocation, args: &Args) -> Dynamic {
    let f = args.number_or(0, 220.0);
    let duration = args.number_or(1, 3.0);
    let volume = args.clamped(2, 0.05, 0.0, MAX_VOLUME);
    let mut state = inv.state.borrow_mut();
    state.play(tone_action(f, duration, Waveform::Sine, volume));
    state.play(tone_action(f * 2f64.powf(1.0 / 17.0), duration, Waveform::Sine, volume));
    Dynamic::UNIT
}

fn stab(inv: &Invocation, args: &Args) -> Dynamic {
    let action = tone_action(
        args.number_or(0, 440.0),
        0.2,
        Waveform::Sawtooth,
        args.number_or(1, 0.2),
    );
    inv.state.borrow_mut().play(action);
    Dynamic::UNIT
}

fn scream(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().play(SynthAction::Sweep {
        from: 200.0,
        to: 100.0,
        peak: Some(2000.0),
        duration_s: args.clamped(0, 1.5, 0.1, MAX_TONE_SECONDS),
        wave: Waveform::Sawtooth,
        volume: args.clamped(1, 0.12, 0.0, MAX_VOLUME),
    });
    Dynamic::UNIT
}

fn siren(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().play(SynthAction::Modulated {
        carrier: 600.0,
        lfo_hz: args.clamped(1, 2.0, 0.1, 40.0),
        depth: 400.0,
        duration_s: args.clamped(0, 3.0, 0.1, MAX_TONE_SECONDS),
        volume: args.clamped(2, 0.08, 0.0, MAX_VOLUME),
    });
    Dynamic::UNIT
}

fn rumble(inv: &Invocation, args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    let f = 30.0 + state.random() * 20.0;
    let action = tone_action(
        f,
        args.number_or(0, 2.0),
        Waveform::Sine,
        args.number_or(1, 0.08),
    );
    state.play(action);
    Dynamic::UNIT
}

fn speak(inv: &Invocation, args: &Args) -> Dynamic {
    let text: String = args
        .text(0)
        .unwrap_or_default()
        .chars()
        .take(MAX_SPEECH_CHARS)
        .collect();
    if text.trim().is_empty() {
        return Dynamic::UNIT;
    }
    inv.state.borrow_mut().play(SynthAction::Speak {
        text,
        rate: args.clamped(1, 0.7, 0.1, 10.0),
        pitch: args.clamped(2, 0.3, 0.0, 2.0),
    });
    Dynamic::UNIT
}

fn arp(inv: &Invocation, args: &Args) -> Dynamic {
    let notes = args.numbers(0);
    let speed = args.clamped(1, 200.0, 20.0, 5000.0);
    let seconds = args.number_or(2, 6.0).min(20.0);
    let wave = wave(args, 3, Waveform::Triangle);
    if notes.is_empty() {
        return voice(inv, StopTarget::Noop);
    }
    let total = (seconds * 1000.0 / speed).floor().max(0.0) as usize;
    let scheduled = (0..total)
        .map(|j| {
            let offset = (j as f64 * speed) as u64;
            (offset, tone_action(notes[j % notes.len()], speed / 1000.0 * 0.8, wave, TONE_VOLUME))
        })
        .collect();
    start_pattern(inv, "arp", scheduled, (seconds * 1000.0) as u64, true)
}

fn step_note(step: &Map) -> Option<SynthAction> {
    let f = step.get("f").and_then(to_number).filter(|f| *f > 0.0)?;
    let duration = step
        .get("d")
        .and_then(to_number)
        .filter(|d| *d != 0.0)
        .unwrap_or(0.2);
    let wave = step
        .get("t")
        .and_then(|t| Waveform::parse(&to_text(t)))
        .unwrap_or_default();
    Some(tone_action(f, duration, wave, TONE_VOLUME))
}

fn sequence(inv: &Invocation, args: &Args) -> Dynamic {
    let steps: Vec<Option<SynthAction>> = args
        .array(0)
        .unwrap_or_default()
        .into_iter()
        .map(|step| step.try_cast::<Map>().as_ref().and_then(step_note))
        .collect();
    if steps.is_empty() {
        return voice(inv, StopTarget::Noop);
    }
    let bpm = args.clamped(1, 120.0, 20.0, 1200.0);
    let loops = args.number_or(2, 2.0).clamp(1.0, 8.0) as usize;
    let beat_ms = 60.0 / bpm * 1000.0;
    let total = steps.len() * loops;
    let notes = (0..total)
        .filter_map(|j| {
            let action = steps[j % steps.len()].clone()?;
            Some(((j as f64 * beat_ms) as u64, action))
        })
        .collect();
    start_pattern(inv, "sequence", notes, (total as f64 * beat_ms) as u64, true)
}

fn melody(inv: &Invocation, args: &Args) -> Dynamic {
    let notes = args.numbers(0);
    let tempo = args.clamped(1, 150.0, 20.0, 5000.0);
    let wave = wave(args, 2, Waveform::Sine);
    let scheduled = notes
        .iter()
        .enumerate()
        .filter(|(_, n)| **n > 0.0)
        .map(|(i, n)| {
            let offset = (i as f64 * tempo) as u64;
            (offset, tone_action(*n, tempo / 1000.0 * 0.8, wave, TONE_VOLUME))
        })
        .collect();
    start_pattern(inv, "melody", scheduled, (notes.len() as f64 * tempo) as u64, true)
}

fn chime(inv: &Invocation, args: &Args) -> Dynamic {
    let f = args.number_or(0, 800.0);
    let count = args.clamped(1, 5.0, 1.0, 32.0) as usize;
    let spacing = args.clamped(2, 300.0, 10.0, 10_000.0);
    let notes = (0..count)
        .map(|j| {
            let offset = (j as f64 * spacing) as u64;
            (offset, tone_action(f * (1.0 + j as f64 * 0.12), 0.6, Waveform::Sine, TONE_VOLUME))
        })
        .collect();
    start_pattern(inv, "chime", notes, 0, false)
}

fn glitch_music(inv: &Invocation, args: &Args) -> Dynamic {
    let seconds = args.number_or(0, 3.0).clamp(0.0, 10.0);
    let count = (seconds * 8.0).floor() as usize;
    let notes = {
        let mut state = inv.state.borrow_mut();
        (0..count)
            .map(|j| {
                let f = 80.0 + state.random() * 2000.0;
                let duration = 0.02 + state.random() * 0.15;
                let wave = Waveform::ALL[(state.random() * 4.0) as usize % 4];
                ((j * 125) as u64, tone_action(f, duration, wave, TONE_VOLUME))
            })
            .collect()
    };
    start_pattern(inv, "glitchMusic", notes, 0, false)
}

fn bell(inv: &Invocation, args: &Args) -> Dynamic {
    let f = args.number_or(0, 440.0);
    let duration = args.number_or(1, 2.0);
    let mut state = inv.state.borrow_mut();
    state.play(tone_action(f, duration, Waveform::Sine, 0.2));
    state.play(tone_action(f * 2.76, duration * 0.6, Waveform::Sine, 0.08));
    Dynamic::UNIT
}

/// Stop every registered voice and cancel speech.
pub fn silence_all(state: &mut SandboxState) -> usize {
    let stopped = state.stop_all_drones();
    state.play(SynthAction::SpeechCancel);
    stopped
}

fn silence(inv: &Invocation, _args: &Args) -> Dynamic {
    silence_all(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::run_effect_step;
    use crate::config::SandboxConfig;
    use crate::registry::NoCaptureDevice;
    use crate::state::{Shared, TaskAction};
    use rhai::Engine;

    fn shared() -> Shared {
        SandboxState::new(
            SandboxConfig {
                seed: Some(11),
                ..SandboxConfig::default()
            },
            Box::new(NoCaptureDevice),
        )
        .into_shared()
    }

    fn call(state: &Shared, handler: super::super::Handler, args: Vec<Dynamic>) -> Dynamic {
        let engine = Engine::new();
        handler(
            &Invocation {
                engine: &engine,
                state,
            },
            &Args::new(args),
        )
    }

    /// Fire every due task the way the sandbox tick does, minus script callbacks.
    fn advance(state: &Shared, now_ms: u64) {
        let mut s = state.borrow_mut();
        s.now_ms = now_ms;
        while let Some(task) = s.timers.pop_due(now_ms) {
            match task.action {
                TaskAction::Tone(action) => s.play(action),
                TaskAction::Effect(step) => run_effect_step(&mut s, step),
                TaskAction::Callback(_) => {}
            }
        }
    }

    #[test]
    fn tone_defaults_and_clamps() {
        let state = shared();
        call(&state, tone, vec![]);
        call(&state, tone, vec![Dynamic::from_int(99_999), Dynamic::from_int(60), "saw".into()]);
        let s = state.borrow();
        let events = s.audio.recent();
        assert_eq!(
            events[0].action,
            SynthAction::Tone {
                freq: 440.0,
                duration_s: 0.5,
                wave: Waveform::Sine,
                volume: TONE_VOLUME,
            }
        );
        assert_eq!(
            events[1].action,
            SynthAction::Tone {
                freq: MAX_FREQ,
                duration_s: MAX_TONE_SECONDS,
                wave: Waveform::Sawtooth,
                volume: TONE_VOLUME,
            }
        );
    }

    #[test]
    fn seven_drones_leave_six_alive() {
        let state = shared();
        let mut handles = Vec::new();
        for _ in 0..7 {
            let handle = call(
                &state,
                drone,
                vec![Dynamic::from_int(220), "sine".into(), Dynamic::from_float(0.05)],
            );
            handles.push(handle.cast::<VoiceHandle>());
        }
        assert_eq!(state.borrow().drones.len(), 6);
        assert!(!handles[0].is_active());
        assert!(handles[6].is_active());
        handles[6].stop();
        handles[6].stop();
        assert_eq!(state.borrow().drones.len(), 5);
    }

    #[test]
    fn arp_schedules_notes_and_expires() {
        let state = shared();
        let handle = call(
            &state,
            arp,
            vec![
                vec![Dynamic::from_int(220), Dynamic::from_int(330)].into(),
                Dynamic::from_int(250),
                Dynamic::from_int(1),
            ],
        )
        .cast::<VoiceHandle>();
        assert!(handle.is_active());
        advance(&state, 1000);
        let s = state.borrow();
        let tones = s
            .audio
            .recent()
            .iter()
            .filter(|e| matches!(e.action, SynthAction::Tone { .. }))
            .count();
        assert_eq!(tones, 4);
        assert!(s.drones.is_empty());
    }

    #[test]
    fn deep_drone_stops_itself() {
        let state = shared();
        let handle = call(&state, deep_drone, vec![Dynamic::from_int(55), Dynamic::from_int(2)])
            .cast::<VoiceHandle>();
        advance(&state, 1999);
        assert!(handle.is_active());
        advance(&state, 2000);
        assert!(!handle.is_active());
        let s = state.borrow();
        let start = s
            .audio
            .recent()
            .iter()
            .find_map(|e| match &e.action {
                SynthAction::DroneStart { freqs, lfo_hz, .. } => Some((freqs.clone(), *lfo_hz)),
                _ => None,
            })
            .expect("drone started");
        assert_eq!(start.0.len(), 5);
        assert_eq!(start.1, Some(0.3));
    }

    #[test]
    fn sequence_skips_rests_and_silence_stops_everything() {
        let state = shared();
        let mut note = Map::new();
        note.insert("f".into(), Dynamic::from_int(330));
        let rest = Map::new();
        call(
            &state,
            sequence,
            vec![vec![Dynamic::from(note), Dynamic::from(rest)].into(), Dynamic::from_int(600)],
        );
        call(&state, drone, vec![Dynamic::from_int(110)]);
        assert_eq!(state.borrow().drones.len(), 2);
        call(&state, silence, vec![]);
        let s = state.borrow();
        assert!(s.drones.is_empty());
        assert!(s.timers.is_empty());
        assert_eq!(
            s.audio.recent().last().map(|e| e.action.clone()),
            Some(SynthAction::SpeechCancel)
        );
    }
}
