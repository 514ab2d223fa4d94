//! Supervisors that notice a ritual has left the page unusable and put it
//! back. Each runs on its own repeating timer and heals only after its
//! condition has held for the configured grace window.

use std::time::Duration;

use bevy::log::info;
use bevy::time::{Timer, TimerMode};

use crate::capabilities::scare::{self, OVERLAY_CLASS};
use crate::config::WatchdogConfig;
use crate::events::SandboxEvent;
use crate::page::ElementId;
use crate::state::SandboxState;

const MIN_FONT_PX: f64 = 10.0;
const MIN_OPACITY: f64 = 0.1;

const GOOD_AREA_CSS: &str =
    "position:relative;min-height:2.8rem;display:block;visibility:visible;opacity:1;transform:none";
const GOOD_INPUT_CSS: &str = "background:transparent;border:none;border-bottom:1px solid #2a2a35;color:#999;font-size:1.1rem;width:100%;max-width:55ch;padding:0.7rem 0;outline:none;display:block;visibility:visible;opacity:1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogKind {
    Readability,
    Input,
    Scare,
    Reaper,
}

impl WatchdogKind {
    pub fn name(self) -> &'static str {
        match self {
            WatchdogKind::Readability => "readability",
            WatchdogKind::Input => "input",
            WatchdogKind::Scare => "scare",
            WatchdogKind::Reaper => "reaper",
        }
    }
}

struct Periodic {
    kind: WatchdogKind,
    timer: Timer,
    /// When this supervisor last looked.
    last_check_ms: u64,
}

impl Periodic {
    fn new(kind: WatchdogKind, period_ms: u64) -> Self {
        Self {
            kind,
            timer: Timer::new(Duration::from_millis(period_ms.max(1)), TimerMode::Repeating),
            last_check_ms: 0,
        }
    }

    fn due(&mut self, delta_ms: u64) -> bool {
        self.timer.tick(Duration::from_millis(delta_ms));
        self.timer.times_finished_this_tick() > 0
    }

    /// When a condition first seen at `now` began: the last style change on
    /// the elements involved if it happened since the previous look,
    /// otherwise `now`.
    fn onset(&self, changed_ms: u64, now: u64) -> u64 {
        if changed_ms >= self.last_check_ms {
            changed_ms.min(now)
        } else {
            now
        }
    }
}

/// Tracks how long a bad condition has held.
#[derive(Default)]
struct Since(Option<u64>);

impl Since {
    /// Record `bad` at `now`; true once it has held for longer than `grace_ms`.
    /// `onset` is only used when the condition was not already being tracked.
    fn observe(&mut self, bad: bool, onset: u64, now: u64, grace_ms: u64) -> bool {
        if !bad {
            self.0 = None;
            return false;
        }
        let since = *self.0.get_or_insert(onset);
        now.saturating_sub(since) > grace_ms
    }

    fn reset(&mut self) {
        self.0 = None;
    }
}

pub struct Watchdogs {
    config: WatchdogConfig,
    last_run_ms: u64,
    readability: Periodic,
    input: Periodic,
    scare: Periodic,
    reaper: Periodic,
    unreadable: Since,
    input_gone: Since,
    input_distorted: Since,
    crash_shown: Since,
    pub heals: u64,
}

impl Watchdogs {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            readability: Periodic::new(WatchdogKind::Readability, config.readability_period_ms),
            input: Periodic::new(WatchdogKind::Input, config.input_period_ms),
            scare: Periodic::new(WatchdogKind::Scare, config.scare_period_ms),
            reaper: Periodic::new(WatchdogKind::Reaper, config.reaper_period_ms),
            config,
            last_run_ms: 0,
            unreadable: Since::default(),
            input_gone: Since::default(),
            input_distorted: Since::default(),
            crash_shown: Since::default(),
            heals: 0,
        }
    }

    /// Advance every supervisor to `state.now_ms` and run the ones whose
    /// period has elapsed.
    pub fn run(&mut self, state: &mut SandboxState) {
        let now = state.now_ms;
        let delta = now.saturating_sub(self.last_run_ms);
        self.last_run_ms = now;
        state.page.clock_ms = now;
        if delta == 0 {
            return;
        }
        if self.readability.due(delta) {
            self.check_readability(state);
            self.readability.last_check_ms = now;
        }
        if self.input.due(delta) {
            self.check_input(state);
            self.input.last_check_ms = now;
        }
        if self.scare.due(delta) {
            self.check_scare(state);
            self.scare.last_check_ms = now;
        }
        if self.reaper.due(delta) {
            self.check_drones(state);
            self.reaper.last_check_ms = now;
        }
    }

    fn healed(&mut self, state: &mut SandboxState, kind: WatchdogKind, detail: &str) {
        self.heals = self.heals.saturating_add(1);
        info!("[Ritual watchdog] {} healed: {}", kind.name(), detail);
        state.emit(SandboxEvent::WatchdogHealed {
            watchdog: kind.name().to_string(),
            detail: detail.to_string(),
        });
    }

    fn check_readability(&mut self, state: &mut SandboxState) {
        let Some(output) = state.element("output") else {
            return;
        };
        let now = state.now_ms;
        let bad = is_unreadable(state, output);
        let onset = self
            .readability
            .onset(state.page.style_changed_ms(output), now);
        if self
            .unreadable
            .observe(bad, onset, now, self.config.readability_grace_ms)
        {
            for prop in ["font-size", "opacity", "visibility", "display", "color"] {
                state.page.clear_style(output, prop);
            }
            self.unreadable.reset();
            self.healed(state, self.readability.kind, "output restored");
        }
    }

    fn check_input(&mut self, state: &mut SandboxState) {
        let (Some(area), Some(input)) = (state.element("input-area"), state.element("prompt-input"))
        else {
            return;
        };
        let now = state.now_ms;
        let gone = input_gone(state, area, input);
        let distorted = state
            .page
            .computed_style(area, "transform")
            .is_some_and(|tf| !tf.trim().is_empty() && tf.trim() != "none");
        let changed = state
            .page
            .style_changed_ms(area)
            .max(state.page.style_changed_ms(input));
        let onset = self.input.onset(changed, now);

        if self
            .input_gone
            .observe(gone, onset, now, self.config.input_gone_grace_ms)
        {
            state.page.replace_style(area, GOOD_AREA_CSS);
            state.page.replace_style(input, GOOD_INPUT_CSS);
            if let Some(el) = state.page.get_mut(input) {
                el.disabled = false;
            }
            self.input_gone.reset();
            self.input_distorted.reset();
            self.healed(state, WatchdogKind::Input, "input restored");
        } else if !gone
            && self
                .input_distorted
                .observe(distorted, onset, now, self.config.input_distorted_grace_ms)
        {
            for prop in ["transform", "position", "left", "top", "z-index"] {
                state.page.clear_style(area, prop);
            }
            state.page.set_style(area, "transition", "transform 0.5s ease");
            self.input_distorted.reset();
            self.healed(state, WatchdogKind::Input, "input straightened");
        }

        if !state.processing {
            if let Some(el) = state.page.get_mut(input) {
                el.disabled = false;
            }
            if let Some(thinking) = state.element("thinking") {
                state.page.remove(thinking);
            }
        }
    }

    fn check_scare(&mut self, state: &mut SandboxState) {
        let now = state.now_ms;
        let active = scare::crash_active(state);
        let changed = state
            .element("crash-screen")
            .map_or(0, |screen| state.page.style_changed_ms(screen));
        let onset = self.scare.onset(changed, now);
        if self
            .crash_shown
            .observe(active, onset, now, self.config.crash_ceiling_ms)
        {
            scare::uncrash(state);
            self.crash_shown.reset();
            self.healed(state, WatchdogKind::Scare, "crash screen dismissed");
        }

        let ceiling = self.config.error_overlay_ceiling_ms;
        let stale: Vec<ElementId> = state
            .page
            .query_all(&format!(".{OVERLAY_CLASS}"))
            .into_iter()
            .filter(|&overlay| {
                state
                    .page
                    .get(overlay)
                    .and_then(|el| el.attribute("data-born"))
                    .and_then(|born| born.trim().parse::<u64>().ok())
                    .is_some_and(|born| now.saturating_sub(born) > ceiling)
            })
            .collect();
        if stale.is_empty() {
            return;
        }
        for overlay in &stale {
            state.page.remove(*overlay);
        }
        let detail = format!("{} stale overlay(s) removed", stale.len());
        self.healed(state, WatchdogKind::Scare, &detail);
    }

    fn check_drones(&mut self, state: &mut SandboxState) {
        let reaped = state.reap_drones();
        if reaped > 0 {
            let detail = format!("{reaped} drone(s) reaped");
            self.healed(state, WatchdogKind::Reaper, &detail);
        }
    }
}

fn style_number(state: &SandboxState, id: ElementId, prop: &str) -> Option<f64> {
    let value = state.page.computed_style(id, prop)?;
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    digits.parse::<f64>().ok()
}

fn is_hidden(state: &SandboxState, id: ElementId) -> bool {
    state.page.computed_style(id, "display").as_deref() == Some("none")
        || state.page.computed_style(id, "visibility").as_deref() == Some("hidden")
}

fn is_unreadable(state: &SandboxState, output: ElementId) -> bool {
    is_hidden(state, output)
        || style_number(state, output, "font-size").is_some_and(|px| px < MIN_FONT_PX)
        || style_number(state, output, "opacity").is_some_and(|o| o == 0.0)
}

fn input_gone(state: &SandboxState, area: ElementId, input: ElementId) -> bool {
    let faded = |id| style_number(state, id, "opacity").is_some_and(|o| o < MIN_OPACITY);
    // The forced-choice buttons hide the text input on purpose.
    let input_hidden = !state.fx.options_active && is_hidden(state, input);
    if is_hidden(state, area) || faded(area) || input_hidden || faded(input) {
        return true;
    }
    let rect = state.page.rect(area);
    let vp = state.page.viewport;
    rect.right() < 10.0
        || rect.bottom() < 10.0
        || rect.x > vp.width - 10.0
        || rect.y > vp.height - 10.0
        || rect.width < 30.0
        || rect.height < 10.0
}
