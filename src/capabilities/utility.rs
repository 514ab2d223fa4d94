//! Timers, listeners, nested execution and housekeeping.

use bevy::log::{debug, info};
use rhai::{Dynamic, INT};

use super::{audio, fx, CapabilityEntry, Category, Invocation};
use crate::engine::{Args, ScriptCallback};
use crate::executor::{self, Outcome};
use crate::state::SandboxState;

pub const MIN_INTERVAL_MS: f64 = 16.0;
pub const MAX_DELAY_MS: f64 = 600_000.0;

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("interval", Category::Utility, "interval(fn, ms) -> id", interval),
    CapabilityEntry::new("clearInterval", Category::Utility, "clearInterval(id)", clear_task),
    CapabilityEntry::new("setTimeout", Category::Utility, "setTimeout(fn, ms) -> id", set_timeout),
    CapabilityEntry::new("clearTimeout", Category::Utility, "clearTimeout(id)", clear_task),
    CapabilityEntry::new("on", Category::Utility, "on(event, fn)", on),
    CapabilityEntry::new("off", Category::Utility, "off(event, fn?)", off),
    CapabilityEntry::new("exec", Category::Utility, "exec(code) -> \"\"|message", exec),
    CapabilityEntry::new("purge", Category::Utility, "purge()", purge_entry),
    CapabilityEntry::new("clear", Category::Utility, "", purge_entry),
    CapabilityEntry::new("reset", Category::Utility, "reset()", reset),
    CapabilityEntry::new("log", Category::Utility, "log(msg)", log),
];

fn schedule(inv: &Invocation, args: &Args, min_ms: f64, repeat: bool) -> Dynamic {
    let Some(callback) = args
        .fn_ptr(0)
        .and_then(|fn_ptr| ScriptCallback::capture(inv.state, fn_ptr))
    else {
        return Dynamic::from_int(0);
    };
    let delay = args.number(1).unwrap_or(0.0).clamp(min_ms, MAX_DELAY_MS) as u64;
    let period = repeat.then_some(delay);
    let id = inv.state.borrow_mut().schedule_callback(delay, period, callback);
    Dynamic::from_int(id.map_or(0, |id| id as INT))
}

fn interval(inv: &Invocation, args: &Args) -> Dynamic {
    schedule(inv, args, MIN_INTERVAL_MS, true)
}

fn set_timeout(inv: &Invocation, args: &Args) -> Dynamic {
    schedule(inv, args, 0.0, false)
}

fn clear_task(inv: &Invocation, args: &Args) -> Dynamic {
    if let Some(id) = args.number(0).filter(|id| *id > 0.0) {
        inv.state.borrow_mut().timers.cancel_script(id as u64);
    }
    Dynamic::UNIT
}

fn on(inv: &Invocation, args: &Args) -> Dynamic {
    let Some(event) = args.text(0) else {
        return Dynamic::UNIT;
    };
    let Some(callback) = args
        .fn_ptr(1)
        .and_then(|fn_ptr| ScriptCallback::capture(inv.state, fn_ptr))
    else {
        return Dynamic::UNIT;
    };
    inv.state.borrow_mut().listeners.add(&event, None, callback);
    Dynamic::UNIT
}

fn off(inv: &Invocation, args: &Args) -> Dynamic {
    let Some(event) = args.text(0) else {
        return Dynamic::UNIT;
    };
    let handler = args.fn_ptr(1);
    inv.state.borrow_mut().listeners.remove_where(|listener| {
        listener.event == event
            && listener.target.is_none()
            && handler
                .as_ref()
                .map_or(true, |f| f.fn_name() == listener.callback.fn_ptr.fn_name())
    });
    Dynamic::UNIT
}

/// Run `code` as a nested ritual. Returns `""` on success, otherwise the
/// reason or error message.
fn exec(inv: &Invocation, args: &Args) -> Dynamic {
    let code = args.text(0).unwrap_or_default();
    let message = match executor::run(inv.engine, inv.state, &code, "exec") {
        Outcome::Success => String::new(),
        Outcome::Blocked { reason } => reason,
        Outcome::Failed { message } => message,
    };
    Dynamic::from(message)
}

/// Drop everything a ritual left running: spawned elements, sound, script
/// timers and listeners, and both render loops.
pub fn purge(state: &mut SandboxState) {
    if let Some(spawned) = state.element("spawned") {
        state.page.clear_children(spawned);
    }
    let voices = audio::silence_all(state);
    let (timers, listeners) = state.clear_script_work();
    state.canvas.stop_loop();
    state.canvas.clear();
    state.scene.teardown();
    state.fx.rain.clear();
    state.fx.eyes.clear();
    info!(
        "[Ritual utility] Purged {} voice(s), {} timer(s), {} listener(s)",
        voices, timers, listeners
    );
}

fn purge_entry(inv: &Invocation, _args: &Args) -> Dynamic {
    purge(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

fn reset(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    purge(&mut state);
    fx::heal_page(&mut state);
    Dynamic::UNIT
}

fn log(_inv: &Invocation, args: &Args) -> Dynamic {
    debug!("[Ritual log] {}", args.text(0).unwrap_or_default());
    Dynamic::UNIT
}
