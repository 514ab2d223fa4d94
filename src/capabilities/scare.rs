//! Fake crash screens, error banners and the blue screen.

use bevy::log::debug;
use rhai::{Dynamic, Map};

use super::{CapabilityEntry, Category, EffectStep, Invocation};
use crate::engine::{to_number, to_text, Args};
use crate::page::ElementId;
use crate::state::SandboxState;

pub const CRASH_CEILING_MS: u64 = 10_000;
pub const ERROR_CEILING_MS: u64 = 8_000;
pub const BSOD_CEILING_MS: u64 = 12_000;
pub const OVERLAY_CLASS: &str = "error-overlay";
const CRASH_GROUP: &str = "crash";
const CRASH_FADE_GROUP: &str = "crash-fade";
const CRASH_FADE_MS: u64 = 800;

const CRASH_PARTS: [(&str, &str, &str); 5] = [
    ("icon", ".ci", "◬"),
    ("title", ".ct", "FATAL EXCEPTION"),
    ("body", ".cb", "The entity encountered an irrecoverable error."),
    ("code", ".cc", "0xDEAD_FEED :: SIGVOID"),
    ("button", ".cx", "attempt reconnection"),
];

const ERROR_STYLE: &str = "position:fixed;top:0;left:0;right:0;background:#1a1a1a;color:#c55;font-family:monospace;font-size:0.9rem;padding:0.8rem 1.2rem;z-index:9300;border-bottom:1px solid #c55;cursor:pointer;";
const BSOD_STYLE: &str = "position:fixed;top:0;left:0;width:100vw;height:100vh;background:#0037DA;color:#fff;font-family:monospace;z-index:9300;display:flex;flex-direction:column;justify-content:center;align-items:center;text-align:center;cursor:pointer;";

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new(
        "crash",
        Category::Scare,
        "crash(#{icon,title,body,code,button,duration})",
        crash,
    ),
    CapabilityEntry::new("uncrash", Category::Scare, "uncrash()", uncrash_entry),
    CapabilityEntry::new("fakeError", Category::Scare, "fakeError(msg?, ms?)", fake_error),
    CapabilityEntry::new("bsod", Category::Scare, "bsod(text?, ms?)", bsod),
];

/// Whether the crash screen is currently up.
pub fn crash_active(state: &SandboxState) -> bool {
    state
        .element("crash-screen")
        .and_then(|screen| state.page.get(screen))
        .is_some_and(|el| el.has_class("active"))
}

fn option_text(options: &Map, key: &str, default: &str) -> String {
    options
        .get(key)
        .map(to_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn crash(inv: &Invocation, args: &Args) -> Dynamic {
    let options = args.map(0).unwrap_or_default();
    let duration = options
        .get("duration")
        .and_then(to_number)
        .filter(|ms| *ms > 0.0)
        .unwrap_or(6000.0)
        .min(CRASH_CEILING_MS as f64) as u64;
    let mut state = inv.state.borrow_mut();
    let Some(screen) = state.element("crash-screen") else {
        return Dynamic::UNIT;
    };
    state.timers.cancel_group(CRASH_GROUP);
    state.timers.cancel_group(CRASH_FADE_GROUP);
    for (key, selector, default) in CRASH_PARTS {
        let text = option_text(&options, key, default);
        if let Some(part) = state.page.query_all_within(screen, selector, false).first().copied() {
            state.page.set_text(part, &text);
        }
    }
    if let Some(el) = state.page.get_mut(screen) {
        el.remove_class("fading");
        el.add_class("active");
    }
    state.page.set_style(screen, "display", "flex");
    state.schedule_effect(duration, None, Some(CRASH_GROUP), EffectStep::Uncrash);
    debug!("[Ritual scare] Crash screen up for {}ms", duration);
    Dynamic::UNIT
}

/// Start fading the crash screen out; it is fully gone after the fade.
pub fn uncrash(state: &mut SandboxState) {
    state.timers.cancel_group(CRASH_GROUP);
    let Some(screen) = state.element("crash-screen") else {
        return;
    };
    if let Some(el) = state.page.get_mut(screen) {
        el.add_class("fading");
    }
    state.schedule_effect(
        CRASH_FADE_MS,
        None,
        Some(CRASH_FADE_GROUP),
        EffectStep::FinishUncrash,
    );
}

pub(super) fn finish_uncrash(state: &mut SandboxState) {
    let Some(screen) = state.element("crash-screen") else {
        return;
    };
    if let Some(el) = state.page.get_mut(screen) {
        el.remove_class("active");
        el.remove_class("fading");
    }
    state.page.clear_style(screen, "display");
}

fn uncrash_entry(inv: &Invocation, _args: &Args) -> Dynamic {
    uncrash(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

/// A fresh overlay attached to the body, stamped with its birth time.
fn spawn_overlay(state: &mut SandboxState, css: &str) -> ElementId {
    let body = state.page.body();
    let born = state.now_ms.to_string();
    let overlay = state.page.create_element("div");
    if let Some(el) = state.page.get_mut(overlay) {
        el.add_class(OVERLAY_CLASS);
        el.set_attribute("data-born", &born);
    }
    state.page.replace_style(overlay, css);
    state.page.append_child(body, overlay);
    overlay
}

fn child(state: &mut SandboxState, parent: ElementId, text: &str) -> ElementId {
    let el = state.page.create_element("div");
    state.page.set_text(el, text);
    state.page.append_child(parent, el);
    el
}

/// Fade `overlay` at `at_ms`, then remove it once the fade has run.
fn schedule_fade(state: &mut SandboxState, overlay: ElementId, at_ms: u64, fade_ms: u64) {
    let transition = format!("opacity {}s", fade_ms as f64 / 1000.0);
    state.schedule_effect(
        at_ms,
        None,
        None,
        EffectStep::restyle(overlay, &[("opacity", "0"), ("transition", &transition)]),
    );
    state.schedule_effect(
        at_ms + fade_ms,
        None,
        None,
        EffectStep::Remove {
            elements: vec![overlay],
        },
    );
}

fn fake_error(inv: &Invocation, args: &Args) -> Dynamic {
    let message = args.text_or(0, "Uncaught ReferenceError: reality is not defined");
    let duration = args.number_or(1, 5000.0).min(ERROR_CEILING_MS as f64).max(0.0) as u64;
    let mut state = inv.state.borrow_mut();
    let overlay = spawn_overlay(&mut state, ERROR_STYLE);
    let glyph = state.page.create_element("span");
    state.page.set_text(glyph, "⟁");
    state
        .page
        .replace_style(glyph, "color:#f66;margin-right:0.5rem;");
    state.page.append_child(overlay, glyph);
    let text = state.page.create_text(&format!(" {message}"));
    state.page.append_child(overlay, text);
    schedule_fade(&mut state, overlay, duration, 500);
    Dynamic::UNIT
}

fn bsod(inv: &Invocation, args: &Args) -> Dynamic {
    let text = args.text_or(0, "Your session ran into a problem.");
    let duration = args.number_or(1, 8000.0).min(BSOD_CEILING_MS as f64).max(12.0) as u64;
    let mut state = inv.state.borrow_mut();
    let overlay = spawn_overlay(&mut state, BSOD_STYLE);
    child(&mut state, overlay, ":(");
    child(&mut state, overlay, &text);
    let pct = child(&mut state, overlay, "0% complete");
    if let Some(el) = state.page.get_mut(pct) {
        el.add_class("pct");
    }
    let group = state.fx.group("bsod");
    let step = duration / 12;
    state.schedule_effect(step, Some(step), Some(&group), EffectStep::BsodProgress { element: pct });
    state.schedule_effect(duration, None, None, EffectStep::CancelGroup { group });
    schedule_fade(&mut state, overlay, duration, CRASH_FADE_MS);
    Dynamic::UNIT
}

pub(super) fn bsod_step(state: &mut SandboxState, element: ElementId) {
    if !state.page.is_connected(element) {
        return;
    }
    let current: u64 = state
        .page
        .text_content(element)
        .split('%')
        .next()
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0);
    let bump = 1 + (state.random() * 15.0) as u64;
    let next = (current + bump).min(100);
    state.page.set_text(element, &format!("{next}% complete"));
}
