//! Visual effects on the page body, the stage and the overlay layers.

use rhai::Dynamic;

use super::{CapabilityEntry, Category, EffectStep, Invocation};
use crate::engine::handles::StopTarget;
use crate::engine::{format_number, Args, VoiceHandle};
use crate::page::ElementId;
use crate::state::{RainDrop, SandboxState};

/// Frame period for effects animated every frame.
pub const FRAME_MS: u64 = 16;
const DEFAULT_RAIN_GLYPHS: &str = "◬⟁⟐⦿⧫";
const RAIN_COLOR: &str = "rgba(200,247,197,0.4)";
const PORTAL_KEYFRAMES: &str =
    "@keyframes voidPortal{from{filter:hue-rotate(0deg)}to{filter:hue-rotate(360deg)}}";
const MORPH_MS: u64 = 8000;

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("shake", Category::Fx, "shake(px?, ms?)", shake),
    CapabilityEntry::new("glitch", Category::Fx, "glitch(ms?)", glitch),
    CapabilityEntry::new("flashColor", Category::Fx, "flashColor(css, ms?)", flash_color),
    CapabilityEntry::new("blackout", Category::Fx, "blackout(ms?)", blackout),
    CapabilityEntry::new("strobe", Category::Fx, "strobe(ms?, period?)", strobe),
    CapabilityEntry::new("rain", Category::Fx, "rain(chars?, ms?)", rain),
    CapabilityEntry::new("portal", Category::Fx, "portal(c1?, c2?) -> stop handle", portal),
    CapabilityEntry::new("eyes", Category::Fx, "eyes(n?)", eyes),
    CapabilityEntry::new("fracture", Category::Fx, "fracture()", fracture),
    CapabilityEntry::new("heal", Category::Fx, "heal()", heal),
    CapabilityEntry::new("mirror", Category::Fx, "mirror()", mirror),
    CapabilityEntry::new("invert", Category::Fx, "invert()", invert),
    CapabilityEntry::new("hue", Category::Fx, "hue(deg)", hue),
    CapabilityEntry::new("blur", Category::Fx, "blur(px)", blur),
    CapabilityEntry::new("morph", Category::Fx, "morph()", morph),
    CapabilityEntry::new("unmorph", Category::Fx, "unmorph()", unmorph_entry),
    CapabilityEntry::new("cursor", Category::Fx, "cursor(css)", cursor),
    CapabilityEntry::new("crt", Category::Crt, "crt(0..1)", crt),
    CapabilityEntry::new("crtColor", Category::Crt, "crtColor(css)", crt_color),
];

fn px(value: f64) -> String {
    format!("{}px", format_number(value))
}

/// Toggle an inline property between `on` and unset.
fn toggle_style(state: &mut SandboxState, element: ElementId, prop: &str, on: &str) {
    let current = state.page.get(element).and_then(|el| el.style.get(prop).cloned());
    let next = if current.as_deref() == Some(on) { "" } else { on };
    state.page.set_style(element, prop, next);
}

fn shake(inv: &Invocation, args: &Args) -> Dynamic {
    let intensity = args.clamped(0, 10.0, 0.0, 100.0);
    let duration = args.clamped(1, 500.0, FRAME_MS as f64, 5000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    let group = state.fx.group("shake");
    state.schedule_effect(0, Some(FRAME_MS), Some(&group), EffectStep::ShakeJitter { intensity });
    state.schedule_effect(duration, None, None, EffectStep::CancelGroup { group });
    state.schedule_effect(duration, None, None, EffectStep::restyle(body, &[("transform", "")]));
    Dynamic::UNIT
}

pub(super) fn shake_step(state: &mut SandboxState, intensity: f64) {
    let dx = (state.random() - 0.5) * intensity;
    let dy = (state.random() - 0.5) * intensity;
    let body = state.page.body();
    state
        .page
        .set_style(body, "transform", &format!("translate({},{})", px(dx), px(dy)));
}

fn glitch(inv: &Invocation, args: &Args) -> Dynamic {
    let duration = args.clamped(0, 800.0, FRAME_MS as f64, 10_000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    if let Some(el) = state.page.get_mut(body) {
        el.add_class("glitching");
    }
    state.schedule_effect(
        duration,
        None,
        None,
        EffectStep::RemoveClass {
            element: body,
            class: "glitching".to_string(),
        },
    );
    Dynamic::UNIT
}

fn flash_color(inv: &Invocation, args: &Args) -> Dynamic {
    let color = args.text_or(0, "#fff");
    let duration = args.clamped(1, 200.0, FRAME_MS as f64, 5000.0);
    let mut state = inv.state.borrow_mut();
    let Some(overlay) = state.element("overlay") else {
        return Dynamic::UNIT;
    };
    let transition = format!("opacity {}ms ease", format_number(duration));
    state.page.set_style(overlay, "background-color", &color);
    state.page.set_style(overlay, "opacity", "0.7");
    state.page.set_style(overlay, "transition", &transition);
    state.schedule_effect(
        duration as u64,
        None,
        None,
        EffectStep::restyle(overlay, &[("opacity", "0")]),
    );
    Dynamic::UNIT
}

fn blackout(inv: &Invocation, args: &Args) -> Dynamic {
    let duration = args.number_or(0, 2000.0).clamp(0.0, 8000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let Some(overlay) = state.element("overlay") else {
        return Dynamic::UNIT;
    };
    state.page.set_style(overlay, "background-color", "#000");
    state.page.set_style(overlay, "opacity", "1");
    state.page.set_style(overlay, "transition", "opacity 0.2s");
    state.schedule_effect(
        duration,
        None,
        None,
        EffectStep::restyle(overlay, &[("opacity", "0"), ("transition", "opacity 0.8s")]),
    );
    Dynamic::UNIT
}

fn strobe(inv: &Invocation, args: &Args) -> Dynamic {
    let duration = args.number_or(0, 1500.0).clamp(0.0, 3000.0) as u64;
    let period = args.clamped(1, 80.0, 20.0, 1000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let Some(overlay) = state.element("overlay") else {
        return Dynamic::UNIT;
    };
    let group = state.fx.group("strobe");
    state.schedule_effect(period, Some(period), Some(&group), EffectStep::StrobeToggle);
    state.schedule_effect(duration, None, None, EffectStep::CancelGroup { group });
    state.schedule_effect(
        duration,
        None,
        None,
        EffectStep::restyle(overlay, &[("opacity", "0"), ("background-color", "")]),
    );
    Dynamic::UNIT
}

pub(super) fn strobe_step(state: &mut SandboxState) {
    let Some(overlay) = state.element("overlay") else {
        return;
    };
    state.fx.strobe_on = !state.fx.strobe_on;
    let (color, opacity) = if state.fx.strobe_on {
        ("#fff", "0.5")
    } else {
        ("transparent", "0")
    };
    state.page.set_style(overlay, "background-color", color);
    state.page.set_style(overlay, "opacity", opacity);
}

fn rain(inv: &Invocation, args: &Args) -> Dynamic {
    let glyphs: Vec<char> = args.text_or(0, DEFAULT_RAIN_GLYPHS).chars().collect();
    let duration = args.clamped(1, 5000.0, FRAME_MS as f64, 30_000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let Some(spawned) = state.element("spawned") else {
        return Dynamic::UNIT;
    };
    let mobile = state.page.viewport.is_mobile();
    let spacing = if mobile { 18.0 } else { 24.0 };
    let max_cols = if mobile { 20.0 } else { 40.0 };
    let cols = (state.page.viewport.width / spacing).floor().min(max_cols).max(0.0) as usize;
    let mut elements = Vec::with_capacity(cols);
    for i in 0..cols {
        let y = -state.random() * 200.0;
        let speed = 1.5 + state.random() * 4.0;
        let el = state.page.create_element("div");
        state.page.append_child(spawned, el);
        state.page.replace_style(
            el,
            &format!(
                "position:fixed;left:{};top:{};color:{};font-family:monospace;font-size:14px;pointer-events:none;z-index:100;",
                px(i as f64 * spacing),
                px(y),
                RAIN_COLOR
            ),
        );
        state.fx.rain.push(RainDrop { element: el, y, speed });
        elements.push(el);
    }
    let group = state.fx.group("rain");
    state.schedule_effect(
        0,
        Some(FRAME_MS),
        Some(&group),
        EffectStep::RainStep {
            elements: elements.clone(),
            glyphs,
        },
    );
    state.schedule_effect(duration, None, None, EffectStep::CancelGroup { group });
    state.schedule_effect(duration, None, None, EffectStep::Remove { elements });
    Dynamic::UNIT
}

pub(super) fn rain_step(state: &mut SandboxState, elements: &[ElementId], glyphs: &[char]) {
    let height = state.page.viewport.height;
    let mut drops = std::mem::take(&mut state.fx.rain);
    drops.retain(|drop| state.page.contains(drop.element));
    for drop in drops.iter_mut().filter(|drop| elements.contains(&drop.element)) {
        drop.y += drop.speed;
        if drop.y > height {
            drop.y = -20.0;
        }
        state.page.set_style(drop.element, "top", &px(drop.y));
        if !glyphs.is_empty() && state.random() < 0.15 {
            let idx = (state.random() * glyphs.len() as f64) as usize % glyphs.len();
            state.page.set_text(drop.element, &glyphs[idx].to_string());
        }
    }
    state.fx.rain = drops;
}

/// Body background and animation as set by `portal`, and the keyframes it installed.
pub fn close_portal(state: &mut SandboxState) {
    let Some(keyframes) = state.fx.portal.take() else {
        return;
    };
    let body = state.page.body();
    state.page.clear_style(body, "background");
    state.page.clear_style(body, "animation");
    state.page.remove(keyframes);
}

fn portal(inv: &Invocation, args: &Args) -> Dynamic {
    let c1 = args.text_or(0, "#7b68ee");
    let c2 = args.text_or(1, "#c8f7c5");
    let mut state = inv.state.borrow_mut();
    close_portal(&mut state);
    let body = state.page.body();
    let head = state.page.query("head");
    let keyframes = state.page.create_element("style");
    state.page.set_text(keyframes, PORTAL_KEYFRAMES);
    if let Some(head) = head {
        state.page.append_child(head, keyframes);
    }
    state.fx.portal = Some(keyframes);
    state.page.set_style(
        body,
        "background",
        &format!("conic-gradient(from 0deg,{c1},{c2},{c1})"),
    );
    state
        .page
        .set_style(body, "animation", "voidPortal 4s linear infinite");
    drop(state);
    Dynamic::from(VoiceHandle::new(inv.state, StopTarget::Portal))
}

fn eyes(inv: &Invocation, args: &Args) -> Dynamic {
    let count = args.number_or(0, 5.0).clamp(0.0, 50.0) as usize;
    let mut state = inv.state.borrow_mut();
    let Some(spawned) = state.element("spawned") else {
        return Dynamic::UNIT;
    };
    let mobile = state.page.viewport.is_mobile();
    for _ in 0..count {
        let size = if mobile {
            15.0 + state.random() * 20.0
        } else {
            20.0 + state.random() * 35.0
        };
        let left = state.random() * 85.0;
        let top = state.random() * 85.0;
        let opacity = 0.15 + state.random() * 0.45;
        let eye = state.page.create_element("div");
        state.page.append_child(spawned, eye);
        if let Some(el) = state.page.get_mut(eye) {
            el.add_class("eye-spawned");
        }
        state.page.replace_style(
            eye,
            &format!(
                "position:fixed;left:{}vw;top:{}vh;font-size:{};opacity:{};",
                format_number(left),
                format_number(top),
                px(size),
                format_number(opacity)
            ),
        );
        state.page.set_text(eye, "👁");
        state.fx.eyes.push(eye);
    }
    point_eyes(&mut state);
    Dynamic::UNIT
}

/// Turn every spawned eye toward the pointer.
pub fn point_eyes(state: &mut SandboxState) {
    let (px_, py) = state.pointer;
    let eyes = std::mem::take(&mut state.fx.eyes);
    let alive: Vec<ElementId> = eyes
        .into_iter()
        .filter(|&eye| state.page.is_connected(eye))
        .collect();
    for &eye in &alive {
        let r = state.page.rect(eye);
        let angle = (py - r.y - r.height / 2.0).atan2(px_ - r.x - r.width / 2.0);
        let degrees = angle.to_degrees();
        state
            .page
            .set_style(eye, "transform", &format!("rotate({}deg)", format_number(degrees)));
    }
    state.fx.eyes = alive;
}

fn fracture(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    let Some(stage) = state.element("stage") else {
        return Dynamic::UNIT;
    };
    let points: Vec<String> = (0..6)
        .map(|_| {
            let x = state.random() * 100.0;
            let y = state.random() * 100.0;
            format!("{}% {}%", format_number(x), format_number(y))
        })
        .collect();
    state
        .page
        .set_style(stage, "clip-path", &format!("polygon({})", points.join(",")));
    state.schedule_effect(6000, None, None, EffectStep::restyle(stage, &[("clip-path", "")]));
    Dynamic::UNIT
}

/// Undo every stage and body distortion.
pub fn heal_page(state: &mut SandboxState) {
    if let Some(stage) = state.element("stage") {
        for prop in ["clip-path", "filter", "transform", "background"] {
            state.page.clear_style(stage, prop);
        }
    }
    let body = state.page.body();
    for prop in ["transform", "filter", "background", "cursor"] {
        state.page.clear_style(body, prop);
    }
    state.page.cursor = "default".to_string();
}

fn heal(inv: &Invocation, _args: &Args) -> Dynamic {
    heal_page(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

fn mirror(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    toggle_style(&mut state, body, "transform", "scaleX(-1)");
    Dynamic::UNIT
}

fn invert(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    toggle_style(&mut state, body, "filter", "invert(1)");
    Dynamic::UNIT
}

fn hue(inv: &Invocation, args: &Args) -> Dynamic {
    let degrees = args.number(0).unwrap_or(0.0).clamp(-3600.0, 3600.0);
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    state
        .page
        .set_style(body, "filter", &format!("hue-rotate({}deg)", format_number(degrees)));
    state.schedule_effect(8000, None, None, EffectStep::restyle(body, &[("filter", "")]));
    Dynamic::UNIT
}

fn blur(inv: &Invocation, args: &Args) -> Dynamic {
    let radius = args.number(0).unwrap_or(0.0).clamp(0.0, 50.0);
    let mut state = inv.state.borrow_mut();
    let Some(stage) = state.element("stage") else {
        return Dynamic::UNIT;
    };
    state
        .page
        .set_style(stage, "filter", &format!("blur({})", px(radius)));
    state.schedule_effect(5000, None, None, EffectStep::restyle(stage, &[("filter", "")]));
    Dynamic::UNIT
}

fn stage_children(state: &SandboxState) -> Vec<ElementId> {
    let Some(stage) = state.element("stage") else {
        return Vec::new();
    };
    state
        .page
        .get(stage)
        .map(|el| el.children.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|&child| {
            state
                .page
                .get(child)
                .map_or(false, |el| !el.is_text() && el.id.as_deref() != Some("input-area"))
        })
        .collect()
}

fn morph(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    for child in stage_children(&state) {
        let left = state.random() * 70.0;
        let top = state.random() * 70.0;
        let tilt = (state.random() - 0.5) * 60.0;
        state.page.set_style(child, "position", "fixed");
        state
            .page
            .set_style(child, "left", &format!("{}vw", format_number(left)));
        state
            .page
            .set_style(child, "top", &format!("{}vh", format_number(top)));
        state
            .page
            .set_style(child, "transform", &format!("rotate({}deg)", format_number(tilt)));
    }
    state.schedule_effect(MORPH_MS, None, None, EffectStep::Unmorph);
    Dynamic::UNIT
}

pub(super) fn unmorph(state: &mut SandboxState) {
    for child in stage_children(state) {
        for prop in ["position", "left", "top", "transform"] {
            state.page.clear_style(child, prop);
        }
    }
}

fn unmorph_entry(inv: &Invocation, _args: &Args) -> Dynamic {
    unmorph(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

fn cursor(inv: &Invocation, args: &Args) -> Dynamic {
    let value = args.text(0).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    state.page.set_style(body, "cursor", &value);
    state.page.cursor = if value.trim().is_empty() {
        "default".to_string()
    } else {
        value
    };
    Dynamic::UNIT
}

fn crt(inv: &Invocation, args: &Args) -> Dynamic {
    let intensity = args.number(0).unwrap_or(1.0);
    let mut state = inv.state.borrow_mut();
    let Some(crt) = state.element("crt") else {
        return Dynamic::UNIT;
    };
    if intensity <= 0.0 {
        state.page.set_style(crt, "display", "none");
    } else {
        state.page.clear_style(crt, "display");
        state
            .page
            .set_style(crt, "opacity", &format_number(intensity.min(1.0)));
    }
    Dynamic::UNIT
}

fn crt_color(inv: &Invocation, args: &Args) -> Dynamic {
    let color = args.text_or(0, "transparent");
    let mut state = inv.state.borrow_mut();
    if let Some(crt) = state.element("crt") {
        state
            .page
            .set_style(crt, "box-shadow", &format!("inset 0 0 150px {color}"));
    }
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
                seed: Some(5),
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

    fn advance(state: &Shared, now_ms: u64) {
        let mut s = state.borrow_mut();
        s.now_ms = now_ms;
        while let Some(task) = s.timers.pop_due(now_ms) {
            if let TaskAction::Effect(step) = task.action {
                run_effect_step(&mut s, step);
            }
        }
    }

    fn style(state: &Shared, id: &str, prop: &str) -> Option<String> {
        let s = state.borrow();
        let el = s.element(id)?;
        s.page.get(el)?.style.get(prop).cloned()
    }

    fn body_style(state: &Shared, prop: &str) -> Option<String> {
        let s = state.borrow();
        let body = s.page.body();
        s.page.get(body)?.style.get(prop).cloned()
    }

    #[test]
    fn shake_jitters_then_clears() {
        let state = shared();
        call(&state, shake, vec![Dynamic::from_int(20), Dynamic::from_int(100)]);
        advance(&state, 0);
        assert!(body_style(&state, "transform").is_some_and(|t| t.starts_with("translate(")));
        for t in (16..=100).step_by(16) {
            advance(&state, t);
        }
        advance(&state, 100);
        assert_eq!(body_style(&state, "transform"), None);
        assert!(state.borrow().timers.is_empty());
    }

    #[test]
    fn blackout_is_capped() {
        let state = shared();
        call(&state, blackout, vec![Dynamic::from_int(60_000)]);
        assert_eq!(style(&state, "overlay", "opacity").as_deref(), Some("1"));
        advance(&state, 7999);
        assert_eq!(style(&state, "overlay", "opacity").as_deref(), Some("1"));
        advance(&state, 8000);
        assert_eq!(style(&state, "overlay", "opacity").as_deref(), Some("0"));
    }

    #[test]
    fn strobe_toggles_and_settles() {
        let state = shared();
        call(&state, strobe, vec![Dynamic::from_int(400), Dynamic::from_int(100)]);
        advance(&state, 100);
        assert_eq!(style(&state, "overlay", "background-color").as_deref(), Some("#fff"));
        advance(&state, 200);
        assert_eq!(
            style(&state, "overlay", "background-color").as_deref(),
            Some("transparent")
        );
        advance(&state, 400);
        assert_eq!(style(&state, "overlay", "opacity").as_deref(), Some("0"));
        assert_eq!(style(&state, "overlay", "background-color"), None);
    }

    #[test]
    fn rain_drops_fall_and_vanish() {
        let state = shared();
        call(&state, rain, vec!["x".into(), Dynamic::from_int(200)]);
        let spawned_children = |state: &Shared| {
            let s = state.borrow();
            let spawned = s.element("spawned").expect("spawned layer");
            s.page.get(spawned).map_or(0, |el| el.children.len())
        };
        assert_eq!(spawned_children(&state), 40);
        advance(&state, 16);
        assert_eq!(spawned_children(&state), 40);
        advance(&state, 200);
        assert_eq!(spawned_children(&state), 0);
        assert!(state.borrow().timers.is_empty());
    }

    #[test]
    fn portal_handle_restores_the_body() {
        let state = shared();
        let handle = call(&state, portal, vec![]).cast::<VoiceHandle>();
        assert!(body_style(&state, "background").is_some_and(|bg| bg.contains("#7b68ee")));
        assert!(handle.is_active());
        handle.stop();
        handle.stop();
        assert_eq!(body_style(&state, "background"), None);
        assert_eq!(body_style(&state, "animation"), None);
        assert!(state.borrow().page.query("style").is_none());
    }

    #[test]
    fn eyes_follow_the_pointer() {
        let state = shared();
        call(&state, eyes, vec![Dynamic::from_int(500)]);
        assert_eq!(state.borrow().fx.eyes.len(), 50);
        let before = {
            let s = state.borrow();
            let eye = s.fx.eyes[0];
            s.page.get(eye).and_then(|el| el.style.get("transform").cloned())
        };
        {
            let mut s = state.borrow_mut();
            s.pointer = (-5000.0, -5000.0);
            point_eyes(&mut s);
        }
        let after = {
            let s = state.borrow();
            let eye = s.fx.eyes[0];
            s.page.get(eye).and_then(|el| el.style.get("transform").cloned())
        };
        assert!(before.is_some());
        assert_ne!(before, after);
    }

    #[test]
    fn toggles_and_heal() {
        let state = shared();
        call(&state, mirror, vec![]);
        call(&state, invert, vec![]);
        assert_eq!(body_style(&state, "transform").as_deref(), Some("scaleX(-1)"));
        call(&state, mirror, vec![]);
        assert_eq!(body_style(&state, "transform"), None);
        call(&state, fracture, vec![]);
        call(&state, blur, vec![Dynamic::from_int(4)]);
        assert_eq!(style(&state, "stage", "filter").as_deref(), Some("blur(4px)"));
        call(&state, heal, vec![]);
        assert_eq!(body_style(&state, "filter"), None);
        assert_eq!(style(&state, "stage", "clip-path"), None);
        assert_eq!(style(&state, "stage", "filter"), None);
    }

    #[test]
    fn morph_scatters_everything_but_the_input() {
        let state = shared();
        call(&state, morph, vec![]);
        assert_eq!(style(&state, "output", "position").as_deref(), Some("fixed"));
        assert_eq!(style(&state, "input-area", "position"), None);
        advance(&state, MORPH_MS);
        assert_eq!(style(&state, "output", "position"), None);
    }

    #[test]
    fn crt_intensity() {
        let state = shared();
        call(&state, crt, vec![Dynamic::from_float(3.0)]);
        assert_eq!(style(&state, "crt", "opacity").as_deref(), Some("1"));
        call(&state, crt, vec![Dynamic::from_int(0)]);
        assert_eq!(style(&state, "crt", "display").as_deref(), Some("none"));
        call(&state, crt_color, vec!["red".into()]);
        assert_eq!(
            style(&state, "crt", "box-shadow").as_deref(),
            Some("inset 0 0 150px red")
        );
    }
}
