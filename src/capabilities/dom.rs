//! Markup injection, inline styling, page chrome and text effects.

use rhai::Dynamic;

use super::{CapabilityEntry, Category, EffectStep, Invocation};
use crate::engine::{format_number, Args};
use crate::page::ElementId;
use crate::state::{SandboxState, Typewriter};

const SCRAMBLE_GLYPHS: [char; 15] = [
    '◬', '◭', '⟁', '⟐', '⟟', '⟠', '⟡', '⦿', '⦾', '⧫', '⧬', '⨳', '⩘', '⩙', '⪮',
];
const SCRAMBLE_PERIOD_MS: u64 = 40;
const TYPEWRITER_GROUP: &str = "typewriter";

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("inject", Category::Dom, "inject(markup)", inject),
    CapabilityEntry::new("remove", Category::Dom, "remove(sel)", remove),
    CapabilityEntry::new("setStyle", Category::Dom, "setStyle(sel, prop, val)", set_style),
    CapabilityEntry::new("css", Category::Dom, "", set_style),
    CapabilityEntry::new("title", Category::Page, "title(t)", title),
    CapabilityEntry::new("favicon", Category::Page, "favicon(glyph)", favicon),
    CapabilityEntry::new("bg", Category::Page, "bg(css)", bg),
    CapabilityEntry::new("setBg", Category::Page, "setBg(css)", set_bg),
    CapabilityEntry::new(
        "typewriter",
        Category::Page,
        "typewriter(text, sel?, speed_ms?)",
        typewriter,
    ),
    CapabilityEntry::new("scramble", Category::Text, "scramble(sel, ms?)", scramble),
    CapabilityEntry::new("gravity", Category::Text, "gravity(sel)", gravity),
    CapabilityEntry::new("float", Category::Text, "float(sel)", float),
];

/// Elements matching `selector`, or nothing when the selector names a
/// protected target.
fn targets(state: &SandboxState, selector: &str) -> Vec<ElementId> {
    if state.protected.is_dangerous(selector) {
        return Vec::new();
    }
    state.page.query_all(selector)
}

fn inject(inv: &Invocation, args: &Args) -> Dynamic {
    let markup = args.text(0).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    if let Some(spawned) = state.element("spawned") {
        state.page.inject(spawned, &markup);
    }
    Dynamic::UNIT
}

fn remove(inv: &Invocation, args: &Args) -> Dynamic {
    let selector = args.text(0).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    for el in targets(&state, &selector) {
        if !state.is_shielded(el) {
            state.page.remove(el);
        }
    }
    Dynamic::UNIT
}

fn set_style(inv: &Invocation, args: &Args) -> Dynamic {
    let selector = args.text(0).unwrap_or_default();
    let Some(prop) = args.text(1) else {
        return Dynamic::UNIT;
    };
    let value = args.text(2).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    for el in targets(&state, &selector) {
        state.page.set_style(el, &prop, &value);
    }
    Dynamic::UNIT
}

fn title(inv: &Invocation, args: &Args) -> Dynamic {
    inv.state.borrow_mut().page.title = args.text(0).unwrap_or_default();
    Dynamic::UNIT
}

fn favicon(inv: &Invocation, args: &Args) -> Dynamic {
    let glyph = args.text(0).unwrap_or_default();
    inv.state.borrow_mut().page.favicon = format!(
        "data:image/svg+xml,<svg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 100 100'><text y='.9em' font-size='90'>{glyph}</text></svg>"
    );
    Dynamic::UNIT
}

fn bg(inv: &Invocation, args: &Args) -> Dynamic {
    let value = args.text(0).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    let body = state.page.body();
    state.page.set_style(body, "background", &value);
    Dynamic::UNIT
}

fn set_bg(inv: &Invocation, args: &Args) -> Dynamic {
    let value = args.text(0).unwrap_or_default();
    let mut state = inv.state.borrow_mut();
    if let Some(stage) = state.element("stage") {
        state.page.set_style(stage, "background", &value);
    }
    Dynamic::UNIT
}

/// Reveal `text` one character per tick in `selector`. Starting a new run
/// abandons the previous one.
pub fn start_typewriter(state: &mut SandboxState, text: &str, selector: &str, speed_ms: u64) {
    state.timers.cancel_group(TYPEWRITER_GROUP);
    state.fx.typewriter = None;
    let Some(element) = state.page.query(selector) else {
        return;
    };
    state.page.set_text(element, "");
    state.fx.typewriter = Some(Typewriter {
        element,
        chars: text.chars().collect(),
        pos: 0,
    });
    state.schedule_effect(
        speed_ms,
        Some(speed_ms),
        Some(TYPEWRITER_GROUP),
        EffectStep::TypewriterStep,
    );
}

fn typewriter(inv: &Invocation, args: &Args) -> Dynamic {
    let text = args.text(0).unwrap_or_default();
    let selector = args.text_or(1, "#output");
    let speed = args.clamped(2, 35.0, 5.0, 1000.0) as u64;
    start_typewriter(&mut inv.state.borrow_mut(), &text, &selector, speed);
    Dynamic::UNIT
}

pub(super) fn typewriter_step(state: &mut SandboxState) {
    let Some(mut run) = state.fx.typewriter.take() else {
        state.timers.cancel_group(TYPEWRITER_GROUP);
        return;
    };
    if run.pos >= run.chars.len() || !state.page.is_connected(run.element) {
        state.timers.cancel_group(TYPEWRITER_GROUP);
        return;
    }
    run.pos += 1;
    let shown: String = run.chars[..run.pos].iter().collect();
    state.page.set_text(run.element, &shown);
    state.fx.typewriter = Some(run);
}

fn scramble(inv: &Invocation, args: &Args) -> Dynamic {
    let selector = args.text(0).unwrap_or_default();
    let duration = args.clamped(1, 1200.0, 40.0, 10_000.0) as u64;
    let mut state = inv.state.borrow_mut();
    let Some(element) = targets(&state, &selector).into_iter().next() else {
        return Dynamic::UNIT;
    };
    let original = state.page.text_content(element);
    let group = state.fx.group("scramble");
    let started_ms = state.now_ms;
    state.schedule_effect(
        SCRAMBLE_PERIOD_MS,
        Some(SCRAMBLE_PERIOD_MS),
        Some(&group),
        EffectStep::ScrambleStep {
            element,
            original,
            started_ms,
            duration_ms: duration,
            group: group.clone(),
        },
    );
    Dynamic::UNIT
}

pub(super) fn scramble_step(
    state: &mut SandboxState,
    element: ElementId,
    original: &str,
    started_ms: u64,
    duration_ms: u64,
    group: &str,
) {
    let progress = state.now_ms.saturating_sub(started_ms) as f64 / duration_ms.max(1) as f64;
    if progress >= 1.0 || !state.page.is_connected(element) {
        state.page.set_text(element, original);
        state.timers.cancel_group(group);
        return;
    }
    let len = original.chars().count().max(1) as f64;
    let mut out = String::with_capacity(original.len());
    for (idx, ch) in original.chars().enumerate() {
        if idx as f64 / len < progress || ch == ' ' {
            out.push(ch);
        } else {
            let pick = (state.random() * SCRAMBLE_GLYPHS.len() as f64) as usize;
            out.push(SCRAMBLE_GLYPHS[pick.min(SCRAMBLE_GLYPHS.len() - 1)]);
        }
    }
    state.page.set_text(element, &out);
}

/// Send matches to an end state along a transition; they stay in the tree.
fn animate_out(
    inv: &Invocation,
    selector: &str,
    transform: impl Fn(&mut SandboxState) -> String,
    ms: u64,
    easing: &str,
) {
    let mut state = inv.state.borrow_mut();
    let transition = format!("transform {ms}ms {easing}, opacity {ms}ms {easing}");
    for el in targets(&state, selector) {
        let end = transform(&mut state);
        state.page.set_style(el, "transition", &transition);
        state.page.set_style(el, "transform", &end);
        state.page.set_style(el, "opacity", "0");
    }
}

fn gravity(inv: &Invocation, args: &Args) -> Dynamic {
    let selector = args.text(0).unwrap_or_default();
    animate_out(
        inv,
        &selector,
        |state| {
            let fall = format_number(state.page.viewport.height);
            let spin = format_number(state.random() * 360.0);
            format!("translateY({fall}px) rotate({spin}deg)")
        },
        1200,
        "ease-in",
    );
    Dynamic::UNIT
}

fn float(inv: &Invocation, args: &Args) -> Dynamic {
    let selector = args.text(0).unwrap_or_default();
    animate_out(
        inv,
        &selector,
        |state| format!("translateY(-{}px)", format_number(state.page.viewport.height)),
        2000,
        "ease-out",
    );
    Dynamic::UNIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{run_effect_step, Handler};
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

    fn call(state: &Shared, handler: Handler, args: &[&str]) {
        let engine = Engine::new();
        handler(
            &Invocation {
                engine: &engine,
                state,
            },
            &Args::new(args.iter().map(|a| Dynamic::from(a.to_string())).collect()),
        );
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

    fn text_of(state: &Shared, selector: &str) -> String {
        let s = state.borrow();
        s.page
            .query(selector)
            .map(|el| s.page.text_content(el))
            .unwrap_or_default()
    }

    #[test]
    fn inject_lands_in_the_spawned_layer() {
        let state = shared();
        call(&state, inject, &[r#"<p class="omen">it sees</p><script>x()</script>"#]);
        let s = state.borrow();
        let omen = s.page.query("#spawned .omen").expect("injected paragraph");
        assert_eq!(s.page.text_content(omen), "it sees");
        assert!(s.page.query("script").is_none());
    }

    #[test]
    fn protected_targets_are_left_alone() {
        let state = shared();
        call(&state, remove, &["body"]);
        call(&state, set_style, &["html", "display", "none"]);
        call(&state, remove, &["div"]);
        let s = state.borrow();
        let html = s.page.root();
        assert!(s.page.get(html).is_some_and(|el| el.style.is_empty()));
        assert!(s.element("stage").is_some());
        assert!(s.element("overlay").is_some());
    }

    #[test]
    fn css_alias_styles_every_match() {
        let state = shared();
        call(&state, inject, &["<i class='r'>a</i><i class='r'>b</i>"]);
        call(&state, set_style, &[".r", "color", "red"]);
        let s = state.borrow();
        for el in s.page.query_all(".r") {
            assert_eq!(s.page.get(el).and_then(|e| e.style.get("color")).map(String::as_str), Some("red"));
        }
        drop(s);
        call(&state, remove, &[".r"]);
        assert!(state.borrow().page.query(".r").is_none());
    }

    #[test]
    fn page_chrome() {
        let state = shared();
        call(&state, title, &["it sees you"]);
        call(&state, favicon, &["◬"]);
        call(&state, set_bg, &["#200"]);
        let s = state.borrow();
        assert_eq!(s.page.title, "it sees you");
        assert!(s.page.favicon.contains("◬"));
        let stage = s.element("stage").expect("stage");
        assert_eq!(s.page.get(stage).and_then(|e| e.style.get("background")).map(String::as_str), Some("#200"));
    }

    #[test]
    fn typewriter_reveals_one_character_per_tick() {
        let state = shared();
        call(&state, typewriter, &["abc", "#output", "10"]);
        assert_eq!(text_of(&state, "#output"), "");
        advance(&state, 10);
        assert_eq!(text_of(&state, "#output"), "a");
        advance(&state, 20);
        advance(&state, 30);
        assert_eq!(text_of(&state, "#output"), "abc");
        advance(&state, 40);
        assert!(!state.borrow().timers.has_group(TYPEWRITER_GROUP));
        assert!(state.borrow().fx.typewriter.is_none());
    }

    #[test]
    fn scramble_restores_the_original_text() {
        let state = shared();
        {
            let mut s = state.borrow_mut();
            let output = s.element("output").expect("output");
            s.page.set_text(output, "the void listens");
        }
        call(&state, scramble, &["#output", "400"]);
        advance(&state, 40);
        let mid = text_of(&state, "#output");
        assert_eq!(mid.chars().count(), "the void listens".chars().count());
        assert_ne!(mid, "the void listens");
        advance(&state, 400);
        assert_eq!(text_of(&state, "#output"), "the void listens");
        assert!(state.borrow().timers.is_empty());
    }

    #[test]
    fn gravity_and_float_fade_matches() {
        let state = shared();
        call(&state, inject, &["<b class='g'>x</b><b class='f'>y</b>"]);
        call(&state, gravity, &[".g"]);
        call(&state, float, &[".f"]);
        let s = state.borrow();
        let g = s.page.query(".g").expect("g");
        let f = s.page.query(".f").expect("f");
        let gs = &s.page.get(g).expect("g element").style;
        assert!(gs.get("transform").is_some_and(|t| t.starts_with("translateY(800px) rotate(")));
        assert_eq!(gs.get("opacity").map(String::as_str), Some("0"));
        let fs = &s.page.get(f).expect("f element").style;
        assert_eq!(fs.get("transform").map(String::as_str), Some("translateY(-800px)"));
    }
}
