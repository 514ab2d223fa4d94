//! Tampering with the prompt input, and the forced-choice buttons that
//! temporarily replace it.

use bevy::log::debug;
use rhai::Dynamic;

use super::{CapabilityEntry, Category, EffectStep, Invocation};
use crate::engine::{format_number, to_text, Args};
use crate::events::SandboxEvent;
use crate::page::ElementId;
use crate::state::SandboxState;

pub const MAX_OPTIONS: usize = 8;
pub const OPTIONS_TIMEOUT_MS: u64 = 15_000;
const OPTIONS_GROUP: &str = "options";

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("moveInput", Category::Input, "moveInput(x, y)", move_input),
    CapabilityEntry::new("flipInput", Category::Input, "flipInput()", flip_input),
    CapabilityEntry::new("spinInput", Category::Input, "spinInput(deg?)", spin_input),
    CapabilityEntry::new("hideInput", Category::Input, "hideInput()", hide_input),
    CapabilityEntry::new("showInput", Category::Input, "showInput()", show_input),
    CapabilityEntry::new("resetInput", Category::Input, "resetInput()", reset_input),
    CapabilityEntry::new("resizeInput", Category::Input, "resizeInput(w)", resize_input),
    CapabilityEntry::new("showOptions", Category::Choice, "showOptions([labels])", show_options),
    CapabilityEntry::new("hideOptions", Category::Choice, "hideOptions()", hide_options_entry),
];

fn with_area(inv: &Invocation, f: impl FnOnce(&mut SandboxState, ElementId)) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    if let Some(area) = state.element("input-area") {
        f(&mut state, area);
    }
    Dynamic::UNIT
}

fn move_input(inv: &Invocation, args: &Args) -> Dynamic {
    let x = args.number(0).unwrap_or(0.0);
    let y = args.number(1).unwrap_or(0.0);
    with_area(inv, |state, area| {
        let vp = state.page.viewport;
        let reserve = if vp.is_mobile() { 80.0 } else { 200.0 };
        let x = x.min(vp.width - reserve).max(0.0);
        let y = y.min(vp.height - 60.0).max(0.0);
        state.page.set_style(area, "position", "fixed");
        state.page.set_style(area, "left", &format!("{}px", format_number(x)));
        state.page.set_style(area, "top", &format!("{}px", format_number(y)));
        state.page.set_style(area, "z-index", "500");
    })
}

fn flip_input(inv: &Invocation, _args: &Args) -> Dynamic {
    with_area(inv, |state, area| {
        state.page.set_style(area, "transform", "scaleY(-1)");
    })
}

fn spin_input(inv: &Invocation, args: &Args) -> Dynamic {
    let degrees = args.number_or(0, 180.0).clamp(-3600.0, 3600.0);
    with_area(inv, |state, area| {
        state
            .page
            .set_style(area, "transform", &format!("rotate({}deg)", format_number(degrees)));
    })
}

fn hide_input(inv: &Invocation, _args: &Args) -> Dynamic {
    with_area(inv, |state, area| {
        state.page.set_style(area, "display", "none");
    })
}

fn show_input(inv: &Invocation, _args: &Args) -> Dynamic {
    let mut state = inv.state.borrow_mut();
    if let Some(area) = state.element("input-area") {
        state.page.clear_style(area, "display");
        state.page.set_style(area, "visibility", "visible");
        state.page.set_style(area, "opacity", "1");
    }
    if let Some(input) = state.element("prompt-input") {
        state.page.clear_style(input, "display");
        if let Some(el) = state.page.get_mut(input) {
            el.disabled = false;
        }
    }
    Dynamic::UNIT
}

fn reset_input(inv: &Invocation, _args: &Args) -> Dynamic {
    with_area(inv, |state, area| {
        for prop in ["position", "left", "top", "z-index", "transform"] {
            state.page.clear_style(area, prop);
        }
    })
}

fn resize_input(inv: &Invocation, args: &Args) -> Dynamic {
    let width = match args.get(0) {
        Some(value) if value.is_int() || value.is_float() => {
            format!("{}px", format_number(args.number(0).unwrap_or(0.0).max(0.0)))
        }
        Some(value) => to_text(value),
        None => return Dynamic::UNIT,
    };
    let mut state = inv.state.borrow_mut();
    if let Some(input) = state.element("prompt-input") {
        state.page.set_style(input, "width", &width);
    }
    Dynamic::UNIT
}

fn show_options(inv: &Invocation, args: &Args) -> Dynamic {
    let Some(labels) = args.array(0) else {
        return Dynamic::UNIT;
    };
    let labels: Vec<String> = labels.iter().map(to_text).take(MAX_OPTIONS).collect();
    let mut state = inv.state.borrow_mut();
    let (Some(input), Some(options)) = (state.element("prompt-input"), state.element("options"))
    else {
        return Dynamic::UNIT;
    };
    state.timers.cancel_group(OPTIONS_GROUP);
    state.page.set_style(input, "display", "none");
    state.page.clear_children(options);
    if let Some(el) = state.page.get_mut(options) {
        el.add_class("active");
    }
    state.page.set_style(options, "display", "flex");
    for label in &labels {
        let button = state.page.create_element("button");
        state.page.set_text(button, label);
        state.page.append_child(options, button);
    }
    state.fx.options_active = true;
    state.schedule_effect(OPTIONS_TIMEOUT_MS, None, Some(OPTIONS_GROUP), EffectStep::HideOptions);
    debug!("[Ritual choice] Offering {} options", labels.len());
    Dynamic::UNIT
}

/// Put the free-text input back and drop every option button.
pub fn hide_options(state: &mut SandboxState) {
    state.timers.cancel_group(OPTIONS_GROUP);
    state.fx.options_active = false;
    if let Some(input) = state.element("prompt-input") {
        state.page.clear_style(input, "display");
    }
    if let Some(options) = state.element("options") {
        state.page.clear_children(options);
        state.page.clear_style(options, "display");
        if let Some(el) = state.page.get_mut(options) {
            el.remove_class("active");
        }
    }
}

fn hide_options_entry(inv: &Invocation, _args: &Args) -> Dynamic {
    hide_options(&mut inv.state.borrow_mut());
    Dynamic::UNIT
}

/// Press the option button labelled `label`. Returns false when no choice is
/// on offer or nothing carries that label.
pub fn select_option(state: &mut SandboxState, label: &str) -> bool {
    if !state.fx.options_active {
        return false;
    }
    let Some(options) = state.element("options") else {
        return false;
    };
    let offered = state
        .page
        .query_all_within(options, "button", false)
        .into_iter()
        .any(|button| state.page.text_content(button) == label);
    if !offered {
        return false;
    }
    hide_options(state);
    state.emit(SandboxEvent::OptionSelected {
        label: label.to_string(),
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{run_effect_step, Handler};
    use crate::config::SandboxConfig;
    use crate::registry::NoCaptureDevice;
    use crate::state::{Shared, TaskAction};
    use rhai::{Array, Engine};

    fn shared() -> Shared {
        SandboxState::new(SandboxConfig::default(), Box::new(NoCaptureDevice)).into_shared()
    }

    fn call(state: &Shared, handler: Handler, args: Vec<Dynamic>) {
        let engine = Engine::new();
        handler(
            &Invocation {
                engine: &engine,
                state,
            },
            &Args::new(args),
        );
    }

    fn area_style(state: &Shared, prop: &str) -> Option<String> {
        let s = state.borrow();
        let area = s.element("input-area")?;
        s.page.get(area)?.style.get(prop).cloned()
    }

    fn labels(xs: &[&str]) -> Dynamic {
        Dynamic::from(xs.iter().map(|x| Dynamic::from(x.to_string())).collect::<Array>())
    }

    #[test]
    fn move_is_clamped_to_the_viewport() {
        let state = shared();
        call(&state, move_input, vec![Dynamic::from_int(99_999), Dynamic::from_int(-40)]);
        assert_eq!(area_style(&state, "left").as_deref(), Some("1080px"));
        assert_eq!(area_style(&state, "top").as_deref(), Some("0px"));
        assert_eq!(area_style(&state, "position").as_deref(), Some("fixed"));
        call(&state, reset_input, vec![]);
        assert_eq!(area_style(&state, "position"), None);
        assert_eq!(area_style(&state, "z-index"), None);
    }

    #[test]
    fn spin_defaults_to_half_a_turn() {
        let state = shared();
        call(&state, spin_input, vec![]);
        assert_eq!(area_style(&state, "transform").as_deref(), Some("rotate(180deg)"));
        call(&state, flip_input, vec![]);
        assert_eq!(area_style(&state, "transform").as_deref(), Some("scaleY(-1)"));
    }

    #[test]
    fn hide_then_show() {
        let state = shared();
        call(&state, hide_input, vec![]);
        assert_eq!(area_style(&state, "display").as_deref(), Some("none"));
        call(&state, show_input, vec![]);
        assert_eq!(area_style(&state, "display"), None);
        assert_eq!(area_style(&state, "opacity").as_deref(), Some("1"));
    }

    #[test]
    fn resize_accepts_numbers_and_css() {
        let state = shared();
        let width = |state: &Shared| {
            let s = state.borrow();
            let input = s.element("prompt-input").expect("input");
            s.page.get(input).and_then(|el| el.style.get("width").cloned())
        };
        call(&state, resize_input, vec![Dynamic::from_int(120)]);
        assert_eq!(width(&state).as_deref(), Some("120px"));
        call(&state, resize_input, vec!["40%".into()]);
        assert_eq!(width(&state).as_deref(), Some("40%"));
    }

    #[test]
    fn options_replace_the_input_and_select_once() {
        let state = shared();
        let many: Vec<String> = (0..12).map(|i| format!("o{i}")).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        call(&state, show_options, vec![labels(&many)]);
        {
            let s = state.borrow();
            let options = s.element("options").expect("options");
            assert_eq!(s.page.query_all_within(options, "button", false).len(), MAX_OPTIONS);
        }
        call(&state, show_options, vec![labels(&["yes", "no"])]);
        let mut s = state.borrow_mut();
        assert!(!select_option(&mut s, "maybe"));
        assert!(select_option(&mut s, "no"));
        assert!(!select_option(&mut s, "no"));
        let events = s.events.drain_new();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            SandboxEvent::OptionSelected {
                label: "no".to_string()
            }
        );
        assert!(s.timers.is_empty());
        let input = s.element("prompt-input").expect("input");
        assert!(s.page.get(input).is_some_and(|el| el.style.get("display").is_none()));
    }

    #[test]
    fn unanswered_options_revert_after_the_timeout() {
        let state = shared();
        call(&state, show_options, vec![labels(&["stay", "go"])]);
        let mut s = state.borrow_mut();
        s.now_ms = OPTIONS_TIMEOUT_MS;
        while let Some(task) = s.timers.pop_due(OPTIONS_TIMEOUT_MS) {
            if let TaskAction::Effect(step) = task.action {
                run_effect_step(&mut s, step);
            }
        }
        assert!(!s.fx.options_active);
        let options = s.element("options").expect("options");
        assert!(s.page.get(options).is_some_and(|el| el.children.is_empty() && !el.has_class("active")));
    }
}
