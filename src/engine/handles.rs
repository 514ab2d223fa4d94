//! Script-visible handles: the `V` API object, element references, voices
//! and the capture sub-object.

use rhai::{Array, Dynamic, Engine, FnPtr, ImmutableString, Map, INT};

use super::{number_dynamic, register_variadic, to_text, Args, ScriptCallback};
use crate::capabilities::{fx, Category};
use crate::page::{normalize_property, ElementId};
use crate::registry::VoiceId;
use crate::state::{SandboxState, Shared};

/// The ritual API object, bound as both `V` and `VOID`.
#[derive(Clone)]
pub struct RitualApi {
    pub state: Shared,
}

impl RitualApi {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }
}

/// `V.capture` / `V.webcam`.
#[derive(Clone)]
pub struct CaptureApi {
    state: Shared,
    enabled: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StopTarget {
    Drone(VoiceId),
    Group(String),
    Portal,
    Noop,
}

/// Returned by sustained sounds and effects; `stop()` is idempotent.
#[derive(Clone)]
pub struct VoiceHandle {
    state: Shared,
    pub target: StopTarget,
}

impl VoiceHandle {
    pub fn new(state: &Shared, target: StopTarget) -> Self {
        Self {
            state: state.clone(),
            target,
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.borrow_mut();
        match &self.target {
            StopTarget::Drone(id) => {
                state.stop_drone(*id);
            }
            StopTarget::Group(group) => {
                state.timers.cancel_group(group);
            }
            StopTarget::Portal => fx::close_portal(&mut state),
            StopTarget::Noop => {}
        }
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.borrow();
        match &self.target {
            StopTarget::Drone(id) => state.drones.contains(*id),
            StopTarget::Group(group) => state.timers.has_group(group),
            StopTarget::Portal => state.fx.portal.is_some(),
            StopTarget::Noop => false,
        }
    }
}

/// A page element as seen by scripts. A reference without a target, or whose
/// element has been removed, is inert: methods do nothing and getters return
/// neutral values.
#[derive(Clone)]
pub struct ElementRef {
    state: Shared,
    target: Option<ElementId>,
}

impl ElementRef {
    pub fn new(state: &Shared, target: Option<ElementId>) -> Self {
        Self {
            state: state.clone(),
            target,
        }
    }

    pub fn target(&self) -> Option<ElementId> {
        self.target
    }

    fn live(&self, state: &SandboxState) -> Option<ElementId> {
        self.target.filter(|&id| state.page.is_connected(id))
    }

    fn read<T>(&self, default: T, f: impl FnOnce(&SandboxState, ElementId) -> T) -> T {
        let state = self.state.borrow();
        match self.live(&state) {
            Some(id) => f(&state, id),
            None => default,
        }
    }

    fn write(&self, f: impl FnOnce(&mut SandboxState, ElementId)) {
        let mut state = self.state.borrow_mut();
        if let Some(id) = self.live(&state) {
            f(&mut state, id);
        }
    }

    /// Like `write`, but refused for protected structural elements.
    fn write_unprotected(&self, f: impl FnOnce(&mut SandboxState, ElementId)) {
        self.write(|state, id| {
            if !state.is_shielded(id) {
                f(state, id);
            }
        });
    }

    fn attribute(&self, name: &str) -> Dynamic {
        self.read(Dynamic::UNIT, |state, id| {
            state
                .page
                .get(id)
                .and_then(|el| el.attribute(name))
                .map_or(Dynamic::UNIT, Dynamic::from)
        })
    }

    fn set_attribute(&self, name: &str, value: &Dynamic) {
        let name = name.trim().to_ascii_lowercase();
        if name.starts_with("on") || name.is_empty() {
            return;
        }
        let value = to_text(value);
        self.write_unprotected(|state, id| state.page.set_attribute(id, &name, &value));
    }

    fn query(&self, selector: &str) -> ElementRef {
        let found = self.read(None, |state, id| {
            state.page.query_all_within(id, selector, false).into_iter().next()
        });
        ElementRef::new(&self.state, found)
    }

    fn query_all(&self, selector: &str) -> Array {
        let found = self.read(Vec::new(), |state, id| {
            state.page.query_all_within(id, selector, false)
        });
        found
            .into_iter()
            .map(|id| Dynamic::from(ElementRef::new(&self.state, Some(id))))
            .collect()
    }

    fn set_text(&self, text: &Dynamic) {
        let text = to_text(text);
        self.write_unprotected(|state, id| state.page.set_text(id, &text));
    }

    fn set_markup(&self, markup: &Dynamic) {
        let markup = to_text(markup);
        self.write_unprotected(|state, id| {
            state.page.set_inner_markup(id, &markup);
        });
    }

    fn remove(&self) {
        self.write_unprotected(|state, id| {
            state.page.remove(id);
        });
    }

    fn add_listener(&self, event: &str, handler: FnPtr) {
        let Some(target) = self.target else {
            return;
        };
        let Some(callback) = ScriptCallback::capture(&self.state, handler) else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if state.page.is_connected(target) {
            state.listeners.add(event, Some(target), callback);
        }
    }

    fn rect(&self) -> Map {
        let rect = self.read(Default::default(), |state, id| state.page.rect(id));
        let mut out = Map::new();
        for (key, value) in [
            ("x", rect.x),
            ("y", rect.y),
            ("left", rect.x),
            ("top", rect.y),
            ("width", rect.width),
            ("height", rect.height),
            ("right", rect.right()),
            ("bottom", rect.bottom()),
        ] {
            out.insert(key.into(), number_dynamic(value));
        }
        out
    }
}

/// `element.style`, writing straight through to the page.
#[derive(Clone)]
pub struct StyleRef {
    element: ElementRef,
}

impl StyleRef {
    fn get(&self, prop: &str) -> String {
        self.element.read(String::new(), |state, id| {
            state
                .page
                .get(id)
                .and_then(|el| el.style.get(&normalize_property(prop)).cloned())
                .unwrap_or_default()
        })
    }

    fn set(&self, prop: &str, value: &Dynamic) {
        let value = to_text(value);
        self.element
            .write_unprotected(|state, id| state.page.set_style(id, prop, &value));
    }
}

#[derive(Clone)]
pub struct ClassListRef {
    element: ElementRef,
}

impl ClassListRef {
    fn contains(&self, class: &str) -> bool {
        self.element.read(false, |state, id| {
            state.page.get(id).map_or(false, |el| el.has_class(class))
        })
    }

    fn update(&self, f: impl FnOnce(&mut crate::page::Element)) {
        self.element.write(|state, id| {
            if let Some(el) = state.page.get_mut(id) {
                f(el);
            }
        });
    }
}

pub fn query(state: &Shared, selector: &str) -> ElementRef {
    let found = state.borrow().page.query(selector);
    ElementRef::new(state, found)
}

pub fn query_all(state: &Shared, selector: &str) -> Array {
    let found = state.borrow().page.query_all(selector);
    found
        .into_iter()
        .map(|id| Dynamic::from(ElementRef::new(state, Some(id))))
        .collect()
}

pub fn capture_api(state: &Shared) -> CaptureApi {
    let enabled = !state.borrow().config.disabled_capabilities.iter().any(|name| {
        let name = name.trim();
        name.eq_ignore_ascii_case(Category::Capture.name())
            || name == "capture"
            || name == "webcam"
    });
    CaptureApi {
        state: state.clone(),
        enabled,
    }
}

pub(super) fn register(engine: &mut Engine, state: &Shared) {
    engine
        .register_type_with_name::<RitualApi>("RitualApi")
        .register_type_with_name::<CaptureApi>("CaptureApi")
        .register_type_with_name::<VoiceHandle>("VoiceHandle")
        .register_type_with_name::<ElementRef>("Element")
        .register_type_with_name::<StyleRef>("Style")
        .register_type_with_name::<ClassListRef>("ClassList");

    register_api(engine);
    register_voice(engine);
    register_capture(engine);
    register_element(engine);
    register_style(engine);

    let scope_state = state.clone();
    engine.register_fn("query", move |selector: ImmutableString| {
        query(&scope_state, selector.as_str())
    });
    let scope_state = state.clone();
    engine.register_fn("queryAll", move |selector: ImmutableString| {
        query_all(&scope_state, selector.as_str())
    });
}

fn register_api(engine: &mut Engine) {
    engine
        .register_get("width", |api: &mut RitualApi| {
            number_dynamic(api.state.borrow().config.viewport.width)
        })
        .register_get("height", |api: &mut RitualApi| {
            number_dynamic(api.state.borrow().config.viewport.height)
        })
        .register_get("mouseX", |api: &mut RitualApi| {
            number_dynamic(api.state.borrow().pointer.0)
        })
        .register_get("mouseY", |api: &mut RitualApi| {
            number_dynamic(api.state.borrow().pointer.1)
        })
        .register_get("hasCapture", |api: &mut RitualApi| {
            capture_api(&api.state).enabled && api.state.borrow().capture.available()
        })
        .register_get("hasWebcam", |api: &mut RitualApi| {
            capture_api(&api.state).enabled && api.state.borrow().capture.available()
        })
        .register_get("has3D", |api: &mut RitualApi| {
            api.state.borrow().scene.live().is_some()
        })
        .register_get("capture", |api: &mut RitualApi| capture_api(&api.state))
        .register_get("webcam", |api: &mut RitualApi| capture_api(&api.state))
        // Unknown properties read as unit rather than failing the ritual.
        .register_indexer_get(|_api: &mut RitualApi, _name: ImmutableString| Dynamic::UNIT);
}

fn register_voice(engine: &mut Engine) {
    engine
        .register_fn("stop", |voice: VoiceHandle| voice.stop())
        .register_get("active", |voice: &mut VoiceHandle| voice.is_active())
        .register_get("id", |voice: &mut VoiceHandle| match voice.target {
            StopTarget::Drone(id) => id as INT,
            _ => 0,
        });
}

fn register_capture(engine: &mut Engine) {
    engine
        .register_fn("start", |api: CaptureApi| {
            if !api.enabled {
                return false;
            }
            let mut state = api.state.borrow_mut();
            let started = state.capture.start().is_ok();
            if let Some(feed) = state.element("capture-feed") {
                state
                    .page
                    .set_style(feed, "display", if started { "block" } else { "none" });
            }
            started
        })
        .register_fn("stop", |api: CaptureApi| {
            let mut state = api.state.borrow_mut();
            let stopped = state.capture.stop();
            if let Some(feed) = state.element("capture-feed") {
                state.page.set_style(feed, "display", "none");
            }
            stopped
        })
        .register_fn("snapshot", |api: CaptureApi| {
            if !api.enabled {
                return Dynamic::UNIT;
            }
            let snapshot = api.state.borrow_mut().capture.snapshot();
            snapshot.map_or(Dynamic::UNIT, Dynamic::from)
        })
        .register_get("active", |api: &mut CaptureApi| {
            api.state.borrow().capture.is_active()
        })
        .register_indexer_get(|_api: &mut CaptureApi, _name: ImmutableString| Dynamic::UNIT);
}

fn register_element(engine: &mut Engine) {
    engine
        .register_get("exists", |el: &mut ElementRef| el.read(false, |_, _| true))
        .register_get("isConnected", |el: &mut ElementRef| el.read(false, |_, _| true))
        .register_get("id", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| {
                state.page.get(id).and_then(|e| e.id.clone()).unwrap_or_default()
            })
        })
        .register_get("tagName", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| {
                state
                    .page
                    .get(id)
                    .map(|e| e.tag.to_ascii_uppercase())
                    .unwrap_or_default()
            })
        })
        .register_get("textContent", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| state.page.text_content(id))
        })
        .register_set("textContent", |el: &mut ElementRef, text: Dynamic| el.set_text(&text))
        .register_get("innerText", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| state.page.text_content(id))
        })
        .register_set("innerText", |el: &mut ElementRef, text: Dynamic| el.set_text(&text))
        .register_get("innerHTML", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| state.page.text_content(id))
        })
        .register_set("innerHTML", |el: &mut ElementRef, markup: Dynamic| el.set_markup(&markup))
        .register_get("value", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| {
                state
                    .page
                    .get(id)
                    .and_then(|e| e.attribute("value"))
                    .unwrap_or_default()
            })
        })
        .register_set("value", |el: &mut ElementRef, value: Dynamic| {
            el.set_attribute("value", &value)
        })
        .register_get("className", |el: &mut ElementRef| {
            el.read(String::new(), |state, id| {
                state
                    .page
                    .get(id)
                    .map(|e| e.classes.join(" "))
                    .unwrap_or_default()
            })
        })
        .register_set("className", |el: &mut ElementRef, value: Dynamic| {
            let value = to_text(&value);
            el.write(|state, id| {
                if let Some(e) = state.page.get_mut(id) {
                    e.set_attribute("class", &value);
                }
            })
        })
        .register_get("disabled", |el: &mut ElementRef| {
            el.read(false, |state, id| state.page.get(id).map_or(false, |e| e.disabled))
        })
        .register_set("disabled", |el: &mut ElementRef, value: bool| {
            el.write(|state, id| {
                if let Some(e) = state.page.get_mut(id) {
                    e.disabled = value;
                }
            })
        })
        .register_get("style", |el: &mut ElementRef| StyleRef { element: el.clone() })
        // `el.style.x = ..` writes back through here; a whole-string assignment
        // replaces the inline block.
        .register_set("style", |el: &mut ElementRef, value: Dynamic| {
            if value.is_string() {
                let css = to_text(&value);
                el.write_unprotected(|state, id| state.page.replace_style(id, &css));
            }
        })
        .register_get("classList", |el: &mut ElementRef| ClassListRef {
            element: el.clone(),
        })
        .register_set("classList", |_el: &mut ElementRef, _value: Dynamic| {})
        .register_get("children", |el: &mut ElementRef| {
            let children = el.read(Vec::new(), |state, id| {
                state
                    .page
                    .get(id)
                    .map(|e| e.children.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|&c| state.page.get(c).map_or(false, |child| !child.is_text()))
                    .collect()
            });
            children
                .into_iter()
                .map(|id| Dynamic::from(ElementRef::new(&el.state, Some(id))))
                .collect::<Array>()
        })
        .register_get("parentElement", |el: &mut ElementRef| {
            let parent = el.read(None, |state, id| state.page.get(id).and_then(|e| e.parent));
            ElementRef::new(&el.state, parent)
        })
        .register_get("offsetWidth", |el: &mut ElementRef| {
            number_dynamic(el.read(0.0, |state, id| state.page.rect(id).width))
        })
        .register_get("offsetHeight", |el: &mut ElementRef| {
            number_dynamic(el.read(0.0, |state, id| state.page.rect(id).height))
        })
        .register_fn("remove", |el: ElementRef| el.remove())
        .register_fn("getAttribute", |el: ElementRef, name: ImmutableString| {
            el.attribute(name.as_str())
        })
        .register_fn(
            "setAttribute",
            |el: ElementRef, name: ImmutableString, value: Dynamic| {
                el.set_attribute(name.as_str(), &value)
            },
        )
        .register_fn("removeAttribute", |el: ElementRef, name: ImmutableString| {
            let name = name.trim().to_ascii_lowercase();
            el.write_unprotected(|state, id| state.page.remove_attribute(id, &name))
        })
        .register_fn("appendChild", |el: ElementRef, child: ElementRef| {
            if let Some(child_id) = child.target {
                el.write(|state, id| state.page.append_child(id, child_id));
            }
            child
        })
        .register_fn(
            "insertAdjacentHTML",
            |el: ElementRef, _position: ImmutableString, markup: ImmutableString| {
                let markup = markup.to_string();
                el.write(|state, id| {
                    state.page.inject(id, &markup);
                })
            },
        )
        .register_fn("querySelector", |el: ElementRef, selector: ImmutableString| {
            el.query(selector.as_str())
        })
        .register_fn(
            "querySelectorAll",
            |el: ElementRef, selector: ImmutableString| el.query_all(selector.as_str()),
        )
        .register_fn(
            "addEventListener",
            |el: ElementRef, event: ImmutableString, handler: FnPtr| {
                el.add_listener(event.as_str(), handler)
            },
        )
        .register_fn(
            "removeEventListener",
            |el: ElementRef, event: ImmutableString| {
                let Some(target) = el.target else {
                    return;
                };
                let event = event.to_string();
                el.state
                    .borrow_mut()
                    .listeners
                    .remove_where(|l| l.target == Some(target) && l.event == event);
            },
        )
        .register_fn(
            "removeEventListener",
            |el: ElementRef, event: ImmutableString, _handler: FnPtr| {
                let Some(target) = el.target else {
                    return;
                };
                let event = event.to_string();
                el.state
                    .borrow_mut()
                    .listeners
                    .remove_where(|l| l.target == Some(target) && l.event == event);
            },
        )
        .register_fn("getBoundingClientRect", |el: ElementRef| el.rect())
        .register_indexer_get(|el: &mut ElementRef, name: ImmutableString| el.attribute(name.as_str()))
        .register_indexer_set(|el: &mut ElementRef, name: ImmutableString, value: Dynamic| {
            el.set_attribute(name.as_str(), &value)
        });

    // Focus, blur, scrolling and animations have no observable effect here.
    for name in ["focus", "blur", "click", "scrollIntoView", "animate"] {
        register_variadic(engine, name, |_: &Engine, _el: ElementRef, _args: Args| {
            Dynamic::UNIT
        });
    }
}

fn register_style(engine: &mut Engine) {
    engine
        .register_get("cssText", |style: &mut StyleRef| {
            style.element.attribute("style").to_string()
        })
        .register_set("cssText", |style: &mut StyleRef, css: Dynamic| {
            let css = to_text(&css);
            style
                .element
                .write_unprotected(|state, id| state.page.replace_style(id, &css));
        })
        .register_fn(
            "setProperty",
            |style: StyleRef, prop: ImmutableString, value: Dynamic| {
                style.set(prop.as_str(), &value)
            },
        )
        .register_fn("removeProperty", |style: StyleRef, prop: ImmutableString| {
            style.set(prop.as_str(), &Dynamic::from(""))
        })
        .register_fn(
            "getPropertyValue",
            |style: StyleRef, prop: ImmutableString| style.get(prop.as_str()),
        )
        .register_indexer_get(|style: &mut StyleRef, prop: ImmutableString| style.get(prop.as_str()))
        .register_indexer_set(|style: &mut StyleRef, prop: ImmutableString, value: Dynamic| {
            style.set(prop.as_str(), &value)
        })
        .register_fn("contains", |list: ClassListRef, class: ImmutableString| {
            list.contains(class.as_str())
        })
        .register_fn("add", |list: ClassListRef, class: ImmutableString| {
            list.update(|el| el.add_class(class.as_str()))
        })
        .register_fn(
            "add",
            |list: ClassListRef, a: ImmutableString, b: ImmutableString| {
                list.update(|el| {
                    el.add_class(a.as_str());
                    el.add_class(b.as_str());
                })
            },
        )
        .register_fn("remove", |list: ClassListRef, class: ImmutableString| {
            list.update(|el| el.remove_class(class.as_str()))
        })
        .register_fn("toggle", |list: ClassListRef, class: ImmutableString| {
            let present = list.contains(class.as_str());
            list.update(|el| {
                if present {
                    el.remove_class(class.as_str());
                } else {
                    el.add_class(class.as_str());
                }
            });
            !present
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::registry::{NoCaptureDevice, TestPatternCamera};
    use crate::state::SandboxState;

    fn shared() -> Shared {
        SandboxState::new(SandboxConfig::default(), Box::new(NoCaptureDevice)).into_shared()
    }

    #[test]
    fn failed_query_yields_inert_element() {
        let state = shared();
        let missing = query(&state, "#nothing-here");
        assert!(missing.target().is_none());
        missing.remove();
        missing.set_text(&Dynamic::from("x"));
        assert!(missing.attribute("id").is_unit());
        assert_eq!(missing.rect().len(), 8);
        assert!(query_all(&state, "#nothing-here").is_empty());
    }

    #[test]
    fn protected_elements_refuse_destructive_writes() {
        let state = shared();
        let stage = query(&state, "#stage");
        stage.remove();
        StyleRef {
            element: stage.clone(),
        }
        .set("display", &Dynamic::from("none"));
        let s = state.borrow();
        let id = s.page.by_id("stage").expect("stage exists");
        assert!(s.page.is_connected(id));
        assert!(s.page.computed_style(id, "display").is_none());
    }

    #[test]
    fn ordinary_elements_accept_writes() {
        let state = shared();
        let output = query(&state, "#output");
        output.set_text(&Dynamic::from("hello"));
        StyleRef {
            element: output.clone(),
        }
        .set("color", &Dynamic::from("red"));
        let s = state.borrow();
        let id = s.page.by_id("output").expect("output exists");
        assert_eq!(s.page.text_content(id), "hello");
        assert_eq!(s.page.computed_style(id, "color").as_deref(), Some("red"));
    }

    #[test]
    fn removed_elements_become_inert() {
        let state = shared();
        let created = {
            let mut s = state.borrow_mut();
            let spawned = s.page.by_id("spawned").expect("spawned exists");
            s.page.inject(spawned, "<p class=\"x\">hi</p>")[0]
        };
        let el = ElementRef::new(&state, Some(created));
        el.remove();
        el.set_text(&Dynamic::from("ghost"));
        assert!(!state.borrow().page.contains(created));
        assert!(el.attribute("class").is_unit());
    }

    #[test]
    fn capture_can_be_disabled_by_config() {
        let config = SandboxConfig {
            disabled_capabilities: vec!["capture".to_string()],
            ..SandboxConfig::default()
        };
        let state =
            SandboxState::new(config, Box::new(TestPatternCamera::new(8, 8))).into_shared();
        assert!(!capture_api(&state).enabled);
        assert!(capture_api(&shared()).enabled);
    }
}
