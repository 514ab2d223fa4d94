//! Runs one ritual against the shared state and reports a tri-state outcome.

use std::collections::BTreeSet;
use std::rc::Rc;

use bevy::log::{debug, info, warn};
use rhai::{Dynamic, Engine, Scope};
use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilityTable;
use crate::engine::{describe_error, run_with_ast};
use crate::sanitizer::sanitize;
use crate::state::Shared;

/// Whole-document operations no ritual may attempt.
pub const DESTRUCTIVE_PATTERNS: [&str; 4] = [
    "document.body.innerHTML",
    "document.documentElement",
    "document.write",
    ".outerHTML",
];

pub const BLOCKED_REASON: &str = "blocked: destructive DOM method";

const MAX_UNKNOWN_NAMES: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Blocked { reason: String },
    Failed { message: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorState {
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl ErrorState {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.consecutive_errors = 0,
            Outcome::Failed { message } => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                self.last_error = Some(message.clone());
            }
            Outcome::Blocked { .. } => {}
        }
    }
}

/// The block reason when `code` touches the whole document.
pub fn blocked_reason(code: &str) -> Option<&'static str> {
    DESTRUCTIVE_PATTERNS
        .iter()
        .any(|pattern| code.contains(pattern))
        .then_some(BLOCKED_REASON)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Names called as `V.name(` or `VOID.name(` that the table does not know.
pub fn unknown_capabilities(code: &str, table: &CapabilityTable) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for handle in ["V.", "VOID."] {
        let mut from = 0;
        while let Some(offset) = code[from..].find(handle) {
            let start = from + offset;
            from = start + handle.len();
            let standalone = code[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_ident_char(c));
            if !standalone {
                continue;
            }
            let rest = &code[from..];
            let len = rest
                .char_indices()
                .find(|&(_, c)| !is_ident_char(c))
                .map_or(rest.len(), |(idx, _)| idx);
            let name = &rest[..len];
            let starts_well = name.chars().next().is_some_and(|c| !c.is_ascii_digit());
            if starts_well && rest[len..].trim_start().starts_with('(') && !table.is_known(name) {
                names.insert(name.to_string());
                if names.len() >= MAX_UNKNOWN_NAMES {
                    return names;
                }
            }
        }
    }
    names
}

/// Bind every unknown capability `code` calls to the no-op so the call
/// succeeds instead of failing the ritual.
pub fn prepare(engine: &mut Engine, table: &CapabilityTable, code: &str) {
    let unknown = unknown_capabilities(code, table);
    if unknown.is_empty() {
        return;
    }
    debug!(
        "[Ritual exec] Binding {} unknown capability name(s) to no-op: {:?}",
        unknown.len(),
        unknown
    );
    for name in &unknown {
        CapabilityTable::register_noop(engine, name);
    }
}

/// Sanitize, compile and run `code`. The caller must not hold a borrow of
/// `state`; nested rituals re-enter here through `exec`.
pub fn run(engine: &Engine, state: &Shared, code: &str, label: &str) -> Outcome {
    let outcome = evaluate(engine, state, code);
    match &outcome {
        Outcome::Success => debug!("[Ritual exec] '{}' ok", label),
        Outcome::Blocked { reason } => info!("[Ritual exec] '{}' {}", label, reason),
        Outcome::Failed { message } => warn!("[Ritual exec] '{}' failed: {}", label, message),
    }
    state.borrow_mut().errors.record(&outcome);
    outcome
}

fn evaluate(engine: &Engine, state: &Shared, code: &str) -> Outcome {
    if let Some(reason) = blocked_reason(code) {
        return Outcome::Blocked {
            reason: reason.to_string(),
        };
    }
    let source = sanitize(code);
    if source.is_empty() {
        return Outcome::Success;
    }
    let ast = match engine.compile(&source) {
        Ok(ast) => Rc::new(ast),
        Err(err) => {
            return Outcome::Failed {
                message: err.to_string(),
            }
        }
    };
    let mut scope = Scope::new();
    let result = run_with_ast(state, &ast, || {
        engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
    });
    match result {
        Ok(_) => Outcome::Success,
        Err(err) => Outcome::Failed {
            message: describe_error(&err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::engine::build_engine;
    use crate::registry::NoCaptureDevice;
    use crate::state::SandboxState;

    fn setup() -> (Engine, Shared, CapabilityTable) {
        let state =
            SandboxState::new(SandboxConfig::default(), Box::new(NoCaptureDevice)).into_shared();
        let table = CapabilityTable::default();
        let engine = build_engine(&state, &table);
        (engine, state, table)
    }

    fn execute(engine: &mut Engine, state: &Shared, table: &CapabilityTable, code: &str) -> Outcome {
        prepare(engine, table, code);
        run(engine, state, code, "test")
    }

    #[test]
    fn whole_document_writes_are_blocked_before_anything_runs() {
        let (mut engine, state, table) = setup();
        let outcome = execute(
            &mut engine,
            &state,
            &table,
            "V.title(\"before\"); document.body.innerHTML = \"\";",
        );
        assert_eq!(
            outcome,
            Outcome::Blocked {
                reason: BLOCKED_REASON.to_string()
            }
        );
        assert_ne!(state.borrow().page.title, "before");
        assert_eq!(state.borrow().errors, ErrorState::default());
    }

    #[test]
    fn unknown_names_run_as_no_ops() {
        let (mut engine, state, table) = setup();
        let outcome = execute(
            &mut engine,
            &state,
            &table,
            "V.summonTheUnnamed(1, 2, 3); VOID.whisper(); V.title(\"after\");",
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(state.borrow().page.title, "after");
    }

    #[test]
    fn long_argument_lists_still_resolve() {
        let (mut engine, state, table) = setup();
        let outcome = execute(
            &mut engine,
            &state,
            &table,
            "V.summonTheUnnamed(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); V.title(\"long\", 1, 2, 3, 4, 5, 6, 7);",
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(state.borrow().page.title, "long");
    }

    #[test]
    fn scan_ignores_lookalikes_and_known_names() {
        let table = CapabilityTable::default();
        let names = unknown_capabilities(
            "V.shake(); DEV.nothing(); V.width; V.capture.start(); V.glow (1); VOID.tone()",
            &table,
        );
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["glow".to_string()]);
    }

    #[test]
    fn failures_count_until_the_next_success() {
        let (mut engine, state, table) = setup();
        for code in ["let x = ;", "throw \"the veil tears\";"] {
            let outcome = execute(&mut engine, &state, &table, code);
            assert!(matches!(outcome, Outcome::Failed { .. }));
        }
        {
            let s = state.borrow();
            assert_eq!(s.errors.consecutive_errors, 2);
            assert!(s
                .errors
                .last_error
                .as_deref()
                .is_some_and(|message| message.contains("the veil tears")));
        }
        assert!(execute(&mut engine, &state, &table, "V.log(\"calm\");").is_success());
        let s = state.borrow();
        assert_eq!(s.errors.consecutive_errors, 0);
        assert!(s.errors.last_error.is_some());
    }

    #[test]
    fn runaway_loops_fail_instead_of_hanging() {
        let (mut engine, state, table) = setup();
        let outcome = execute(&mut engine, &state, &table, "let i = 0; loop { i += 1; }");
        assert!(matches!(outcome, Outcome::Failed { .. }));
    }

    #[test]
    fn wrapped_javascript_style_rituals_run() {
        let (mut engine, state, table) = setup();
        let outcome = execute(
            &mut engine,
            &state,
            &table,
            "```js\n(() => { const n = 3; V.title('count ' + n); })()\n```",
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(state.borrow().page.title, "count 3");
    }

    #[test]
    fn failed_queries_return_inert_elements() {
        let (mut engine, state, table) = setup();
        let outcome = execute(
            &mut engine,
            &state,
            &table,
            "let ghost = query(\"#nowhere\"); ghost.remove(); ghost.style[\"color\"] = \"red\"; V.title(\"\" + queryAll(\".none\").len());",
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(state.borrow().page.title, "0");
    }

    #[test]
    fn outcome_serializes_with_a_status_tag() {
        let json = serde_json::to_value(Outcome::Failed {
            message: "x".to_string(),
        })
        .expect("serialize outcome");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "x");
    }
}
