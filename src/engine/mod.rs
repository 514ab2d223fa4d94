//! The rhai engine rituals run in, plus the value plumbing shared by every
//! binding.

pub mod canvas2d;
pub mod handles;
pub mod stdlib;
pub mod three;

use std::rc::Rc;

use bevy::log::debug;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, FuncArgs, ImmutableString, Map,
    NativeCallContext, Position, AST, FLOAT, INT,
};

use crate::capabilities::CapabilityTable;
use crate::state::Shared;

pub use handles::{CaptureApi, ElementRef, RitualApi, VoiceHandle};

pub const MAX_EXPR_DEPTH: usize = 128;
pub const MAX_FN_EXPR_DEPTH: usize = 64;

/// A script closure plus the AST that defines it.
#[derive(Clone)]
pub struct ScriptCallback {
    pub ast: Rc<AST>,
    pub fn_ptr: FnPtr,
}

impl std::fmt::Debug for ScriptCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScriptCallback({})", self.fn_ptr.fn_name())
    }
}

impl ScriptCallback {
    /// Bind `fn_ptr` to the script that is currently running.
    pub fn capture(state: &Shared, fn_ptr: FnPtr) -> Option<Self> {
        let ast = state.borrow().current_ast.clone()?;
        Some(Self { ast, fn_ptr })
    }
}

/// Positional arguments as received by a variadic binding.
#[derive(Clone, Debug, Default)]
pub struct Args(Vec<Dynamic>);

impl Args {
    pub fn new(values: Vec<Dynamic>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Dynamic> {
        self.0.get(index).filter(|value| !value.is_unit())
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(to_number)
    }

    /// `arg || default`: missing, zero and non-numeric all fall back.
    pub fn number_or(&self, index: usize, default: f64) -> f64 {
        match self.number(index) {
            Some(value) if value != 0.0 => value,
            _ => default,
        }
    }

    pub fn clamped(&self, index: usize, default: f64, min: f64, max: f64) -> f64 {
        self.number_or(index, default).clamp(min, max)
    }

    pub fn text(&self, index: usize) -> Option<String> {
        self.get(index).map(to_text)
    }

    /// `arg || default` for strings.
    pub fn text_or(&self, index: usize, default: &str) -> String {
        match self.text(index) {
            Some(text) if !text.is_empty() => text,
            _ => default.to_string(),
        }
    }

    pub fn array(&self, index: usize) -> Option<Array> {
        self.get(index).and_then(|value| value.clone().try_cast::<Array>())
    }

    pub fn map(&self, index: usize) -> Option<Map> {
        self.get(index).and_then(|value| value.clone().try_cast::<Map>())
    }

    pub fn fn_ptr(&self, index: usize) -> Option<FnPtr> {
        self.get(index).and_then(|value| value.clone().try_cast::<FnPtr>())
    }

    pub fn numbers(&self, index: usize) -> Vec<f64> {
        self.array(index)
            .map(|items| items.iter().filter_map(to_number).collect())
            .unwrap_or_default()
    }
}

pub fn to_number(value: &Dynamic) -> Option<f64> {
    let number = if let Ok(v) = value.as_int() {
        v as f64
    } else if let Ok(v) = value.as_float() {
        v as f64
    } else if let Ok(v) = value.as_bool() {
        if v {
            1.0
        } else {
            0.0
        }
    } else if value.is_string() {
        value.clone().into_string().ok()?.trim().parse::<f64>().ok()?
    } else {
        return None;
    };
    number.is_finite().then_some(number)
}

pub fn to_text(value: &Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if let Ok(v) = value.as_float() {
        return format_number(v as f64);
    }
    value.to_string()
}

/// Numbers the way scripts expect to see them in text: `3`, not `3.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn number_dynamic(value: f64) -> Dynamic {
    Dynamic::from_float(value as FLOAT)
}

pub fn int_dynamic(value: u64) -> Dynamic {
    Dynamic::from_int(value.min(INT::MAX as u64) as INT)
}

/// Most positional arguments a variadic binding accepts.
pub const MAX_ARGS: usize = 10;

macro_rules! register_arity {
    ($engine:expr, $name:expr, $f:expr, $this:ty $(, $arg:ident)*) => {
        $engine.register_fn($name, move |ctx: NativeCallContext, this: $this $(, $arg: Dynamic)*| {
            $f(ctx.engine(), this, Args::new(vec![$($arg),*]))
        });
    };
}

/// Register `name` as a method on `T` taking zero to `MAX_ARGS` arguments of
/// any type.
pub fn register_variadic<T, F>(engine: &mut Engine, name: &str, f: F)
where
    T: Clone + 'static,
    F: Fn(&Engine, T, Args) -> Dynamic + Copy + 'static,
{
    register_arity!(engine, name, f, T);
    register_arity!(engine, name, f, T, a);
    register_arity!(engine, name, f, T, a, b);
    register_arity!(engine, name, f, T, a, b, c);
    register_arity!(engine, name, f, T, a, b, c, d);
    register_arity!(engine, name, f, T, a, b, c, d, e);
    register_arity!(engine, name, f, T, a, b, c, d, e, g);
    register_arity!(engine, name, f, T, a, b, c, d, e, g, h);
    register_arity!(engine, name, f, T, a, b, c, d, e, g, h, i);
    register_arity!(engine, name, f, T, a, b, c, d, e, g, h, i, j);
    register_arity!(engine, name, f, T, a, b, c, d, e, g, h, i, j, k);
}

/// Build the ritual engine: limits, bindings, capability table and the
/// resolver that supplies `V`, `VOID`, `THREE`, `Math`, `Date`, `mouseX` and
/// `mouseY` to every scope, function bodies included.
pub fn build_engine(state: &Shared, table: &CapabilityTable) -> Engine {
    let limits = state.borrow().config.engine.clone();
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations.max(10_000));
    engine.set_max_call_levels(limits.max_call_levels.max(8));
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
    engine.on_print(|text| debug!("[Ritual script] {}", text));
    engine.on_debug(|text, source, pos| {
        debug!("[Ritual script] {} ({} @ {})", text, source.unwrap_or("ritual"), pos)
    });

    handles::register(&mut engine, state);
    stdlib::register(&mut engine);
    three::register(&mut engine);
    canvas2d::register(&mut engine);
    table.register(&mut engine);

    let resolver = state.clone();
    engine.on_var(move |name, _index, context| {
        if context.scope().contains(name) {
            return Ok(None);
        }
        let value = match name {
            "V" | "VOID" => Dynamic::from(RitualApi::new(resolver.clone())),
            "THREE" => Dynamic::from(three::GraphicsLib::new(resolver.clone())),
            "Math" => Dynamic::from(stdlib::MathLib::new(resolver.clone())),
            "Date" => Dynamic::from(stdlib::DateLib::new(resolver.clone())),
            "mouseX" => number_dynamic(resolver.borrow().pointer.0),
            "mouseY" => number_dynamic(resolver.borrow().pointer.1),
            _ => return Ok(None),
        };
        Ok(Some(value))
    });
    engine
}

/// Run `f` with `ast` recorded as the current script, restoring the previous
/// one afterwards. Closures created inside `f` bind to `ast`.
pub fn run_with_ast<T>(state: &Shared, ast: &Rc<AST>, f: impl FnOnce() -> T) -> T {
    let previous = state.borrow_mut().current_ast.replace(ast.clone());
    let out = f();
    state.borrow_mut().current_ast = previous;
    out
}

/// Call a stored script closure. State must not be borrowed by the caller.
pub fn invoke(
    engine: &Engine,
    state: &Shared,
    callback: &ScriptCallback,
    args: impl FuncArgs,
) -> Result<Dynamic, String> {
    run_with_ast(state, &callback.ast, || {
        callback
            .fn_ptr
            .call::<Dynamic>(engine, &callback.ast, args)
            .map_err(|err| describe_error(&err))
    })
}

/// Human-readable form of an engine error, position included when known.
pub fn describe_error(err: &EvalAltResult) -> String {
    let position = err.position();
    let message = match err {
        EvalAltResult::ErrorRuntime(value, _) => to_text(value),
        other => other.to_string(),
    };
    if position == Position::NONE || message.contains("line") {
        message
    } else {
        format!("{message} ({position})")
    }
}

pub fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(v) => (*v).into(),
        serde_json::Value::Number(v) => match (v.as_i64(), v.as_f64()) {
            (Some(i), _) => (i as INT).into(),
            (None, Some(f)) => (f as FLOAT).into(),
            _ => Dynamic::UNIT,
        },
        serde_json::Value::String(v) => v.as_str().into(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_to_dynamic)
            .collect::<Array>()
            .into(),
        serde_json::Value::Object(entries) => entries
            .iter()
            .map(|(key, item)| (key.as_str().into(), json_to_dynamic(item)))
            .collect::<Map>()
            .into(),
    }
}

pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_unit() {
        return serde_json::Value::Null;
    }
    if let Ok(v) = value.as_bool() {
        return serde_json::Value::Bool(v);
    }
    if let Ok(v) = value.as_int() {
        return serde_json::json!(v);
    }
    if let Ok(v) = value.as_float() {
        return serde_json::json!(v);
    }
    if let Some(v) = value.clone().try_cast::<ImmutableString>() {
        return serde_json::Value::String(v.to_string());
    }
    if let Some(v) = value.clone().try_cast::<Array>() {
        return serde_json::Value::Array(v.iter().map(dynamic_to_json).collect());
    }
    if let Some(v) = value.clone().try_cast::<Map>() {
        return serde_json::Value::Object(
            v.iter()
                .map(|(key, item)| (key.to_string(), dynamic_to_json(item)))
                .collect(),
        );
    }
    serde_json::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_or_defaults() {
        let args = Args::new(vec![
            Dynamic::from_int(0),
            Dynamic::from_float(2.5),
            Dynamic::from("7"),
            Dynamic::UNIT,
            Dynamic::from(""),
        ]);
        assert_eq!(args.number_or(0, 440.0), 440.0);
        assert_eq!(args.number_or(1, 1.0), 2.5);
        assert_eq!(args.number(2), Some(7.0));
        assert_eq!(args.number_or(3, 9.0), 9.0);
        assert_eq!(args.text_or(4, "sine"), "sine");
        assert_eq!(args.number_or(12, 3.0), 3.0);
        assert_eq!(args.clamped(1, 1.0, 0.0, 2.0), 2.0);
    }

    #[test]
    fn numbers_print_like_script_numbers() {
        assert_eq!(to_text(&Dynamic::from_float(3.0)), "3");
        assert_eq!(to_text(&Dynamic::from_float(0.25)), "0.25");
        assert_eq!(to_text(&Dynamic::from_int(12)), "12");
        assert_eq!(to_text(&Dynamic::UNIT), "");
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let value = serde_json::json!({"label": "yes", "n": 3, "xs": [1.5, null, true]});
        let back = dynamic_to_json(&json_to_dynamic(&value));
        assert_eq!(back, value);
    }
}
