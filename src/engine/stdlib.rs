//! `Math`, `Date`, `forEach` and `length`: the script-facing basics rituals
//! lean on.

use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext, INT};

use super::{number_dynamic, register_variadic, to_number, Args};
use crate::state::Shared;

#[derive(Clone)]
pub struct MathLib {
    state: Shared,
}

impl MathLib {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }
}

#[derive(Clone)]
pub struct DateLib {
    state: Shared,
}

impl DateLib {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }
}

/// Integral results come back as integers so they can index arrays.
fn integral(value: f64) -> Dynamic {
    if value.is_finite() && value.abs() < INT::MAX as f64 {
        Dynamic::from_int(value as INT)
    } else {
        number_dynamic(value)
    }
}

fn unary(engine: &mut Engine, name: &str, f: fn(f64) -> f64) {
    engine.register_fn(name, move |_math: MathLib, x: Dynamic| {
        number_dynamic(to_number(&x).map_or(f64::NAN, f))
    });
}

fn rounding(engine: &mut Engine, name: &str, f: fn(f64) -> f64) {
    engine.register_fn(name, move |_math: MathLib, x: Dynamic| match to_number(&x) {
        Some(x) => integral(f(x)),
        None => number_dynamic(f64::NAN),
    });
}

fn binary(engine: &mut Engine, name: &str, f: fn(f64, f64) -> f64) {
    engine.register_fn(name, move |_math: MathLib, a: Dynamic, b: Dynamic| {
        match (to_number(&a), to_number(&b)) {
            (Some(a), Some(b)) => number_dynamic(f(a, b)),
            _ => number_dynamic(f64::NAN),
        }
    });
}

fn fold(args: &Args, init: f64, f: fn(f64, f64) -> f64) -> Dynamic {
    let mut acc = init;
    for i in 0..args.len() {
        match args.number(i) {
            Some(x) => acc = f(acc, x),
            None => return number_dynamic(f64::NAN),
        }
    }
    if acc.fract() == 0.0 {
        integral(acc)
    } else {
        number_dynamic(acc)
    }
}

fn for_each(
    context: NativeCallContext,
    items: Array,
    callback: FnPtr,
) -> Result<(), Box<EvalAltResult>> {
    for (index, item) in items.into_iter().enumerate() {
        match callback.call_within_context::<Dynamic>(&context, (item.clone(),)) {
            Ok(_) => {}
            // A two-parameter callback wants the index as well.
            Err(err)
                if matches!(&*err, EvalAltResult::ErrorFunctionNotFound(sig, _)
                    if sig.starts_with(callback.fn_name())) =>
            {
                callback.call_within_context::<Dynamic>(&context, (item, index as INT))?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

pub(super) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<MathLib>("Math")
        .register_type_with_name::<DateLib>("Date");

    engine
        .register_fn("random", |math: MathLib| {
            number_dynamic(math.state.borrow_mut().random())
        })
        .register_get("PI", |_math: &mut MathLib| number_dynamic(std::f64::consts::PI))
        .register_get("E", |_math: &mut MathLib| number_dynamic(std::f64::consts::E))
        .register_get("TAU", |_math: &mut MathLib| number_dynamic(std::f64::consts::TAU));
    for (name, f) in [
        ("floor", f64::floor as fn(f64) -> f64),
        ("ceil", f64::ceil),
        ("round", f64::round),
        ("trunc", f64::trunc),
    ] {
        rounding(engine, name, f);
    }
    for (name, f) in [
        ("abs", f64::abs as fn(f64) -> f64),
        ("sqrt", f64::sqrt),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("asin", f64::asin),
        ("acos", f64::acos),
        ("atan", f64::atan),
        ("exp", f64::exp),
        ("log", f64::ln),
        ("log2", f64::log2),
        ("log10", f64::log10),
        ("sign", f64::signum),
    ] {
        unary(engine, name, f);
    }
    for (name, f) in [
        ("pow", f64::powf as fn(f64, f64) -> f64),
        ("atan2", f64::atan2),
        ("hypot", f64::hypot),
    ] {
        binary(engine, name, f);
    }
    register_variadic(engine, "min", |_: &Engine, _math: MathLib, args: Args| {
        fold(&args, f64::INFINITY, f64::min)
    });
    register_variadic(engine, "max", |_: &Engine, _math: MathLib, args: Args| {
        fold(&args, f64::NEG_INFINITY, f64::max)
    });

    engine.register_fn("now", |date: DateLib| {
        Dynamic::from_int(date.state.borrow().now_ms.min(INT::MAX as u64) as INT)
    });

    engine
        .register_fn("forEach", for_each)
        .register_get("length", |items: &mut Array| items.len() as INT)
        .register_get("length", |text: &mut ImmutableString| {
            text.chars().count() as INT
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::registry::NoCaptureDevice;
    use crate::state::SandboxState;
    use rhai::Scope;

    fn engine_with_libs() -> (Engine, Scope<'static>, Shared) {
        let state = SandboxState::new(
            SandboxConfig {
                seed: Some(3),
                ..SandboxConfig::default()
            },
            Box::new(NoCaptureDevice),
        )
        .into_shared();
        let mut engine = Engine::new();
        register(&mut engine);
        let mut scope = Scope::new();
        scope.push("Math", MathLib::new(state.clone()));
        scope.push("Date", DateLib::new(state.clone()));
        (engine, scope, state)
    }

    #[test]
    fn floor_of_random_indexes_arrays() {
        let (engine, mut scope, _) = engine_with_libs();
        let picked = engine
            .eval_with_scope::<INT>(
                &mut scope,
                "let xs = [10, 20, 30]; xs[Math.floor(Math.random() * xs.length)]",
            )
            .expect("indexing with floor(random) works");
        assert!([10, 20, 30].contains(&picked));
    }

    #[test]
    fn min_max_and_trig() {
        let (engine, mut scope, _) = engine_with_libs();
        let min = engine
            .eval_with_scope::<INT>(&mut scope, "Math.min(4, 2, 9)")
            .expect("min");
        assert_eq!(min, 2);
        let s = engine
            .eval_with_scope::<f64>(&mut scope, "Math.sin(Math.PI / 2)")
            .expect("sin");
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn date_now_reads_the_sandbox_clock() {
        let (engine, mut scope, state) = engine_with_libs();
        state.borrow_mut().now_ms = 4321;
        let now = engine
            .eval_with_scope::<INT>(&mut scope, "Date.now()")
            .expect("now");
        assert_eq!(now, 4321);
    }

    #[test]
    fn for_each_accepts_one_or_two_parameters() {
        let (engine, mut scope, _) = engine_with_libs();
        let sum = engine
            .eval_with_scope::<INT>(
                &mut scope,
                "let total = 0; [1, 2, 3].forEach(|x| total += x); total",
            )
            .expect("one parameter");
        assert_eq!(sum, 6);
        let weighted = engine
            .eval_with_scope::<INT>(
                &mut scope,
                "let total = 0; [5, 5].forEach(|x, i| total += x * i); total",
            )
            .expect("two parameters");
        assert_eq!(weighted, 5);
        let len = engine
            .eval_with_scope::<INT>(&mut scope, "\"abc\".length + [1, 2].length")
            .expect("length getters");
        assert_eq!(len, 5);
    }
}
