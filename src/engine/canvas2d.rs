//! The 2D drawing context handed to `draw` / `drawLoop` bodies as `ctx`.
//! Every call lands in the canvas display list.

use rhai::{Dynamic, Engine, ImmutableString};

use super::{register_variadic, to_text, Args};
use crate::registry::DrawCommand;
use crate::state::Shared;

#[derive(Clone)]
pub struct CanvasContext {
    state: Shared,
}

impl CanvasContext {
    pub fn new(state: &Shared) -> Self {
        Self {
            state: state.clone(),
        }
    }

    fn push(&self, command: DrawCommand) {
        self.state.borrow_mut().canvas.push(command);
    }
}

/// `createLinearGradient` and friends; stops are recorded but only the
/// first colour is used when the gradient becomes a fill.
#[derive(Clone, Default)]
pub struct CanvasGradient {
    stops: Vec<(f64, String)>,
}

impl CanvasGradient {
    fn as_style(&self) -> String {
        self.stops
            .first()
            .map(|(_, color)| color.clone())
            .unwrap_or_else(|| "transparent".to_string())
    }
}

const PATH_OPS: [&str; 18] = [
    "fillRect",
    "strokeRect",
    "beginPath",
    "closePath",
    "moveTo",
    "lineTo",
    "arc",
    "arcTo",
    "rect",
    "ellipse",
    "quadraticCurveTo",
    "bezierCurveTo",
    "save",
    "restore",
    "translate",
    "rotate",
    "scale",
    "setTransform",
];

const STYLE_PROPS: [&str; 12] = [
    "fillStyle",
    "strokeStyle",
    "lineWidth",
    "globalAlpha",
    "font",
    "textAlign",
    "textBaseline",
    "globalCompositeOperation",
    "shadowBlur",
    "shadowColor",
    "lineCap",
    "lineJoin",
];

fn numbers(args: &Args) -> Vec<f64> {
    (0..args.len()).filter_map(|i| args.number(i)).collect()
}

fn style_text(value: &Dynamic) -> String {
    match value.clone().try_cast::<CanvasGradient>() {
        Some(gradient) => gradient.as_style(),
        None => to_text(value),
    }
}

pub(super) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<CanvasContext>("CanvasRenderingContext2D")
        .register_type_with_name::<CanvasGradient>("CanvasGradient");

    for op in PATH_OPS {
        register_variadic(engine, op, move |_: &Engine, ctx: CanvasContext, args: Args| {
            ctx.push(DrawCommand::new(op, numbers(&args)));
            Dynamic::UNIT
        });
    }
    for op in ["fill", "stroke", "clip", "resetTransform"] {
        register_variadic(engine, op, move |_: &Engine, ctx: CanvasContext, _args: Args| {
            ctx.push(DrawCommand::new(op, Vec::new()));
            Dynamic::UNIT
        });
    }
    for op in ["fillText", "strokeText"] {
        register_variadic(engine, op, move |_: &Engine, ctx: CanvasContext, args: Args| {
            let text = args.text(0).unwrap_or_default();
            let rest: Vec<f64> = (1..args.len()).filter_map(|i| args.number(i)).collect();
            ctx.push(DrawCommand::with_text(op, rest, &text));
            Dynamic::UNIT
        });
    }
    register_variadic(
        engine,
        "clearRect",
        |_: &Engine, ctx: CanvasContext, args: Args| {
            let rect = numbers(&args);
            let mut state = ctx.state.borrow_mut();
            let (w, h) = (state.canvas.width, state.canvas.height);
            // A full clear drops the accumulated list instead of growing it.
            let covers_all = rect.len() == 4
                && rect[0] <= 0.0
                && rect[1] <= 0.0
                && rect[0] + rect[2] >= w
                && rect[1] + rect[3] >= h;
            if covers_all {
                state.canvas.clear();
            } else {
                state.canvas.push(DrawCommand::new("clearRect", rect));
            }
            Dynamic::UNIT
        },
    );
    for name in ["createLinearGradient", "createRadialGradient"] {
        register_variadic(engine, name, |_: &Engine, _ctx: CanvasContext, _args: Args| {
            Dynamic::from(CanvasGradient::default())
        });
    }
    engine.register_fn(
        "addColorStop",
        |gradient: &mut CanvasGradient, offset: Dynamic, color: Dynamic| {
            let offset = super::to_number(&offset).unwrap_or(0.0);
            gradient.stops.push((offset, to_text(&color)));
        },
    );
    engine.register_fn("measureText", |_ctx: CanvasContext, text: ImmutableString| {
        let mut metrics = rhai::Map::new();
        metrics.insert(
            "width".into(),
            super::number_dynamic(text.chars().count() as f64 * 8.0),
        );
        metrics
    });

    for prop in STYLE_PROPS {
        engine.register_get(prop, move |ctx: &mut CanvasContext| {
            ctx.state
                .borrow()
                .canvas
                .prop(prop)
                .map_or(Dynamic::UNIT, |v| Dynamic::from(v.to_string()))
        });
        engine.register_set(prop, move |ctx: &mut CanvasContext, value: Dynamic| {
            let text = style_text(&value);
            let numeric = super::to_number(&value).into_iter().collect();
            let mut state = ctx.state.borrow_mut();
            state.canvas.set_prop(prop, &text);
            state.canvas.push(DrawCommand::with_text(prop, numeric, &text));
        });
    }
    engine
        .register_get("width", |ctx: &mut CanvasContext| {
            super::number_dynamic(ctx.state.borrow().canvas.width)
        })
        .register_get("height", |ctx: &mut CanvasContext| {
            super::number_dynamic(ctx.state.borrow().canvas.height)
        });
}
