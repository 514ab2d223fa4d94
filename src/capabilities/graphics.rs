//! The 3D scene and 2D canvas capabilities, plus the per-frame drivers the
//! sandbox calls on every tick.

use std::rc::Rc;

use bevy::log::{debug, warn};
use rhai::{Dynamic, Engine, FnPtr, Scope, AST};

use super::{CapabilityEntry, Category, Invocation};
use crate::engine::canvas2d::CanvasContext;
use crate::engine::three::{Object3D, RendererApi};
use crate::engine::{
    describe_error, int_dynamic, invoke, number_dynamic, run_with_ast, Args, ScriptCallback,
};
use crate::sanitizer::sanitize_body;
use crate::state::Shared;

pub(super) const ENTRIES: &[CapabilityEntry] = &[
    CapabilityEntry::new("spawn3D", Category::Scene3d, "spawn3D(code)", spawn_3d),
    CapabilityEntry::new("kill3D", Category::Scene3d, "kill3D()", kill_3d),
    CapabilityEntry::new("stop3D", Category::Scene3d, "", kill_3d),
    CapabilityEntry::new("clear3D", Category::Scene3d, "", kill_3d),
    CapabilityEntry::new("draw", Category::Canvas, "draw(code)", draw),
    CapabilityEntry::new("drawLoop", Category::Canvas, "drawLoop(code)", draw_loop),
    CapabilityEntry::new("killDraw", Category::Canvas, "killDraw()", kill_draw),
    CapabilityEntry::new("clearDraw", Category::Canvas, "", kill_draw),
    CapabilityEntry::new("clearCanvas", Category::Canvas, "", kill_draw),
];

fn compile_body(engine: &Engine, code: &str) -> Result<Rc<AST>, String> {
    let body = sanitize_body(code);
    engine
        .compile(&body)
        .map(Rc::new)
        .map_err(|err| err.to_string())
}

/// Build a fresh scene (tearing down any previous one) and run `code` as its
/// setup with `scene`, `camera` and `renderer` bound. A callable result
/// becomes the per-frame callback.
pub fn spawn_scene(engine: &Engine, state: &Shared, code: &str) -> bool {
    let generation = {
        let mut s = state.borrow_mut();
        let (w, h) = (s.page.viewport.width, s.page.viewport.height);
        s.scene.create(w, h)
    };
    let ast = match compile_body(engine, code) {
        Ok(ast) => ast,
        Err(message) => {
            state.borrow_mut().scene.note_setup_failure(generation, &message);
            return false;
        }
    };
    let mut scope = Scope::new();
    scope.push("scene", Object3D::scene_root(state, generation));
    scope.push("camera", Object3D::camera(state, generation));
    scope.push("renderer", RendererApi::new(state, generation));
    let result = run_with_ast(state, &ast, || {
        engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
    });
    match result {
        Ok(value) => {
            if let Some(fn_ptr) = value.try_cast::<FnPtr>() {
                let callback = ScriptCallback { ast, fn_ptr };
                state.borrow_mut().scene.start_loop(generation, callback);
            }
            debug!("[Ritual 3D] Scene {} ready", generation);
            true
        }
        Err(err) => {
            state
                .borrow_mut()
                .scene
                .note_setup_failure(generation, &describe_error(&err));
            false
        }
    }
}

fn spawn_3d(inv: &Invocation, args: &Args) -> Dynamic {
    let code = args.text(0).unwrap_or_default();
    spawn_scene(inv.engine, inv.state, &code);
    Dynamic::UNIT
}

fn kill_3d(inv: &Invocation, _args: &Args) -> Dynamic {
    inv.state.borrow_mut().scene.teardown();
    Dynamic::UNIT
}

/// Render one frame of the live scene, running its callback first if it has
/// one. Returns whether a scene is still live afterwards.
pub fn run_scene_frame(engine: &Engine, state: &Shared) -> bool {
    let budget = state.borrow().config.frame_error_budget;
    let (generation, callback) = {
        let s = state.borrow();
        match s.scene.live() {
            Some(instance) => (instance.generation, instance.frame_callback.clone()),
            None => return false,
        }
    };
    let result = match callback {
        Some(callback) => invoke(engine, state, &callback, ()).map(|_| ()),
        None => Ok(()),
    };
    state.borrow_mut().scene.record_frame(generation, result, budget)
}

fn canvas_scope(state: &Shared) -> Scope<'static> {
    let (w, h) = {
        let s = state.borrow();
        (s.canvas.width, s.canvas.height)
    };
    let mut scope = Scope::new();
    scope.push("ctx", CanvasContext::new(state));
    scope.push("w", number_dynamic(w));
    scope.push("h", number_dynamic(h));
    scope
}

fn sync_canvas_size(state: &Shared) {
    let mut s = state.borrow_mut();
    let (w, h) = (s.page.viewport.width, s.page.viewport.height);
    // Resizing a canvas wipes it.
    s.canvas.width = w;
    s.canvas.height = h;
    s.canvas.clear();
}

fn draw(inv: &Invocation, args: &Args) -> Dynamic {
    let code = args.text(0).unwrap_or_default();
    let ast = match compile_body(inv.engine, &code) {
        Ok(ast) => ast,
        Err(message) => {
            warn!("[Ritual canvas] draw body rejected: {}", message);
            return Dynamic::UNIT;
        }
    };
    sync_canvas_size(inv.state);
    let mut scope = canvas_scope(inv.state);
    let result = run_with_ast(inv.state, &ast, || {
        inv.engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
    });
    if let Err(err) = result {
        warn!("[Ritual canvas] draw failed: {}", describe_error(&err));
    }
    Dynamic::UNIT
}

fn draw_loop(inv: &Invocation, args: &Args) -> Dynamic {
    let code = args.text(0).unwrap_or_default();
    stop_canvas(inv.state);
    let ast = match compile_body(inv.engine, &code) {
        Ok(ast) => ast,
        Err(message) => {
            warn!("[Ritual canvas] drawLoop body rejected: {}", message);
            return Dynamic::UNIT;
        }
    };
    sync_canvas_size(inv.state);
    let generation = inv.state.borrow_mut().canvas.start_loop(ast);
    debug!("[Ritual canvas] Draw loop {} started", generation);
    Dynamic::UNIT
}

/// Run the active draw loop body once. Returns whether the loop is still running.
pub fn run_canvas_frame(engine: &Engine, state: &Shared) -> bool {
    let budget = state.borrow().config.frame_error_budget;
    let Some((generation, ast, frame)) = state.borrow().canvas.next_frame() else {
        return false;
    };
    let mut scope = canvas_scope(state);
    scope.push("frame", int_dynamic(frame));
    let result = run_with_ast(state, &ast, || {
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map(|_| ())
            .map_err(|err| describe_error(&err))
    });
    state.borrow_mut().canvas.record_frame(generation, result, budget)
}

/// Stop the draw loop and wipe the canvas.
pub fn stop_canvas(state: &Shared) {
    let mut s = state.borrow_mut();
    s.canvas.stop_loop();
    s.canvas.clear();
}

fn kill_draw(inv: &Invocation, _args: &Args) -> Dynamic {
    stop_canvas(inv.state);
    Dynamic::UNIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityTable;
    use crate::config::SandboxConfig;
    use crate::engine::build_engine;
    use crate::registry::NoCaptureDevice;
    use crate::state::SandboxState;

    fn setup() -> (Engine, Shared) {
        let state =
            SandboxState::new(SandboxConfig::default(), Box::new(NoCaptureDevice)).into_shared();
        let engine = build_engine(&state, &CapabilityTable::default());
        (engine, state)
    }

    fn call(engine: &Engine, state: &Shared, handler: super::super::Handler, code: &str) {
        handler(
            &Invocation { engine, state },
            &Args::new(vec![Dynamic::from(code.to_string())]),
        );
    }

    #[test]
    fn sequential_spawns_leave_one_scene_and_one_loop() {
        let (engine, state) = setup();
        for _ in 0..4 {
            call(
                &engine,
                &state,
                spawn_3d,
                "let cube = THREE.Mesh(THREE.BoxGeometry(1, 1, 1), THREE.MeshBasicMaterial()); scene.add(cube); return || { cube.rotation.y += 0.01; };",
            );
        }
        let stats = state.borrow().scene.stats();
        assert!(stats.live);
        assert_eq!(stats.renderers_created, 4);
        assert_eq!(stats.renderers_disposed, 3);
        assert_eq!(stats.loops_started - stats.loops_stopped, 1);
        assert!(state.borrow().scene.loop_running());
        assert!(run_scene_frame(&engine, &state));
    }

    #[test]
    fn setup_failure_tears_the_scene_down() {
        let (engine, state) = setup();
        call(&engine, &state, spawn_3d, "throw \"no light here\";");
        let stats = state.borrow().scene.stats();
        assert!(!stats.live);
        assert_eq!(stats.setup_failures, 1);
    }

    #[test]
    fn a_scene_without_callback_still_renders() {
        let (engine, state) = setup();
        call(&engine, &state, spawn_3d, "camera.position.z = 8;");
        assert!(run_scene_frame(&engine, &state));
        assert!(run_scene_frame(&engine, &state));
        let s = state.borrow();
        assert_eq!(s.scene.live().map(|i| i.renderer.frames_rendered), Some(2));
    }

    #[test]
    fn failing_frames_stop_the_scene() {
        let (engine, state) = setup();
        call(&engine, &state, spawn_3d, "return || { throw \"bad frame\"; };");
        let mut frames = 0;
        while run_scene_frame(&engine, &state) {
            frames += 1;
            assert!(frames < 10, "scene never stopped");
        }
        assert_eq!(frames, 4);
        assert!(!state.borrow().scene.stats().live);
    }

    #[test]
    fn draw_runs_once_with_dimensions() {
        let (engine, state) = setup();
        call(&engine, &state, draw, "ctx.fillRect(0, 0, w / 2, h / 2);");
        let s = state.borrow();
        let list = s.canvas.display_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].args, vec![0.0, 0.0, 640.0, 400.0]);
        assert!(!s.canvas.is_running());
    }

    #[test]
    fn draw_loop_sees_the_frame_counter_and_stops_on_errors() {
        let (engine, state) = setup();
        call(&engine, &state, draw_loop, "ctx.fillText(\"\" + frame, 0, 0);");
        assert!(run_canvas_frame(&engine, &state));
        assert!(run_canvas_frame(&engine, &state));
        assert_eq!(
            state.borrow().canvas.display_list()[1].text.as_deref(),
            Some("1")
        );

        call(&engine, &state, draw_loop, "if frame >= 0 { throw \"smudge\"; }");
        assert!(state.borrow().canvas.display_list().is_empty());
        let mut frames = 0;
        while run_canvas_frame(&engine, &state) {
            frames += 1;
        }
        assert_eq!(frames, 4);
        assert!(!state.borrow().canvas.is_running());
    }

    #[test]
    fn kill_draw_stops_and_clears() {
        let (engine, state) = setup();
        call(&engine, &state, draw_loop, "ctx.fillRect(1, 1, 1, 1);");
        run_canvas_frame(&engine, &state);
        call(&engine, &state, kill_draw, "");
        let s = state.borrow();
        assert!(!s.canvas.is_running());
        assert!(s.canvas.display_list().is_empty());
    }
}
