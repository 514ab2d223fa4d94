//! The `THREE` library: scene-graph constructors and handles backed by the
//! live scene. Every handle remembers the scene generation it was created in
//! and becomes inert once that scene is gone.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, INT};

use super::{number_dynamic, register_variadic, to_number, to_text, Args};
use crate::registry::scene::{Geometry, Material, NodeId, SceneInstance, SceneNode, SharedMaterial};
use crate::state::Shared;

#[derive(Clone)]
pub struct GraphicsLib {
    state: Shared,
}

impl GraphicsLib {
    pub fn new(state: Shared) -> Self {
        Self { state }
    }

    fn live_generation(&self) -> u64 {
        self.state
            .borrow()
            .scene
            .live()
            .map_or(0, |instance| instance.generation)
    }

    fn spawn(&self, kind: &str, init: impl FnOnce(&mut SceneNode)) -> Object3D {
        let generation = self.live_generation();
        let mut state = self.state.borrow_mut();
        let node = match state.scene.get_mut(generation) {
            Some(instance) => {
                let id = instance.add_node(kind);
                if let Some(node) = instance.node_mut(id) {
                    init(node);
                }
                id
            }
            None => 0,
        };
        Object3D {
            state: self.state.clone(),
            generation,
            node,
        }
    }
}

/// A node in a scene; `node == 0` or a stale generation makes it inert.
#[derive(Clone)]
pub struct Object3D {
    state: Shared,
    generation: u64,
    node: NodeId,
}

impl Object3D {
    pub fn scene_root(state: &Shared, generation: u64) -> Self {
        let node = state
            .borrow()
            .scene
            .get(generation)
            .map_or(0, |instance| instance.scene_root);
        Self {
            state: state.clone(),
            generation,
            node,
        }
    }

    pub fn camera(state: &Shared, generation: u64) -> Self {
        let node = state
            .borrow()
            .scene
            .get(generation)
            .map_or(0, |instance| instance.camera);
        Self {
            state: state.clone(),
            generation,
            node,
        }
    }

    fn with_instance<T>(&self, f: impl FnOnce(&mut SceneInstance, NodeId) -> T) -> Option<T> {
        let mut state = self.state.borrow_mut();
        let instance = state.scene.get_mut(self.generation)?;
        instance.node(self.node)?;
        Some(f(instance, self.node))
    }

    fn with_node<T>(&self, f: impl FnOnce(&mut SceneNode) -> T) -> Option<T> {
        let mut state = self.state.borrow_mut();
        state
            .scene
            .get_mut(self.generation)?
            .node_mut(self.node)
            .map(f)
    }

    fn sibling(&self, node: NodeId) -> Object3D {
        Object3D {
            state: self.state.clone(),
            generation: self.generation,
            node,
        }
    }

    fn is_root(&self) -> bool {
        self.with_instance(|instance, node| instance.scene_root == node)
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Axis3 {
    Position,
    Rotation,
    Scale,
}

#[derive(Clone)]
enum VecTarget {
    Node(Object3D, Axis3),
    Free(Rc<RefCell<[f64; 3]>>),
}

/// `position` / `rotation` / `scale`, or a free `THREE.Vector3`.
#[derive(Clone)]
pub struct Vec3Ref {
    target: VecTarget,
}

impl Vec3Ref {
    fn free(x: f64, y: f64, z: f64) -> Self {
        Self {
            target: VecTarget::Free(Rc::new(RefCell::new([x, y, z]))),
        }
    }

    fn get(&self) -> [f64; 3] {
        match &self.target {
            VecTarget::Node(object, axis) => object
                .with_node(|node| match axis {
                    Axis3::Position => node.position,
                    Axis3::Rotation => node.rotation,
                    Axis3::Scale => node.scale,
                })
                .unwrap_or([0.0; 3]),
            VecTarget::Free(values) => *values.borrow(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut [f64; 3])) {
        match &self.target {
            VecTarget::Node(object, axis) => {
                object.with_node(|node| match axis {
                    Axis3::Position => f(&mut node.position),
                    Axis3::Rotation => f(&mut node.rotation),
                    Axis3::Scale => f(&mut node.scale),
                });
            }
            VecTarget::Free(values) => f(&mut values.borrow_mut()),
        }
    }

    fn set_component(&self, index: usize, value: &Dynamic) {
        if let Some(value) = to_number(value) {
            self.update(|v| v[index] = value);
        }
    }
}

#[derive(Clone)]
pub struct GeometryValue(pub Geometry);

#[derive(Clone)]
pub struct MaterialRef(pub SharedMaterial);

#[derive(Clone)]
enum ColorTarget {
    Free(Rc<Cell<u32>>),
    Material(SharedMaterial),
    Node(Object3D),
}

#[derive(Clone)]
pub struct ColorValue {
    target: ColorTarget,
}

impl ColorValue {
    fn free(value: u32) -> Self {
        Self {
            target: ColorTarget::Free(Rc::new(Cell::new(value))),
        }
    }

    pub fn get(&self) -> u32 {
        match &self.target {
            ColorTarget::Free(value) => value.get(),
            ColorTarget::Material(material) => material.borrow().color,
            ColorTarget::Node(object) => object
                .with_node(|node| node.color.unwrap_or(0xffffff))
                .unwrap_or(0xffffff),
        }
    }

    fn set(&self, color: u32) {
        match &self.target {
            ColorTarget::Free(value) => value.set(color),
            ColorTarget::Material(material) => material.borrow_mut().color = color,
            ColorTarget::Node(object) => {
                object.with_node(|node| node.color = Some(color));
            }
        }
    }
}

#[derive(Clone)]
pub struct FogValue {
    color: u32,
    near: f64,
    far: f64,
}

#[derive(Clone)]
pub struct RendererApi {
    state: Shared,
    generation: u64,
}

impl RendererApi {
    pub fn new(state: &Shared, generation: u64) -> Self {
        Self {
            state: state.clone(),
            generation,
        }
    }

    fn update(&self, f: impl FnOnce(&mut SceneInstance)) {
        if let Some(instance) = self.state.borrow_mut().scene.get_mut(self.generation) {
            f(instance);
        }
    }
}

#[derive(Clone)]
pub struct Clock {
    state: Shared,
    started_ms: u64,
    last_ms: Rc<Cell<u64>>,
}

/// Accepts `0xff00ff`, `"#f0f"`, `"#ff00ff"`, a few names and `THREE.Color`.
pub fn to_color(value: &Dynamic) -> Option<u32> {
    if let Some(color) = value.clone().try_cast::<ColorValue>() {
        return Some(color.get());
    }
    if let Ok(v) = value.as_int() {
        return Some((v.max(0) as u64 & 0xffffff) as u32);
    }
    if let Ok(v) = value.as_float() {
        return Some((v.max(0.0) as u64 & 0xffffff) as u32);
    }
    let text = to_text(value).trim().to_ascii_lowercase();
    if let Some(hex) = text.strip_prefix('#') {
        return match hex.len() {
            3 => {
                let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
                u32::from_str_radix(&expanded, 16).ok()
            }
            6 => u32::from_str_radix(hex, 16).ok(),
            _ => None,
        };
    }
    let named = match text.as_str() {
        "black" => 0x000000,
        "white" => 0xffffff,
        "red" => 0xff0000,
        "green" => 0x008000,
        "lime" => 0x00ff00,
        "blue" => 0x0000ff,
        "yellow" => 0xffff00,
        "cyan" => 0x00ffff,
        "magenta" | "fuchsia" => 0xff00ff,
        "purple" => 0x800080,
        "orange" => 0xffa500,
        "gray" | "grey" => 0x808080,
        _ => return None,
    };
    Some(named)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> u32 {
    let h = h.rem_euclid(1.0);
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let channel = |t: f64| {
        let t = t.rem_euclid(1.0);
        let v = if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        };
        (v * 255.0).round().clamp(0.0, 255.0) as u32
    };
    (channel(h + 1.0 / 3.0) << 16) | (channel(h) << 8) | channel(h - 1.0 / 3.0)
}

fn material_from(kind: &str, args: &Args) -> MaterialRef {
    let mut material = Material::new(kind);
    if let Some(options) = args.map(0) {
        apply_material_options(&mut material, &options);
    }
    MaterialRef(Rc::new(RefCell::new(material)))
}

fn apply_material_options(material: &mut Material, options: &Map) {
    for (key, value) in options {
        match key.as_str() {
            "color" => {
                if let Some(color) = to_color(value) {
                    material.color = color;
                }
            }
            "opacity" => {
                if let Some(opacity) = to_number(value) {
                    material.opacity = opacity.clamp(0.0, 1.0);
                }
            }
            "transparent" => material.transparent = value.as_bool().unwrap_or(false),
            "wireframe" => material.wireframe = value.as_bool().unwrap_or(false),
            other => {
                if let Some(number) = to_number(value).or_else(|| to_color(value).map(f64::from)) {
                    material.props.insert(other.to_string(), number);
                }
            }
        }
    }
}

fn args_numbers(args: &Args) -> Vec<f64> {
    (0..args.len()).filter_map(|i| args.number(i)).collect()
}

const GEOMETRIES: [&str; 14] = [
    "BoxGeometry",
    "SphereGeometry",
    "TorusGeometry",
    "TorusKnotGeometry",
    "PlaneGeometry",
    "CylinderGeometry",
    "ConeGeometry",
    "IcosahedronGeometry",
    "OctahedronGeometry",
    "TetrahedronGeometry",
    "DodecahedronGeometry",
    "RingGeometry",
    "CircleGeometry",
    "BufferGeometry",
];

const MATERIALS: [&str; 8] = [
    "MeshBasicMaterial",
    "MeshStandardMaterial",
    "MeshPhongMaterial",
    "MeshLambertMaterial",
    "MeshNormalMaterial",
    "MeshPhysicalMaterial",
    "PointsMaterial",
    "LineBasicMaterial",
];

const LIGHTS: [&str; 5] = [
    "AmbientLight",
    "PointLight",
    "DirectionalLight",
    "SpotLight",
    "HemisphereLight",
];

pub(super) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<GraphicsLib>("THREE")
        .register_type_with_name::<Object3D>("Object3D")
        .register_type_with_name::<Vec3Ref>("Vector3")
        .register_type_with_name::<GeometryValue>("Geometry")
        .register_type_with_name::<MaterialRef>("Material")
        .register_type_with_name::<ColorValue>("Color")
        .register_type_with_name::<FogValue>("Fog")
        .register_type_with_name::<RendererApi>("WebGLRenderer")
        .register_type_with_name::<Clock>("Clock");

    register_constructors(engine);
    register_object(engine);
    register_vector(engine);
    register_material(engine);
    register_renderer(engine);
}

fn register_constructors(engine: &mut Engine) {
    for name in GEOMETRIES {
        register_variadic(engine, name, move |_: &Engine, _lib: GraphicsLib, args: Args| {
            Dynamic::from(GeometryValue(Geometry {
                kind: name.to_string(),
                params: args_numbers(&args),
            }))
        });
    }
    for name in MATERIALS {
        register_variadic(engine, name, move |_: &Engine, _lib: GraphicsLib, args: Args| {
            Dynamic::from(material_from(name, &args))
        });
    }
    for name in LIGHTS {
        register_variadic(engine, name, move |_: &Engine, lib: GraphicsLib, args: Args| {
            let color = args.get(0).and_then(to_color).unwrap_or(0xffffff);
            let intensity = args.number(1).unwrap_or(1.0);
            Dynamic::from(lib.spawn(name, |node| {
                node.color = Some(color);
                node.intensity = Some(intensity);
            }))
        });
    }
    for name in ["Mesh", "Points", "Line", "LineSegments"] {
        register_variadic(engine, name, move |_: &Engine, lib: GraphicsLib, args: Args| {
            let geometry = args
                .get(0)
                .and_then(|v| v.clone().try_cast::<GeometryValue>())
                .map(|g| g.0);
            let material = args
                .get(1)
                .and_then(|v| v.clone().try_cast::<MaterialRef>())
                .map(|m| m.0);
            Dynamic::from(lib.spawn(name, |node| {
                node.geometry = geometry;
                node.material = material;
            }))
        });
    }
    for name in ["Group", "Object3D"] {
        register_variadic(engine, name, move |_: &Engine, lib: GraphicsLib, _args: Args| {
            Dynamic::from(lib.spawn(name, |_| {}))
        });
    }
    register_variadic(
        engine,
        "PerspectiveCamera",
        |_: &Engine, lib: GraphicsLib, args: Args| {
            let params = [
                ("fov", args.number_or(0, 75.0)),
                ("aspect", args.number_or(1, 1.0)),
                ("near", args.number_or(2, 0.1)),
                ("far", args.number_or(3, 1000.0)),
            ];
            Dynamic::from(lib.spawn("PerspectiveCamera", |node| {
                for (key, value) in params {
                    node.params.insert(key.to_string(), value);
                }
            }))
        },
    );
    register_variadic(engine, "Color", |_: &Engine, _lib: GraphicsLib, args: Args| {
        Dynamic::from(ColorValue::free(
            args.get(0).and_then(to_color).unwrap_or(0xffffff),
        ))
    });
    register_variadic(engine, "Vector3", |_: &Engine, _lib: GraphicsLib, args: Args| {
        Dynamic::from(Vec3Ref::free(
            args.number(0).unwrap_or(0.0),
            args.number(1).unwrap_or(0.0),
            args.number(2).unwrap_or(0.0),
        ))
    });
    register_variadic(engine, "Fog", |_: &Engine, _lib: GraphicsLib, args: Args| {
        Dynamic::from(FogValue {
            color: args.get(0).and_then(to_color).unwrap_or(0x000000),
            near: args.number_or(1, 1.0),
            far: args.number_or(2, 1000.0),
        })
    });
    register_variadic(engine, "Clock", |_: &Engine, lib: GraphicsLib, _args: Args| {
        let now = lib.state.borrow().now_ms;
        Dynamic::from(Clock {
            state: lib.state.clone(),
            started_ms: now,
            last_ms: Rc::new(Cell::new(now)),
        })
    });
    engine
        .register_fn("getElapsedTime", |clock: Clock| {
            let now = clock.state.borrow().now_ms;
            now.saturating_sub(clock.started_ms) as f64 / 1000.0
        })
        .register_fn("getDelta", |clock: Clock| {
            let now = clock.state.borrow().now_ms;
            let delta = now.saturating_sub(clock.last_ms.get());
            clock.last_ms.set(now);
            delta as f64 / 1000.0
        })
        .register_indexer_get(|_lib: &mut GraphicsLib, _name: rhai::ImmutableString| {
            Dynamic::UNIT
        });
}

fn register_object(engine: &mut Engine) {
    for (name, axis) in [
        ("position", Axis3::Position),
        ("rotation", Axis3::Rotation),
        ("scale", Axis3::Scale),
    ] {
        engine.register_get(name, move |object: &mut Object3D| Vec3Ref {
            target: VecTarget::Node(object.clone(), axis),
        });
        // Chained writes (`mesh.position.x = 1`) land here with the handle
        // itself; only arrays carry new values.
        engine.register_set(name, move |object: &mut Object3D, value: Dynamic| {
            let Some(values) = value.try_cast::<Array>() else {
                return;
            };
            let mut out = [0.0; 3];
            for (slot, item) in out.iter_mut().zip(values.iter()) {
                *slot = to_number(item).unwrap_or(0.0);
            }
            Vec3Ref {
                target: VecTarget::Node(object.clone(), axis),
            }
            .update(|v| *v = out);
        });
    }

    engine
        .register_get("visible", |object: &mut Object3D| {
            object.with_node(|node| node.visible).unwrap_or(false)
        })
        .register_set("visible", |object: &mut Object3D, visible: bool| {
            object.with_node(|node| node.visible = visible);
        })
        .register_get("name", |object: &mut Object3D| {
            object.with_node(|node| node.name.clone()).unwrap_or_default()
        })
        .register_set("name", |object: &mut Object3D, name: Dynamic| {
            let name = to_text(&name);
            object.with_node(|node| node.name = name);
        })
        .register_get("type", |object: &mut Object3D| {
            object.with_node(|node| node.kind.clone()).unwrap_or_default()
        })
        .register_get("children", |object: &mut Object3D| {
            let children = object
                .with_node(|node| node.children.clone())
                .unwrap_or_default();
            children
                .into_iter()
                .map(|id| Dynamic::from(object.sibling(id)))
                .collect::<Array>()
        })
        .register_get("parent", |object: &mut Object3D| {
            match object.with_node(|node| node.parent).flatten() {
                Some(parent) => Dynamic::from(object.sibling(parent)),
                None => Dynamic::UNIT,
            }
        })
        .register_get("material", |object: &mut Object3D| {
            match object.with_node(|node| node.material.clone()).flatten() {
                Some(material) => Dynamic::from(MaterialRef(material)),
                None => Dynamic::UNIT,
            }
        })
        .register_set("material", |object: &mut Object3D, value: Dynamic| {
            if let Some(material) = value.try_cast::<MaterialRef>() {
                object.with_node(|node| node.material = Some(material.0));
            }
        })
        .register_get("geometry", |object: &mut Object3D| {
            match object.with_node(|node| node.geometry.clone()).flatten() {
                Some(geometry) => Dynamic::from(GeometryValue(geometry)),
                None => Dynamic::UNIT,
            }
        })
        .register_set("geometry", |object: &mut Object3D, value: Dynamic| {
            if let Some(geometry) = value.try_cast::<GeometryValue>() {
                object.with_node(|node| node.geometry = Some(geometry.0));
            }
        })
        .register_get("color", |object: &mut Object3D| ColorValue {
            target: ColorTarget::Node(object.clone()),
        })
        .register_set("color", |object: &mut Object3D, value: Dynamic| {
            if let Some(color) = to_color(&value) {
                object.with_node(|node| node.color = Some(color));
            }
        })
        .register_get("intensity", |object: &mut Object3D| {
            number_dynamic(object.with_node(|node| node.intensity).flatten().unwrap_or(0.0))
        })
        .register_set("intensity", |object: &mut Object3D, value: Dynamic| {
            if let Some(intensity) = to_number(&value) {
                object.with_node(|node| node.intensity = Some(intensity));
            }
        })
        .register_get("background", |object: &mut Object3D| {
            let background = {
                let state = object.state.borrow();
                state.scene.get(object.generation).and_then(|i| i.background)
            };
            background.map_or(Dynamic::UNIT, |c| Dynamic::from(ColorValue::free(c)))
        })
        .register_set("background", |object: &mut Object3D, value: Dynamic| {
            if !object.is_root() {
                return;
            }
            let color = to_color(&value);
            let mut state = object.state.borrow_mut();
            if let Some(instance) = state.scene.get_mut(object.generation) {
                instance.background = color;
            }
        })
        .register_set("fog", |object: &mut Object3D, value: Dynamic| {
            let fog = value.try_cast::<FogValue>().map(|f| (f.color, f.near, f.far));
            let mut state = object.state.borrow_mut();
            if let Some(instance) = state.scene.get_mut(object.generation) {
                instance.fog = fog;
            }
        })
        .register_fn("remove", |object: Object3D, child: Object3D| {
            if child.generation == object.generation {
                object.with_instance(|instance, parent| {
                    if instance.node(child.node).and_then(|n| n.parent) == Some(parent) {
                        instance.detach(child.node);
                    }
                });
            }
        })
        .register_fn("updateProjectionMatrix", |_object: Object3D| {})
        .register_fn("updateMatrixWorld", |_object: Object3D| {})
        .register_fn(
            "traverse",
            |context: NativeCallContext,
             object: Object3D,
             callback: FnPtr|
             -> Result<(), Box<EvalAltResult>> {
                let ids = object
                    .with_instance(|instance, root| {
                        let mut out = Vec::new();
                        let mut stack = vec![root];
                        while let Some(current) = stack.pop() {
                            out.push(current);
                            if let Some(node) = instance.node(current) {
                                stack.extend(node.children.iter().rev().copied());
                            }
                        }
                        out
                    })
                    .unwrap_or_default();
                for id in ids {
                    callback.call_within_context::<Dynamic>(&context, (object.sibling(id),))?;
                }
                Ok(())
            },
        )
        .register_indexer_get(|object: &mut Object3D, key: rhai::ImmutableString| {
            object
                .with_node(|node| node.params.get(key.as_str()).copied())
                .flatten()
                .map_or(Dynamic::UNIT, number_dynamic)
        })
        .register_indexer_set(
            |object: &mut Object3D, key: rhai::ImmutableString, value: Dynamic| {
                if let Some(number) = to_number(&value) {
                    object.with_node(|node| {
                        node.params.insert(key.to_string(), number);
                    });
                }
            },
        );

    register_variadic(engine, "add", |_: &Engine, object: Object3D, args: Args| {
        for i in 0..args.len() {
            let Some(child) = args.get(i).and_then(|v| v.clone().try_cast::<Object3D>()) else {
                continue;
            };
            if child.generation != object.generation {
                continue;
            }
            object.with_instance(|instance, parent| instance.attach(parent, child.node));
        }
        Dynamic::UNIT
    });
    for (name, axis) in [("rotateX", 0), ("rotateY", 1), ("rotateZ", 2)] {
        engine.register_fn(name, move |object: Object3D, angle: Dynamic| {
            let angle = to_number(&angle).unwrap_or(0.0);
            object.with_node(|node| node.rotation[axis] += angle);
        });
    }
    for (name, axis) in [("translateX", 0), ("translateY", 1), ("translateZ", 2)] {
        engine.register_fn(name, move |object: Object3D, distance: Dynamic| {
            let distance = to_number(&distance).unwrap_or(0.0);
            object.with_node(|node| node.position[axis] += distance);
        });
    }
    register_variadic(engine, "lookAt", |_: &Engine, object: Object3D, args: Args| {
        let target = match args.get(0).and_then(|v| v.clone().try_cast::<Vec3Ref>()) {
            Some(vector) => vector.get(),
            None => [
                args.number(0).unwrap_or(0.0),
                args.number(1).unwrap_or(0.0),
                args.number(2).unwrap_or(0.0),
            ],
        };
        object.with_node(|node| {
            let dx = target[0] - node.position[0];
            let dy = target[1] - node.position[1];
            let dz = target[2] - node.position[2];
            node.rotation[1] = dx.atan2(dz);
            node.rotation[0] = -dy.atan2((dx * dx + dz * dz).sqrt());
        });
        Dynamic::UNIT
    });
}

fn register_vector(engine: &mut Engine) {
    for (name, index) in [("x", 0usize), ("y", 1), ("z", 2)] {
        engine
            .register_get(name, move |vector: &mut Vec3Ref| number_dynamic(vector.get()[index]))
            .register_set(name, move |vector: &mut Vec3Ref, value: Dynamic| {
                vector.set_component(index, &value)
            });
    }
    register_variadic(engine, "set", |_: &Engine, vector: Vec3Ref, args: Args| {
        let current = vector.get();
        let next = [
            args.number(0).unwrap_or(current[0]),
            args.number(1).unwrap_or(current[1]),
            args.number(2).unwrap_or(current[2]),
        ];
        vector.update(|v| *v = next);
        Dynamic::UNIT
    });
    engine
        .register_fn("setScalar", |vector: Vec3Ref, value: Dynamic| {
            if let Some(value) = to_number(&value) {
                vector.update(|v| *v = [value; 3]);
            }
        })
        .register_fn("copy", |vector: Vec3Ref, other: Vec3Ref| {
            let values = other.get();
            vector.update(|v| *v = values);
        })
        .register_fn("length", |vector: Vec3Ref| {
            let [x, y, z] = vector.get();
            (x * x + y * y + z * z).sqrt()
        });
}

fn register_material(engine: &mut Engine) {
    engine
        .register_get("color", |material: &mut MaterialRef| ColorValue {
            target: ColorTarget::Material(material.0.clone()),
        })
        .register_set("color", |material: &mut MaterialRef, value: Dynamic| {
            if let Some(color) = to_color(&value) {
                material.0.borrow_mut().color = color;
            }
        })
        .register_get("opacity", |material: &mut MaterialRef| {
            number_dynamic(material.0.borrow().opacity)
        })
        .register_set("opacity", |material: &mut MaterialRef, value: Dynamic| {
            if let Some(opacity) = to_number(&value) {
                material.0.borrow_mut().opacity = opacity.clamp(0.0, 1.0);
            }
        })
        .register_get("transparent", |material: &mut MaterialRef| {
            material.0.borrow().transparent
        })
        .register_set("transparent", |material: &mut MaterialRef, value: bool| {
            material.0.borrow_mut().transparent = value;
        })
        .register_get("wireframe", |material: &mut MaterialRef| {
            material.0.borrow().wireframe
        })
        .register_set("wireframe", |material: &mut MaterialRef, value: bool| {
            material.0.borrow_mut().wireframe = value;
        })
        .register_fn("dispose", |_material: MaterialRef| {})
        .register_fn("dispose", |_geometry: GeometryValue| {})
        .register_indexer_get(|material: &mut MaterialRef, key: rhai::ImmutableString| {
            material
                .0
                .borrow()
                .props
                .get(key.as_str())
                .copied()
                .map_or(Dynamic::UNIT, number_dynamic)
        })
        .register_indexer_set(
            |material: &mut MaterialRef, key: rhai::ImmutableString, value: Dynamic| {
                let mut options = Map::new();
                options.insert(key.as_str().into(), value);
                apply_material_options(&mut material.0.borrow_mut(), &options);
            },
        );

    engine
        .register_fn("setHex", |color: ColorValue, value: Dynamic| {
            if let Some(value) = to_color(&value) {
                color.set(value);
            }
        })
        .register_fn("set", |color: ColorValue, value: Dynamic| {
            if let Some(value) = to_color(&value) {
                color.set(value);
            }
        })
        .register_fn("getHex", |color: ColorValue| color.get() as INT)
        .register_fn(
            "setHSL",
            |color: ColorValue, h: Dynamic, s: Dynamic, l: Dynamic| {
                color.set(hsl_to_rgb(
                    to_number(&h).unwrap_or(0.0),
                    to_number(&s).unwrap_or(0.0),
                    to_number(&l).unwrap_or(0.0),
                ));
            },
        )
        .register_fn(
            "setRGB",
            |color: ColorValue, r: Dynamic, g: Dynamic, b: Dynamic| {
                let channel =
                    |v: &Dynamic| (to_number(v).unwrap_or(0.0).clamp(0.0, 1.0) * 255.0).round() as u32;
                color.set((channel(&r) << 16) | (channel(&g) << 8) | channel(&b));
            },
        );
}

fn register_renderer(engine: &mut Engine) {
    engine
        .register_fn("setSize", |renderer: RendererApi, w: Dynamic, h: Dynamic| {
            let (w, h) = (to_number(&w), to_number(&h));
            renderer.update(|instance| {
                if let (Some(w), Some(h)) = (w, h) {
                    instance.renderer.width = w.max(0.0);
                    instance.renderer.height = h.max(0.0);
                }
            });
        })
        .register_fn("setPixelRatio", |renderer: RendererApi, ratio: Dynamic| {
            let ratio = to_number(&ratio).unwrap_or(1.0).clamp(0.5, 4.0);
            renderer.update(|instance| instance.renderer.pixel_ratio = ratio);
        })
        .register_fn("render", |renderer: RendererApi, _scene: Object3D, _camera: Object3D| {
            renderer.update(|instance| instance.renderer.frames_rendered += 1);
        })
        .register_fn("dispose", |_renderer: RendererApi| {})
        .register_get("domElement", |_renderer: &mut RendererApi| Dynamic::UNIT);
    register_variadic(
        engine,
        "setClearColor",
        |_: &Engine, renderer: RendererApi, args: Args| {
            let color = args.get(0).and_then(to_color);
            let alpha = args.number(1);
            renderer.update(|instance| {
                if let Some(color) = color {
                    instance.renderer.clear_color = color;
                }
                if let Some(alpha) = alpha {
                    instance.renderer.clear_alpha = alpha.clamp(0.0, 1.0);
                }
            });
            Dynamic::UNIT
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_parse_from_numbers_strings_and_names() {
        assert_eq!(to_color(&Dynamic::from_int(0xff00ff)), Some(0xff00ff));
        assert_eq!(to_color(&Dynamic::from("#0f0")), Some(0x00ff00));
        assert_eq!(to_color(&Dynamic::from("#123456")), Some(0x123456));
        assert_eq!(to_color(&Dynamic::from("Red")), Some(0xff0000));
        assert_eq!(to_color(&Dynamic::from("nonsense")), None);
        assert_eq!(to_color(&Dynamic::from(ColorValue::free(0x010203))), Some(0x010203));
    }

    #[test]
    fn hsl_primaries() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), 0xff0000);
        assert_eq!(hsl_to_rgb(1.0 / 3.0, 1.0, 0.5), 0x00ff00);
        assert_eq!(hsl_to_rgb(0.0, 0.0, 1.0), 0xffffff);
    }

    #[test]
    fn material_options_fill_known_and_extra_fields() {
        let mut options = Map::new();
        options.insert("color".into(), Dynamic::from_int(0x00ff00));
        options.insert("wireframe".into(), Dynamic::from(true));
        options.insert("opacity".into(), Dynamic::from_float(3.0));
        options.insert("size".into(), Dynamic::from_float(0.05));
        let mut material = Material::new("PointsMaterial");
        apply_material_options(&mut material, &options);
        assert_eq!(material.color, 0x00ff00);
        assert!(material.wireframe);
        assert_eq!(material.opacity, 1.0);
        assert_eq!(material.props.get("size"), Some(&0.05));
    }
}
