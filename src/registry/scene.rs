//! The single live 3D scene: renderer, scene graph, camera and frame loop.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bevy::log::{info, warn};
use serde::Serialize;

use crate::engine::ScriptCallback;

pub type NodeId = u64;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Geometry {
    pub kind: String,
    pub params: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Material {
    pub kind: String,
    pub color: u32,
    pub opacity: f64,
    pub transparent: bool,
    pub wireframe: bool,
    /// Numeric extras (`size`, `emissive`, `roughness`, ...).
    pub props: BTreeMap<String, f64>,
}

impl Material {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            color: 0xffffff,
            opacity: 1.0,
            transparent: false,
            wireframe: false,
            props: BTreeMap::new(),
        }
    }
}

/// Materials are shared between meshes and mutated in place by scripts.
pub type SharedMaterial = Rc<RefCell<Material>>;

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub kind: String,
    pub name: String,
    pub position: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub visible: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub geometry: Option<Geometry>,
    pub material: Option<SharedMaterial>,
    pub color: Option<u32>,
    pub intensity: Option<f64>,
    pub params: BTreeMap<String, f64>,
}

impl SceneNode {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: String::new(),
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            visible: true,
            parent: None,
            children: Vec::new(),
            geometry: None,
            material: None,
            color: None,
            intensity: None,
            params: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RendererState {
    pub width: f64,
    pub height: f64,
    pub pixel_ratio: f64,
    pub clear_color: u32,
    pub clear_alpha: f64,
    pub frames_rendered: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub position: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub visible: bool,
    pub parent: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<Material>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SceneSnapshot {
    pub generation: u64,
    pub background: Option<u32>,
    pub loop_running: bool,
    pub frames: u64,
    pub renderer: RendererState,
    pub nodes: Vec<NodeSnapshot>,
}

pub struct SceneInstance {
    pub generation: u64,
    pub scene_root: NodeId,
    pub camera: NodeId,
    pub background: Option<u32>,
    pub fog: Option<(u32, f64, f64)>,
    pub renderer: RendererState,
    pub frame_callback: Option<ScriptCallback>,
    pub frames: u64,
    pub consecutive_errors: u32,
    nodes: BTreeMap<NodeId, SceneNode>,
    next_node: NodeId,
}

impl SceneInstance {
    fn new(generation: u64, width: f64, height: f64) -> Self {
        let mut instance = Self {
            generation,
            scene_root: 0,
            camera: 0,
            background: None,
            fog: None,
            renderer: RendererState {
                width,
                height,
                pixel_ratio: 1.0,
                clear_color: 0x000000,
                clear_alpha: 0.0,
                frames_rendered: 0,
            },
            frame_callback: None,
            frames: 0,
            consecutive_errors: 0,
            nodes: BTreeMap::new(),
            next_node: 0,
        };
        instance.scene_root = instance.add_node("Scene");
        instance.camera = instance.add_node("PerspectiveCamera");
        if let Some(camera) = instance.nodes.get_mut(&instance.camera) {
            camera.position[2] = 5.0;
            camera.params.insert("fov".to_string(), 75.0);
            camera
                .params
                .insert("aspect".to_string(), width / height.max(1.0));
            camera.params.insert("near".to_string(), 0.1);
            camera.params.insert("far".to_string(), 1000.0);
        }
        instance
    }

    pub fn add_node(&mut self, kind: &str) -> NodeId {
        self.next_node += 1;
        self.nodes.insert(self.next_node, SceneNode::new(kind));
        self.next_node
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.nodes.get(&current).and_then(|node| node.parent);
        }
        out
    }

    /// Re-parent `child` under `parent`. Cycles and unknown ids are rejected.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child
            || !self.nodes.contains_key(&parent)
            || !self.nodes.contains_key(&child)
            || self.ancestors(parent).contains(&child)
        {
            return false;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        true
    }

    pub fn detach(&mut self, child: NodeId) -> bool {
        let Some(parent) = self.nodes.get(&child).and_then(|node| node.parent) else {
            return false;
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|&c| c != child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        true
    }

    /// Nodes reachable from the scene root, root excluded.
    pub fn attached_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.scene_root];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                count += node.children.len();
                stack.extend(node.children.iter().copied());
            }
        }
        count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            generation: self.generation,
            background: self.background,
            loop_running: self.frame_callback.is_some(),
            frames: self.frames,
            renderer: self.renderer.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|(&id, node)| NodeSnapshot {
                    id,
                    kind: node.kind.clone(),
                    name: node.name.clone(),
                    position: node.position,
                    rotation: node.rotation,
                    scale: node.scale,
                    visible: node.visible,
                    parent: node.parent,
                    geometry: node.geometry.clone(),
                    material: node.material.as_ref().map(|m| m.borrow().clone()),
                    color: node.color,
                    intensity: node.intensity,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SceneStats {
    pub live: bool,
    pub generation: u64,
    pub renderers_created: u64,
    pub renderers_disposed: u64,
    pub loops_started: u64,
    pub loops_stopped: u64,
    pub setup_failures: u64,
    pub frame_failures: u64,
}

#[derive(Default)]
pub struct SceneRegistry {
    current: Option<SceneInstance>,
    next_generation: u64,
    stats: SceneStats,
}

impl SceneRegistry {
    /// Tear down whatever is live, then build a fresh renderer/scene/camera.
    pub fn create(&mut self, width: f64, height: f64) -> u64 {
        self.teardown();
        self.next_generation += 1;
        self.current = Some(SceneInstance::new(self.next_generation, width, height));
        self.stats.renderers_created += 1;
        self.next_generation
    }

    pub fn teardown(&mut self) -> bool {
        let Some(instance) = self.current.take() else {
            return false;
        };
        self.stats.renderers_disposed += 1;
        if instance.frame_callback.is_some() {
            self.stats.loops_stopped += 1;
        }
        info!(
            "[Ritual 3D] Disposed scene {} after {} frame(s)",
            instance.generation, instance.frames
        );
        true
    }

    pub fn live(&self) -> Option<&SceneInstance> {
        self.current.as_ref()
    }

    pub fn get(&self, generation: u64) -> Option<&SceneInstance> {
        self.current
            .as_ref()
            .filter(|instance| instance.generation == generation)
    }

    pub fn get_mut(&mut self, generation: u64) -> Option<&mut SceneInstance> {
        self.current
            .as_mut()
            .filter(|instance| instance.generation == generation)
    }

    pub fn is_live(&self, generation: u64) -> bool {
        self.get(generation).is_some()
    }

    pub fn start_loop(&mut self, generation: u64, callback: ScriptCallback) -> bool {
        let Some(instance) = self
            .current
            .as_mut()
            .filter(|instance| instance.generation == generation)
        else {
            return false;
        };
        if instance.frame_callback.is_none() {
            self.stats.loops_started += 1;
        }
        instance.frame_callback = Some(callback);
        true
    }

    pub fn loop_running(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |instance| instance.frame_callback.is_some())
    }

    pub fn frame_callback(&self) -> Option<(u64, ScriptCallback)> {
        let instance = self.current.as_ref()?;
        instance
            .frame_callback
            .clone()
            .map(|callback| (instance.generation, callback))
    }

    pub fn note_setup_failure(&mut self, generation: u64, message: &str) {
        self.stats.setup_failures += 1;
        warn!("[Ritual 3D] Setup failed: {}", message);
        if self.is_live(generation) {
            self.teardown();
        }
    }

    /// Record one frame; returns `false` once the loop has been torn down.
    pub fn record_frame(&mut self, generation: u64, result: Result<(), String>, budget: u32) -> bool {
        let Some(instance) = self.get_mut(generation) else {
            return false;
        };
        match result {
            Ok(()) => {
                instance.consecutive_errors = 0;
                instance.frames += 1;
                instance.renderer.frames_rendered += 1;
                true
            }
            Err(message) => {
                instance.consecutive_errors += 1;
                let errors = instance.consecutive_errors;
                self.stats.frame_failures += 1;
                if errors >= budget.max(1) {
                    warn!(
                        "[Ritual 3D] Frame loop stopped after {} consecutive errors: {}",
                        errors, message
                    );
                    self.teardown();
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn stats(&self) -> SceneStats {
        SceneStats {
            live: self.current.is_some(),
            generation: self.current.as_ref().map_or(0, |i| i.generation),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_replaces_previous_instance() {
        let mut scenes = SceneRegistry::default();
        let mut last = 0;
        for _ in 0..4 {
            last = scenes.create(800.0, 600.0);
        }
        let stats = scenes.stats();
        assert_eq!(stats.renderers_created, 4);
        assert_eq!(stats.renderers_disposed, 3);
        assert!(scenes.is_live(last));
        assert!(!scenes.is_live(last - 1));
    }

    #[test]
    fn graph_attach_rejects_cycles() {
        let mut scenes = SceneRegistry::default();
        let generation = scenes.create(800.0, 600.0);
        let instance = scenes.get_mut(generation).expect("live scene");
        let group = instance.add_node("Group");
        let mesh = instance.add_node("Mesh");
        let root = instance.scene_root;
        assert!(instance.attach(root, group));
        assert!(instance.attach(group, mesh));
        assert!(!instance.attach(mesh, group));
        assert_eq!(instance.attached_count(), 2);
        assert!(instance.detach(mesh));
        assert_eq!(instance.attached_count(), 1);
    }

    #[test]
    fn camera_defaults() {
        let mut scenes = SceneRegistry::default();
        let generation = scenes.create(1000.0, 500.0);
        let instance = scenes.get(generation).expect("live scene");
        let camera = instance.node(instance.camera).expect("camera node");
        assert_eq!(camera.position[2], 5.0);
        assert_eq!(camera.params.get("aspect").copied(), Some(2.0));
    }

    #[test]
    fn frame_results_for_stale_generation_are_ignored() {
        let mut scenes = SceneRegistry::default();
        let old = scenes.create(800.0, 600.0);
        scenes.create(800.0, 600.0);
        assert!(!scenes.record_frame(old, Err("boom".to_string()), 5));
        assert_eq!(scenes.stats().frame_failures, 0);
    }
}
