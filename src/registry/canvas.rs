//! The 2D canvas: a bounded display list and at most one animation loop.

use std::collections::BTreeMap;
use std::rc::Rc;

use bevy::log::warn;
use rhai::AST;
use serde::Serialize;

const MAX_DISPLAY_LIST: usize = 4096;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrawCommand {
    pub op: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DrawCommand {
    pub fn new(op: &str, args: Vec<f64>) -> Self {
        Self {
            op: op.to_string(),
            args,
            text: None,
        }
    }

    pub fn with_text(op: &str, args: Vec<f64>, text: &str) -> Self {
        Self {
            op: op.to_string(),
            args,
            text: Some(text.to_string()),
        }
    }
}

pub struct CanvasLoop {
    pub generation: u64,
    pub body: Rc<AST>,
    pub frame: u64,
    pub consecutive_errors: u32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CanvasStats {
    pub loop_running: bool,
    pub display_list_len: usize,
    pub loops_started: u64,
    pub loops_stopped: u64,
    pub frames_drawn: u64,
    pub frame_failures: u64,
    pub commands_dropped: u64,
}

pub struct CanvasRegistry {
    pub width: f64,
    pub height: f64,
    display_list: Vec<DrawCommand>,
    /// Current context properties (`fillStyle`, `lineWidth`, ...).
    props: BTreeMap<String, String>,
    active: Option<CanvasLoop>,
    next_generation: u64,
    stats: CanvasStats,
}

impl CanvasRegistry {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            display_list: Vec::new(),
            props: BTreeMap::new(),
            active: None,
            next_generation: 0,
            stats: CanvasStats::default(),
        }
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.display_list.push(command);
        if self.display_list.len() > MAX_DISPLAY_LIST {
            let excess = self.display_list.len() - MAX_DISPLAY_LIST;
            self.display_list.drain(0..excess);
            self.stats.commands_dropped += excess as u64;
        }
    }

    pub fn clear(&mut self) {
        self.display_list.clear();
    }

    pub fn set_prop(&mut self, name: &str, value: &str) {
        self.props.insert(name.to_string(), value.to_string());
    }

    pub fn prop(&self, name: &str) -> Option<&str> {
        self.props.get(name).map(String::as_str)
    }

    pub fn display_list(&self) -> &[DrawCommand] {
        &self.display_list
    }

    /// Replace any running loop with `body`; returns the new loop's generation.
    pub fn start_loop(&mut self, body: Rc<AST>) -> u64 {
        self.stop_loop();
        self.next_generation += 1;
        self.active = Some(CanvasLoop {
            generation: self.next_generation,
            body,
            frame: 0,
            consecutive_errors: 0,
        });
        self.stats.loops_started += 1;
        self.next_generation
    }

    pub fn stop_loop(&mut self) -> bool {
        if self.active.take().is_some() {
            self.stats.loops_stopped += 1;
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// The body and frame number for the next frame.
    pub fn next_frame(&self) -> Option<(u64, Rc<AST>, u64)> {
        self.active
            .as_ref()
            .map(|active| (active.generation, active.body.clone(), active.frame))
    }

    /// Record one frame; returns `false` once the loop has stopped itself.
    pub fn record_frame(&mut self, generation: u64, result: Result<(), String>, budget: u32) -> bool {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.generation == generation)
        else {
            return false;
        };
        active.frame += 1;
        match result {
            Ok(()) => {
                active.consecutive_errors = 0;
                self.stats.frames_drawn += 1;
                true
            }
            Err(message) => {
                active.consecutive_errors += 1;
                let errors = active.consecutive_errors;
                self.stats.frame_failures += 1;
                if errors >= budget.max(1) {
                    warn!(
                        "[Ritual canvas] Draw loop stopped after {} consecutive errors: {}",
                        errors, message
                    );
                    self.stop_loop();
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn stats(&self) -> CanvasStats {
        CanvasStats {
            loop_running: self.active.is_some(),
            display_list_len: self.display_list.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Rc<AST> {
        Rc::new(AST::empty())
    }

    #[test]
    fn loop_stops_after_budget_failures() {
        let mut canvas = CanvasRegistry::new(100.0, 100.0);
        let generation = canvas.start_loop(body());
        for _ in 0..4 {
            assert!(canvas.record_frame(generation, Err("bad".to_string()), 5));
        }
        assert!(!canvas.record_frame(generation, Err("bad".to_string()), 5));
        assert!(!canvas.is_running());
        assert_eq!(canvas.stats().loops_stopped, 1);
    }

    #[test]
    fn success_resets_the_error_run() {
        let mut canvas = CanvasRegistry::new(100.0, 100.0);
        let generation = canvas.start_loop(body());
        for _ in 0..4 {
            canvas.record_frame(generation, Err("bad".to_string()), 5);
        }
        assert!(canvas.record_frame(generation, Ok(()), 5));
        for _ in 0..4 {
            assert!(canvas.record_frame(generation, Err("bad".to_string()), 5));
        }
        assert!(canvas.is_running());
        assert_eq!(canvas.next_frame().map(|(_, _, frame)| frame), Some(9));
    }

    #[test]
    fn new_loop_replaces_old_one() {
        let mut canvas = CanvasRegistry::new(100.0, 100.0);
        let first = canvas.start_loop(body());
        let second = canvas.start_loop(body());
        assert_ne!(first, second);
        assert!(!canvas.record_frame(first, Ok(()), 5));
        assert_eq!(canvas.stats().loops_started, 2);
        assert_eq!(canvas.stats().loops_stopped, 1);
    }

    #[test]
    fn display_list_is_bounded() {
        let mut canvas = CanvasRegistry::new(100.0, 100.0);
        for i in 0..(MAX_DISPLAY_LIST + 3) {
            canvas.push(DrawCommand::new("fillRect", vec![i as f64, 0.0, 1.0, 1.0]));
        }
        assert_eq!(canvas.display_list().len(), MAX_DISPLAY_LIST);
        assert_eq!(canvas.stats().commands_dropped, 3);
    }
}
