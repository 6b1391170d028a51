//! Lexically scoped variable stack for a run.
//!
//! Reads traverse frames top to root, so inner bindings shadow outer ones.
//! Writes go to the nearest frame already defining the name; if none does,
//! the nearest barrier frame; if there is no barrier, the root. Barrier
//! frames are pushed for isolated subflow calls: reads still see the
//! caller's variables through them, but writes cannot escape past one.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone)]
struct Frame {
    vars: HashMap<String, Value>,
    barrier: bool,
}

/// A stack of variable frames. Frame 0 is the root.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    /// Create a stack whose root frame holds the given bindings.
    pub fn new(root: HashMap<String, Value>) -> Self {
        Self {
            frames: vec![Frame {
                vars: root,
                barrier: false,
            }],
        }
    }

    /// Push a transparent frame. Writes to names it does not define fall
    /// through to outer frames.
    pub fn push(&mut self, vars: HashMap<String, Value>) {
        self.frames.push(Frame {
            vars,
            barrier: false,
        });
    }

    /// Push a barrier frame. Writes from above it never reach below it.
    pub fn push_barrier(&mut self, vars: HashMap<String, Value>) {
        self.frames.push(Frame {
            vars,
            barrier: true,
        });
    }

    /// Pop the top frame, returning its bindings. The root frame is never
    /// popped.
    pub fn pop(&mut self) -> Option<HashMap<String, Value>> {
        if self.frames.len() > 1 {
            self.frames.pop().map(|f| f.vars)
        } else {
            None
        }
    }

    /// Number of frames, root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Read a variable with shadowing: topmost definition wins.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.vars.get(name))
    }

    /// Write a variable. Scanning from the top: the first frame defining
    /// the name takes the write; a barrier frame takes it instead if the
    /// name is not defined at or above it; otherwise the root takes it.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut target = 0;
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            if frame.vars.contains_key(&name) {
                target = idx;
                break;
            }
            if frame.barrier {
                target = idx;
                break;
            }
        }
        self.frames[target].vars.insert(name, value);
    }

    /// Read from one exact frame, no shadowing traversal.
    pub fn get_in_frame(&self, index: usize, name: &str) -> Option<&Value> {
        self.frames.get(index).and_then(|f| f.vars.get(name))
    }

    /// Write into one exact frame. Returns false if the index is out of
    /// range.
    pub fn set_in_frame(&mut self, index: usize, name: impl Into<String>, value: Value) -> bool {
        match self.frames.get_mut(index) {
            Some(frame) => {
                frame.vars.insert(name.into(), value);
                true
            }
            None => false,
        }
    }

    /// The visible bindings after shadowing, as one flat map. This is the
    /// snapshot handlers and expressions see.
    pub fn flatten(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for frame in &self.frames {
            for (k, v) in &frame.vars {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
