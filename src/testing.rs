//! Scripted asset reader shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{ContentError, Result};
use crate::payload::{Dispose, Payload};
use crate::reader::{AssetReader, ReadContext};

/// Disposable stand-in for a loaded model.
#[derive(Debug)]
pub(crate) struct Model {
    pub(crate) name: String,
    pub(crate) generation: usize,
    disposals: AtomicUsize,
}

impl Model {
    pub(crate) fn new(name: &str, generation: usize) -> Self {
        Self {
            name: name.to_string(),
            generation,
            disposals: AtomicUsize::new(0),
        }
    }

    pub(crate) fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposals() > 0
    }
}

impl Dispose for Model {
    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sub-resource created while reading a model.
#[derive(Debug, Default)]
pub(crate) struct Buffer {
    disposals: AtomicUsize,
}

impl Buffer {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposals.load(Ordering::SeqCst) > 0
    }
}

impl Dispose for Buffer {
    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct Script {
    children: Vec<String>,
    buffers: usize,
    fail: bool,
    track_children: bool,
    optional_children: bool,
}

#[derive(Default)]
struct ReaderState {
    scripts: HashMap<String, Script>,
    reads: Vec<String>,
    models: Vec<Arc<Model>>,
    buffers: Vec<(String, Arc<Buffer>)>,
    gate: Option<(Receiver<()>, Sender<String>)>,
}

/// Reader whose assets are described in code.
///
/// Each scripted name produces a [`Model`] after loading its children in
/// order. Unscripted names are not found.
#[derive(Clone, Default)]
pub(crate) struct ScriptedReader {
    state: Arc<Mutex<ReaderState>>,
}

impl ScriptedReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn asset(&self, name: &str, children: &[&str]) {
        let mut state = self.state.lock();
        let script = state.scripts.entry(name.to_string()).or_default();
        script.children = children.iter().map(|child| child.to_string()).collect();
    }

    pub(crate) fn fail(&self, name: &str, fail: bool) {
        self.script(name, |script| script.fail = fail);
    }

    pub(crate) fn buffers(&self, name: &str, count: usize) {
        self.script(name, |script| script.buffers = count);
    }

    /// Makes `name` hand its children's objects to the tracker as owned
    /// resources.
    pub(crate) fn track_children(&self, name: &str) {
        self.script(name, |script| script.track_children = true);
    }

    /// Makes `name` ignore children that fail to load.
    pub(crate) fn optional_children(&self, name: &str) {
        self.script(name, |script| script.optional_children = true);
    }

    /// Blocks every read until a unit is sent; each blocked read reports its
    /// name first.
    pub(crate) fn gate(&self) -> (Sender<()>, Receiver<String>) {
        let (release_tx, release_rx) = unbounded();
        let (started_tx, started_rx) = unbounded();
        self.state.lock().gate = Some((release_rx, started_tx));
        (release_tx, started_rx)
    }

    pub(crate) fn ungate(&self) {
        self.state.lock().gate = None;
    }

    pub(crate) fn read_count(&self, name: &str) -> usize {
        self.state.lock().reads.iter().filter(|read| *read == name).count()
    }

    pub(crate) fn models(&self) -> Vec<Arc<Model>> {
        self.state.lock().models.clone()
    }

    /// First model read for `name`.
    pub(crate) fn model(&self, name: &str) -> Option<Arc<Model>> {
        self.state
            .lock()
            .models
            .iter()
            .find(|model| model.name == name)
            .cloned()
    }

    pub(crate) fn buffers_of(&self, name: &str) -> Vec<Arc<Buffer>> {
        self.state
            .lock()
            .buffers
            .iter()
            .filter(|(owner, _)| owner == name)
            .map(|(_, buffer)| Arc::clone(buffer))
            .collect()
    }

    fn script(&self, name: &str, update: impl FnOnce(&mut Script)) {
        let mut state = self.state.lock();
        update(state.scripts.entry(name.to_string()).or_default());
    }
}

impl AssetReader for ScriptedReader {
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Payload> {
        let name = ctx.name().to_string();
        let (script, generation, gate) = {
            let mut state = self.state.lock();
            state.reads.push(name.clone());
            let generation = state.reads.iter().filter(|read| **read == name).count();
            (state.scripts.get(&name).cloned(), generation, state.gate.clone())
        };

        if let Some((release, started)) = gate {
            let _ = started.send(name.clone());
            let _ = release.recv();
        }

        let script = script.ok_or_else(|| ContentError::not_found(&name))?;
        for child in &script.children {
            match ctx.load::<Model>(child) {
                Ok(model) if script.track_children => ctx.track_disposable(model),
                Ok(_) => {}
                Err(_) if script.optional_children => {}
                Err(err) => return Err(err),
            }
        }
        if script.fail {
            return Err(ContentError::read(&name, anyhow::anyhow!("scripted failure")));
        }

        let mut buffers = Vec::new();
        for _ in 0..script.buffers {
            let buffer = Arc::new(Buffer::default());
            ctx.track_disposable(Arc::clone(&buffer));
            buffers.push((name.clone(), buffer));
        }

        let model = Arc::new(Model::new(&name, generation));
        let mut state = self.state.lock();
        state.buffers.extend(buffers);
        state.models.push(Arc::clone(&model));
        Ok(Payload::disposable_arc(model))
    }
}
