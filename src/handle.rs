use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::payload::{AssetKind, Payload, Resource};

/// Load status of a tracked asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetStatus {
    Loading,
    Active,
    Disposed,
}

/// Callback invoked when an asset is reloaded (`Some(new payload)`) or
/// unloaded (`None`).
pub type ChangeObserver = Arc<dyn Fn(Option<&Payload>) + Send + Sync>;

/// Bookkeeping record for one loaded asset.
///
/// Handles are shared with callers (`load_async` returns one so the status
/// can be polled); the tracker owns the mutable state behind the lock.
pub struct AssetHandle {
    name: String,
    state: Mutex<HandleState>,
    observers: Mutex<Vec<ChangeObserver>>,
}

#[derive(Debug)]
pub(crate) struct HandleState {
    pub(crate) kind: AssetKind,
    pub(crate) payload: Option<Payload>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) ref_count: usize,
    pub(crate) status: AssetStatus,
    pub(crate) tracked: bool,
    /// Children this asset caused to be loaded, one entry per nested load.
    pub(crate) depends_on: Vec<String>,
    /// Parents that caused this asset to be loaded.
    pub(crate) dependents: Vec<String>,
}

impl AssetHandle {
    pub(crate) fn new(name: &str, kind: AssetKind) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(HandleState {
                kind,
                payload: None,
                resources: Vec::new(),
                ref_count: 1,
                status: AssetStatus::Loading,
                tracked: true,
                depends_on: Vec::new(),
                dependents: Vec::new(),
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type the asset was requested as.
    pub fn kind(&self) -> AssetKind {
        self.state.lock().kind
    }

    pub fn status(&self) -> AssetStatus {
        self.state.lock().status
    }

    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// The loaded object, present while the handle is active.
    pub fn payload(&self) -> Option<Payload> {
        self.state.lock().payload.clone()
    }

    /// False for handles read with `load_from_disk`, which are never
    /// addressable by name.
    pub fn is_tracked(&self) -> bool {
        self.state.lock().tracked
    }

    pub fn depends_on(&self) -> Vec<String> {
        self.state.lock().depends_on.clone()
    }

    pub fn dependents(&self) -> Vec<String> {
        self.state.lock().dependents.clone()
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Registers a callback fired on reload and unload.
    ///
    /// Observers run on the thread performing the change, with the tracker's
    /// load lock held; they may call back into the tracker.
    pub fn on_changed<F>(&self, observer: F)
    where
        F: Fn(Option<&Payload>) + Send + Sync + 'static,
    {
        self.observers.lock().push(Arc::new(observer));
    }

    pub fn summary(&self) -> AssetSummary {
        let state = self.state.lock();
        AssetSummary {
            name: self.name.clone(),
            kind: state.kind.name().to_string(),
            ref_count: state.ref_count,
            status: state.status,
            tracked: state.tracked,
            depends_on: state.depends_on.clone(),
            dependents: state.dependents.clone(),
            resources: state.resources.len(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock()
    }

    pub(crate) fn notify(&self, payload: Option<&Payload>) {
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(payload);
        }
    }

    pub(crate) fn take_observers(&self) -> Vec<ChangeObserver> {
        std::mem::take(&mut *self.observers.lock())
    }

    pub(crate) fn adopt_observers(&self, observers: Vec<ChangeObserver>) {
        self.observers.lock().extend(observers);
    }
}

impl std::fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AssetHandle")
            .field("name", &self.name)
            .field("kind", &state.kind)
            .field("status", &state.status)
            .field("ref_count", &state.ref_count)
            .finish()
    }
}

/// Serializable snapshot of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub name: String,
    pub kind: String,
    pub ref_count: usize,
    pub status: AssetStatus,
    pub tracked: bool,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
    pub resources: usize,
}
