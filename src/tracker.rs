use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::config::TrackerConfig;
use crate::error::{ContentError, Result};
use crate::graph;
use crate::handle::{AssetHandle, AssetStatus, AssetSummary};
use crate::payload::{self, AssetKind, Payload, Resource};
use crate::queue::{Joined, LoadQueue, LoadedCallback, PendingLoad};
use crate::reader::{AssetReader, ReadContext};
use crate::source::{SourceLoader, SourceLoaders};

/// Reference-counted cache of named assets.
///
/// Every name maps to at most one loaded object. Loads that happen while
/// another asset is being read are recorded as its dependencies and released
/// with it. Dropping the tracker disposes everything it still holds.
pub struct ContentTracker {
    shared: Arc<Shared>,
}

impl ContentTracker {
    pub fn new(reader: impl AssetReader + 'static) -> Self {
        Self::with_config(reader, TrackerConfig::default())
    }

    pub fn with_config(reader: impl AssetReader + 'static, config: TrackerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(Box::new(reader), config)),
        }
    }

    pub fn root_directory(&self) -> &Path {
        self.shared.root_directory()
    }

    pub fn use_source_assets(&self) -> bool {
        self.shared.use_source_assets.load(Ordering::Acquire)
    }

    /// Enables or disables source file overrides for subsequent loads.
    pub fn set_use_source_assets(&self, enabled: bool) {
        self.shared.use_source_assets.store(enabled, Ordering::Release);
    }

    /// True while any thread is inside a load.
    pub fn is_loading(&self) -> bool {
        self.shared.loading_depth.load(Ordering::Acquire) > 0
    }

    /// Returns the object stored under `name`, reading it on first use.
    pub fn load<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let payload = self.load_kind(name, AssetKind::of::<T>())?;
        payload::typed(name, &payload)
    }

    pub fn load_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        self.shared.load_kind(name, kind)
    }

    /// Reads a fresh copy of `name` that is never shared through the cache.
    ///
    /// The copy is kept only so it can be disposed at teardown.
    pub fn load_from_disk<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let payload = self.load_from_disk_kind(name, AssetKind::of::<T>())?;
        payload::typed(name, &payload)
    }

    pub fn load_from_disk_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        self.shared.load_from_disk_kind(name, kind)
    }

    /// Queues `name` for the background loader.
    ///
    /// If the asset is already loaded the callback runs before this returns.
    /// Requests for a name that is already queued share one read. The
    /// returned handle reports progress through [`AssetHandle::status`].
    pub fn load_async<T, F>(&self, name: &str, on_loaded: F) -> Result<Arc<AssetHandle>>
    where
        T: Any + Send + Sync,
        F: FnOnce(Result<Arc<T>, &ContentError>) + Send + 'static,
    {
        let asset = name.to_string();
        self.load_async_kind(
            name,
            AssetKind::of::<T>(),
            move |outcome: Result<&Payload, &ContentError>| match outcome {
                Ok(payload) => match payload::typed::<T>(&asset, payload) {
                    Ok(value) => on_loaded(Ok(value)),
                    Err(err) => on_loaded(Err(&err)),
                },
                Err(err) => on_loaded(Err(err)),
            },
        )
    }

    pub fn load_async_kind<F>(
        &self,
        name: &str,
        kind: AssetKind,
        on_loaded: F,
    ) -> Result<Arc<AssetHandle>>
    where
        F: FnOnce(Result<&Payload, &ContentError>) + Send + 'static,
    {
        self.shared.load_async(name, kind, Box::new(on_loaded))
    }

    /// Drops one reference; the asset is disposed when none remain.
    pub fn release(&self, name: &str) {
        self.shared.release(name);
    }

    /// Disposes `name` whatever its reference count, optionally releasing the
    /// assets it loaded.
    pub fn unload(&self, name: &str, release_children: bool) {
        self.shared.unload(name, release_children);
    }

    /// Reads `name` again and swaps the new object in.
    ///
    /// Observers of the old handle receive the new object, and the old one is
    /// disposed once the replacement is registered.
    pub fn reload<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let payload = self.reload_kind(name, AssetKind::of::<T>())?;
        payload::typed(name, &payload)
    }

    pub fn reload_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        self.shared.reload_kind(name, kind)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.shared.with_registry(|registry| registry.loaded.contains_key(name))
    }

    pub fn handle(&self, name: &str) -> Option<Arc<AssetHandle>> {
        self.shared.with_registry(|registry| registry.get(name))
    }

    /// Reference count of `name`, or 0 when it is not loaded.
    pub fn ref_count(&self, name: &str) -> usize {
        self.handle(name).map_or(0, |handle| handle.ref_count())
    }

    /// Loaded names in the order they were first loaded.
    pub fn loaded_names(&self) -> Vec<String> {
        self.shared.with_registry(|registry| registry.names.clone())
    }

    /// Name under which `payload` is loaded.
    pub fn search_by_payload(&self, payload: &Payload) -> Option<String> {
        self.shared
            .with_registry(|registry| registry.find_payload(payload.addr()))
    }

    /// Name under which the object behind `asset` is loaded.
    pub fn find_asset<T: Any + Send + Sync>(&self, asset: &Arc<T>) -> Option<String> {
        let addr = payload::arc_addr(asset);
        self.shared.with_registry(|registry| registry.find_payload(addr))
    }

    /// Registers a loader used for `T` when source overrides are enabled.
    pub fn register_source_loader<T, F>(&self, extensions: &[&str], load: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_source_loader_kind(
            AssetKind::of::<T>(),
            extensions,
            move |path: &Path| load(path).map(Payload::new),
        );
    }

    pub fn register_source_loader_kind<F>(&self, kind: AssetKind, extensions: &[&str], load: F)
    where
        F: Fn(&Path) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        let loader = SourceLoader::new(kind, extensions.iter().copied(), Arc::new(load));
        log::debug!(
            "source loader for {} handles {:?}",
            kind.short_name(),
            loader.extensions()
        );
        self.shared.sources.write().register(loader);
    }

    /// Requests waiting for the background loader, including the one being
    /// read.
    pub fn pending_count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn untracked_count(&self) -> usize {
        self.shared.with_registry(|registry| registry.untracked.len())
    }

    /// Snapshots of every tracked asset in load order, then untracked copies.
    pub fn summaries(&self) -> Vec<AssetSummary> {
        let handles = self.shared.with_registry(|registry| {
            let mut handles: Vec<Arc<AssetHandle>> = registry
                .names
                .iter()
                .filter_map(|name| registry.get(name))
                .collect();
            handles.extend(registry.untracked.iter().cloned());
            handles
        });
        handles.iter().map(|handle| handle.summary()).collect()
    }

    /// Stops the background loader and disposes every asset, tracked or not.
    ///
    /// The tracker stays usable afterwards.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

impl Drop for ContentTracker {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl std::fmt::Debug for ContentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTracker")
            .field("root_directory", &self.shared.root_directory)
            .field("loaded", &self.loaded_names())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    loaded: HashMap<String, Arc<AssetHandle>>,
    names: Vec<String>,
    untracked: Vec<Arc<AssetHandle>>,
    /// Handles whose read is in progress, innermost last.
    loading: Vec<Arc<AssetHandle>>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<Arc<AssetHandle>> {
        self.loaded.get(name).cloned()
    }

    fn insert(&mut self, handle: Arc<AssetHandle>) {
        let name = handle.name().to_string();
        if !self.names.contains(&name) {
            self.names.push(name.clone());
        }
        self.loaded.insert(name, handle);
    }

    fn remove(&mut self, name: &str) -> Option<Arc<AssetHandle>> {
        let handle = self.loaded.remove(name)?;
        self.names.retain(|entry| entry != name);
        Some(handle)
    }

    fn contains_payload(&self, addr: usize) -> bool {
        self.loaded.values().any(|handle| {
            handle
                .state()
                .payload
                .as_ref()
                .map_or(false, |payload| payload.addr() == addr)
        })
    }

    fn find_payload(&self, addr: usize) -> Option<String> {
        self.names
            .iter()
            .find(|name| {
                self.loaded.get(name.as_str()).map_or(false, |handle| {
                    handle
                        .state()
                        .payload
                        .as_ref()
                        .map_or(false, |payload| payload.addr() == addr)
                })
            })
            .cloned()
    }
}

/// State shared between the tracker and its loader thread.
///
/// The engine lock is re-entrant so readers can load dependencies from
/// inside `read`. The `RefCell` is never borrowed across a call into reader,
/// observer or dispose code.
pub(crate) struct Shared {
    root_directory: PathBuf,
    worker_name: String,
    use_source_assets: AtomicBool,
    reader: Box<dyn AssetReader>,
    sources: RwLock<SourceLoaders>,
    engine: ReentrantMutex<RefCell<Registry>>,
    loading_depth: AtomicUsize,
    pub(crate) queue: LoadQueue,
}

impl Shared {
    fn new(reader: Box<dyn AssetReader>, config: TrackerConfig) -> Self {
        Self {
            root_directory: config.root_directory,
            worker_name: config.worker_name,
            use_source_assets: AtomicBool::new(config.use_source_assets),
            reader,
            sources: RwLock::new(SourceLoaders::default()),
            engine: ReentrantMutex::new(RefCell::new(Registry::default())),
            loading_depth: AtomicUsize::new(0),
            queue: LoadQueue::default(),
        }
    }

    pub(crate) fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub(crate) fn worker_name(&self) -> &str {
        &self.worker_name
    }

    fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let guard = self.engine.lock();
        let registry = guard.borrow();
        f(&registry)
    }

    pub(crate) fn load_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        let guard = self.engine.lock();
        let registry: &RefCell<Registry> = &guard;

        let existing = registry.borrow().get(name);
        if let Some(existing) = existing {
            return self.acquire_existing(registry, &existing, kind);
        }

        // a queued background request is read here instead of twice
        let pending = self
            .queue
            .find(name)
            .filter(|pending| pending.status() == AssetStatus::Loading);
        if let Some(pending) = pending {
            let queued = pending.kind();
            if queued != kind {
                return Err(ContentError::type_mismatch(name, kind, queued));
            }
            pending.state().ref_count += 1;
            return self
                .read_into(registry, &pending, kind, true)
                .map_err(|err| {
                    let mut state = pending.state();
                    state.ref_count = state.ref_count.saturating_sub(1);
                    err
                });
        }

        let handle = Arc::new(AssetHandle::new(name, kind));
        self.read_into(registry, &handle, kind, true)
            .map_err(|err| {
                handle.state().status = AssetStatus::Disposed;
                err
            })
    }

    fn load_from_disk_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        let guard = self.engine.lock();
        let handle = Arc::new(AssetHandle::new(name, kind));
        self.read_into(&guard, &handle, kind, false).map_err(|err| {
            handle.state().status = AssetStatus::Disposed;
            err
        })
    }

    fn acquire_existing(
        &self,
        registry: &RefCell<Registry>,
        handle: &Arc<AssetHandle>,
        kind: AssetKind,
    ) -> Result<Payload> {
        let payload = {
            let mut state = handle.state();
            let found = state.payload.as_ref().map_or(state.kind, Payload::kind);
            if found != kind {
                return Err(ContentError::type_mismatch(handle.name(), kind, found));
            }
            let payload = state.payload.clone().ok_or_else(|| {
                ContentError::read(handle.name(), anyhow::anyhow!("asset has no object"))
            })?;
            state.ref_count += 1;
            payload
        };

        let parent = registry.borrow().loading.last().cloned();
        if let Some(parent) = parent {
            graph::link(&parent, handle);
        }
        log::debug!("{} already loaded ({} refs)", handle.name(), handle.ref_count());
        Ok(payload)
    }

    /// Reads `handle` with the current top of the loading stack as its
    /// parent, then registers it.
    fn read_into(
        &self,
        registry: &RefCell<Registry>,
        handle: &Arc<AssetHandle>,
        kind: AssetKind,
        tracked: bool,
    ) -> Result<Payload> {
        handle.state().tracked = tracked;
        let parent = if tracked {
            registry.borrow().loading.last().cloned()
        } else {
            None
        };
        if let Some(parent) = &parent {
            graph::link(parent, handle);
        }

        let (resolved, resources) = {
            let _frame = LoadingFrame::push(self, registry, handle);
            self.resolve(handle.name(), kind)
        };

        let payload = match resolved {
            Ok(payload) if payload.kind() == kind => payload,
            Ok(payload) => {
                let found = payload.kind();
                discard(registry, Some(&payload), resources);
                self.roll_back(registry, handle, parent.as_deref());
                return Err(ContentError::type_mismatch(handle.name(), kind, found));
            }
            Err(err) => {
                discard(registry, None, resources);
                self.roll_back(registry, handle, parent.as_deref());
                return Err(err);
            }
        };

        let owned: Vec<Resource> = {
            let registry = registry.borrow();
            resources
                .into_iter()
                .filter(|resource| {
                    resource.addr() != payload.addr() && !registry.contains_payload(resource.addr())
                })
                .collect()
        };

        {
            let mut state = handle.state();
            state.payload = Some(payload.clone());
            state.resources = owned;
        }
        {
            let mut registry = registry.borrow_mut();
            if tracked {
                registry.insert(Arc::clone(handle));
            } else {
                registry.untracked.push(Arc::clone(handle));
            }
        }
        handle.state().status = AssetStatus::Active;
        log::debug!("loaded {} as {}", handle.name(), kind.short_name());
        Ok(payload)
    }

    fn resolve(&self, name: &str, kind: AssetKind) -> (Result<Payload>, Vec<Resource>) {
        if self.use_source_assets.load(Ordering::Acquire) {
            let loader = self.sources.read().get(kind);
            if let Some(loader) = loader {
                if let Some(path) = loader.find(&self.root_directory, name) {
                    return (loader.load(&path), Vec::new());
                }
            }
        }

        let mut ctx = ReadContext::new(self, name, kind);
        let payload = self.reader.read(&mut ctx);
        (payload, ctx.into_resources())
    }

    /// Undoes the edges of a failed read and releases what it loaded.
    fn roll_back(
        &self,
        registry: &RefCell<Registry>,
        handle: &AssetHandle,
        parent: Option<&AssetHandle>,
    ) {
        let children = std::mem::take(&mut handle.state().depends_on);
        for child in &children {
            let live = registry.borrow().get(child);
            if let Some(live) = live {
                if graph::detach_dependent(&live, handle.name()) {
                    self.release_in(registry, child);
                }
            }
        }
        if let Some(parent) = parent {
            graph::detach_dependency(parent, handle.name());
            graph::detach_dependent(handle, parent.name());
        }
        log::debug!("rolled back {}", handle.name());
    }

    pub(crate) fn release(&self, name: &str) {
        let guard = self.engine.lock();
        self.release_in(&guard, name);
    }

    fn release_in(&self, registry: &RefCell<Registry>, name: &str) {
        let handle = registry.borrow().get(name);
        let Some(handle) = handle else {
            return;
        };

        let remaining = {
            let mut state = handle.state();
            state.ref_count = state.ref_count.saturating_sub(1);
            state.ref_count
        };
        if remaining > 0 {
            log::debug!("released {name} ({remaining} refs)");
            return;
        }

        registry.borrow_mut().remove(name);
        self.dispose(registry, &handle, true);
    }

    fn unload(&self, name: &str, release_children: bool) {
        let guard = self.engine.lock();
        let registry: &RefCell<Registry> = &guard;
        let handle = registry.borrow_mut().remove(name);
        if let Some(handle) = handle {
            handle.state().ref_count = 0;
            self.dispose(registry, &handle, release_children);
        }
    }

    fn dispose(&self, registry: &RefCell<Registry>, handle: &AssetHandle, cascade: bool) {
        handle.notify(None);

        let (payload, resources, children, parents) = {
            let mut state = handle.state();
            state.status = AssetStatus::Disposed;
            (
                state.payload.take(),
                std::mem::take(&mut state.resources),
                std::mem::take(&mut state.depends_on),
                std::mem::take(&mut state.dependents),
            )
        };

        for resource in &resources {
            resource.dispose();
        }
        if let Some(payload) = &payload {
            payload.dispose();
        }

        for child in &children {
            let live = registry.borrow().get(child);
            if let Some(live) = live {
                if graph::detach_dependent(&live, handle.name()) && cascade {
                    self.release_in(registry, child);
                }
            }
        }
        for parent in &parents {
            let live = registry.borrow().get(parent);
            if let Some(live) = live {
                graph::detach_dependency(&live, handle.name());
            }
        }
        log::debug!("disposed {}", handle.name());
    }

    fn reload_kind(&self, name: &str, kind: AssetKind) -> Result<Payload> {
        let guard = self.engine.lock();
        let registry: &RefCell<Registry> = &guard;

        let old = registry.borrow().get(name);
        let Some(old) = old else {
            return self.load_kind(name, kind);
        };
        let found = {
            let state = old.state();
            state.payload.as_ref().map_or(state.kind, Payload::kind)
        };
        if found != kind {
            return Err(ContentError::type_mismatch(name, kind, found));
        }

        // detach from the table only, so the name keeps its load order slot
        registry.borrow_mut().loaded.remove(name);
        let nested = !registry.borrow().loading.is_empty();
        let payload = match self.load_kind(name, kind) {
            Ok(payload) => payload,
            Err(err) => {
                registry.borrow_mut().insert(Arc::clone(&old));
                return Err(err);
            }
        };

        let new = registry.borrow().get(name);
        if let Some(new) = &new {
            // background requests still queued on the old handle complete with the new one
            if self.queue.retarget(&old, new) {
                log::debug!("queued request for {name} moved to the reloaded asset");
            }
        }
        let (old_refs, old_dependents) = {
            let mut state = old.state();
            (state.ref_count, std::mem::take(&mut state.dependents))
        };
        if let Some(new) = &new {
            let mut state = new.state();
            // the inner load counted one reference of its own
            state.ref_count = (state.ref_count + old_refs + usize::from(nested)).saturating_sub(1);
            let mut dependents = old_dependents;
            dependents.append(&mut state.dependents);
            state.dependents = dependents;
        }

        let observers = old.take_observers();
        for observer in &observers {
            observer(Some(&payload));
        }
        if let Some(new) = &new {
            new.adopt_observers(observers);
        }

        old.state().ref_count = 0;
        self.dispose(registry, &old, true);
        log::debug!("reloaded {name}");
        Ok(payload)
    }

    pub(crate) fn load_async(
        self: &Arc<Self>,
        name: &str,
        kind: AssetKind,
        on_loaded: LoadedCallback,
    ) -> Result<Arc<AssetHandle>> {
        let on_loaded = match self.queue.try_join(name, kind, on_loaded) {
            Joined::Queued(handle) => return Ok(handle),
            Joined::Mismatch(found) => return Err(ContentError::type_mismatch(name, kind, found)),
            Joined::Absent(on_loaded) => on_loaded,
        };

        // the worker holds the engine for a whole read; a live name is then
        // folded in when the worker reaches the request
        let Some(guard) = self.engine.try_lock() else {
            return self.enqueue(name, kind, on_loaded);
        };
        let registry: &RefCell<Registry> = &guard;
        let live = registry.borrow().get(name);
        if let Some(live) = live {
            let payload = self.acquire_existing(registry, &live, kind)?;
            drop(guard);
            on_loaded(Ok(&payload));
            return Ok(live);
        }
        self.enqueue(name, kind, on_loaded)
    }

    fn enqueue(
        self: &Arc<Self>,
        name: &str,
        kind: AssetKind,
        on_loaded: LoadedCallback,
    ) -> Result<Arc<AssetHandle>> {
        let handle = Arc::new(AssetHandle::new(name, kind));
        let queued = self
            .queue
            .enqueue(self, PendingLoad::new(handle, kind, on_loaded))?;
        log::debug!("queued {name} for background loading");
        Ok(queued)
    }

    /// Loads the request at the head of the queue and removes it.
    ///
    /// Runs on the loader thread; the callbacks of the returned entry are
    /// invoked by the caller once every lock is released.
    pub(crate) fn complete_pending(&self) -> Option<(PendingLoad, Result<Payload>)> {
        let guard = self.engine.lock();
        let registry: &RefCell<Registry> = &guard;
        // read under the engine lock, a reload may have moved the request
        let (handle, kind) = self.queue.head()?;

        let live = registry.borrow().get(handle.name());
        let (entry, outcome) = match live {
            Some(live) if Arc::ptr_eq(&live, &handle) => {
                let outcome = live.payload().ok_or_else(|| {
                    ContentError::read(handle.name(), anyhow::anyhow!("asset has no object"))
                });
                (self.queue.finish(), outcome)
            }
            _ if handle.status() == AssetStatus::Disposed => {
                let err = ContentError::read(
                    handle.name(),
                    anyhow::anyhow!("asset was unloaded before the background load completed"),
                );
                (self.queue.finish(), Err(err))
            }
            Some(live) => {
                // nothing can join the request once it is off the queue
                let entry = self.queue.finish();
                (entry, self.fold_into(&live, &handle, kind))
            }
            None => {
                let outcome = self.read_into(registry, &handle, kind, true).map_err(|err| {
                    handle.state().status = AssetStatus::Disposed;
                    err
                });
                (self.queue.finish(), outcome)
            }
        };
        entry.map(|entry| (entry, outcome))
    }

    /// Moves the references of a queued handle onto the live handle for the
    /// same name.
    fn fold_into(
        &self,
        live: &Arc<AssetHandle>,
        pending: &Arc<AssetHandle>,
        kind: AssetKind,
    ) -> Result<Payload> {
        let refs = {
            let mut state = pending.state();
            state.status = AssetStatus::Disposed;
            std::mem::take(&mut state.ref_count)
        };
        let mut state = live.state();
        let found = state.payload.as_ref().map_or(state.kind, Payload::kind);
        if found != kind {
            return Err(ContentError::type_mismatch(live.name(), kind, found));
        }
        state.ref_count += refs;
        state.payload.clone().ok_or_else(|| {
            ContentError::read(live.name(), anyhow::anyhow!("asset has no object"))
        })
    }

    pub(crate) fn teardown(&self) {
        self.queue.stop();

        let guard = self.engine.lock();
        let registry: &RefCell<Registry> = &guard;
        let handles = {
            let mut registry = registry.borrow_mut();
            let names = std::mem::take(&mut registry.names);
            let mut loaded = std::mem::take(&mut registry.loaded);
            let mut handles: Vec<Arc<AssetHandle>> =
                names.iter().filter_map(|name| loaded.remove(name)).collect();
            handles.extend(loaded.into_values());
            handles.append(&mut registry.untracked);
            handles
        };

        for handle in &handles {
            handle.state().ref_count = 0;
            self.dispose(registry, handle, false);
        }
        if !handles.is_empty() {
            log::info!("content tracker disposed {} assets", handles.len());
        }
    }
}

/// Entry on the loading stack, popped when dropped.
struct LoadingFrame<'a> {
    shared: &'a Shared,
    registry: &'a RefCell<Registry>,
}

impl<'a> LoadingFrame<'a> {
    fn push(
        shared: &'a Shared,
        registry: &'a RefCell<Registry>,
        handle: &Arc<AssetHandle>,
    ) -> Self {
        registry.borrow_mut().loading.push(Arc::clone(handle));
        shared.loading_depth.fetch_add(1, Ordering::AcqRel);
        Self { shared, registry }
    }
}

impl Drop for LoadingFrame<'_> {
    fn drop(&mut self) {
        self.registry.borrow_mut().loading.pop();
        self.shared.loading_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Disposes what a failed read produced, except objects owned by live assets.
fn discard(registry: &RefCell<Registry>, payload: Option<&Payload>, resources: Vec<Resource>) {
    let (payload, resources) = {
        let registry = registry.borrow();
        let payload = payload
            .filter(|payload| !registry.contains_payload(payload.addr()))
            .cloned();
        let resources: Vec<Resource> = resources
            .into_iter()
            .filter(|resource| {
                !registry.contains_payload(resource.addr())
                    && payload
                        .as_ref()
                        .map_or(true, |payload| payload.addr() != resource.addr())
            })
            .collect();
        (payload, resources)
    };
    for resource in &resources {
        resource.dispose();
    }
    if let Some(payload) = payload {
        payload.dispose();
    }
}
