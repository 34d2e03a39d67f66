//! Background loading on a single worker thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{ContentError, Result};
use crate::handle::{AssetHandle, AssetStatus};
use crate::payload::{AssetKind, Payload};
use crate::tracker::Shared;

/// Completion callback of a background load.
pub(crate) type LoadedCallback = Box<dyn FnOnce(Result<&Payload, &ContentError>) + Send>;

/// One queued request and everyone waiting on it.
pub(crate) struct PendingLoad {
    handle: Arc<AssetHandle>,
    kind: AssetKind,
    callbacks: Vec<LoadedCallback>,
}

impl PendingLoad {
    pub(crate) fn new(handle: Arc<AssetHandle>, kind: AssetKind, callback: LoadedCallback) -> Self {
        Self {
            handle,
            kind,
            callbacks: vec![callback],
        }
    }

    fn join(&mut self, callback: LoadedCallback) {
        self.handle.state().ref_count += 1;
        self.callbacks.push(callback);
    }
}

/// Live request for `name`; requests whose handle was disposed stay queued
/// only to report that to their callbacks.
fn queued<'a>(
    pending: &'a mut VecDeque<PendingLoad>,
    name: &str,
) -> Option<&'a mut PendingLoad> {
    pending.iter_mut().find(|entry| {
        entry.handle.name() == name && entry.handle.status() != AssetStatus::Disposed
    })
}

pub(crate) enum Joined {
    /// The callback was attached to a queued request for the same name.
    Queued(Arc<AssetHandle>),
    /// A request for the name is queued under another type.
    Mismatch(AssetKind),
    /// Nothing queued under the name; the callback is handed back.
    Absent(LoadedCallback),
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingLoad>,
    closed: bool,
    running: bool,
}

struct Worker {
    thread: JoinHandle<()>,
    id: ThreadId,
}

/// FIFO of background requests plus the thread draining it.
///
/// Lock order is worker slot, then state. The worker never holds the state
/// lock while loading.
#[derive(Default)]
pub(crate) struct LoadQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    worker: Mutex<Option<Worker>>,
}

impl LoadQueue {
    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Handle of the queued request for `name`, if any.
    pub(crate) fn find(&self, name: &str) -> Option<Arc<AssetHandle>> {
        let mut state = self.state.lock();
        queued(&mut state.pending, name).map(|entry| Arc::clone(&entry.handle))
    }

    pub(crate) fn try_join(&self, name: &str, kind: AssetKind, callback: LoadedCallback) -> Joined {
        let mut state = self.state.lock();
        let Some(entry) = queued(&mut state.pending, name) else {
            return Joined::Absent(callback);
        };
        if entry.kind != kind {
            return Joined::Mismatch(entry.kind);
        }
        entry.join(callback);
        log::debug!("joined queued request for {name}");
        Joined::Queued(Arc::clone(&entry.handle))
    }

    /// Appends a request and makes sure a worker is there to take it.
    ///
    /// A request for a name that is already queued is merged into the queued
    /// one, whose handle is returned.
    pub(crate) fn enqueue(
        &self,
        shared: &Arc<Shared>,
        entry: PendingLoad,
    ) -> Result<Arc<AssetHandle>> {
        let mut slot = self.worker.lock();
        let handle = {
            let mut state = self.state.lock();
            if let Some(queued) = queued(&mut state.pending, entry.handle.name()) {
                if queued.kind != entry.kind {
                    return Err(ContentError::type_mismatch(
                        entry.handle.name(),
                        entry.kind,
                        queued.kind,
                    ));
                }
                for callback in entry.callbacks {
                    queued.join(callback);
                }
                return Ok(Arc::clone(&queued.handle));
            }
            let handle = Arc::clone(&entry.handle);
            state.pending.push_back(entry);
            if state.running {
                self.ready.notify_one();
                return Ok(handle);
            }
            state.closed = false;
            state.running = true;
            handle
        };

        if let Some(finished) = slot.take() {
            if finished.thread.join().is_err() {
                log::error!("content loader thread panicked");
            }
        }

        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(shared.worker_name().to_string())
            .spawn(move || run_worker(worker_shared));
        match spawned {
            Ok(thread) => {
                let id = thread.thread().id();
                *slot = Some(Worker { thread, id });
                Ok(handle)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.pending.pop_back();
                state.running = false;
                Err(ContentError::Worker(err))
            }
        }
    }

    /// Points the queued request holding `old` at `new`.
    pub(crate) fn retarget(&self, old: &Arc<AssetHandle>, new: &Arc<AssetHandle>) -> bool {
        let mut state = self.state.lock();
        match state.pending.iter_mut().find(|entry| Arc::ptr_eq(&entry.handle, old)) {
            Some(entry) => {
                entry.handle = Arc::clone(new);
                true
            }
            None => false,
        }
    }

    /// The request at the head of the queue.
    pub(crate) fn head(&self) -> Option<(Arc<AssetHandle>, AssetKind)> {
        self.state
            .lock()
            .pending
            .front()
            .map(|entry| (Arc::clone(&entry.handle), entry.kind))
    }

    /// Blocks until a request is queued; `false` once closed and drained.
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if !state.pending.is_empty() {
                return true;
            }
            if state.closed {
                state.running = false;
                return false;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Removes the request at the head of the queue.
    pub(crate) fn finish(&self) -> Option<PendingLoad> {
        self.state.lock().pending.pop_front()
    }

    /// Closes the queue and waits for the worker to drain it.
    pub(crate) fn stop(&self) {
        let mut slot = self.worker.lock();
        {
            let mut state = self.state.lock();
            state.closed = true;
            self.ready.notify_all();
        }

        let current = thread::current().id();
        if slot.as_ref().map_or(false, |worker| worker.id == current) {
            log::warn!(
                "content loader stopped from its own thread; \
                 it exits after the current request"
            );
            return;
        }

        let Some(worker) = slot.take() else {
            return;
        };
        drop(slot);
        if worker.thread.join().is_err() {
            log::error!("content loader thread panicked");
        }
    }
}

/// Clears the running flag if the worker unwinds.
struct RunningGuard<'a>(&'a LoadQueue);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.state.lock().running = false;
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    let _guard = RunningGuard(&shared.queue);
    log::info!("content loader started");

    while shared.queue.wait() {
        let Some((entry, outcome)) = shared.complete_pending() else {
            continue;
        };
        let name = entry.handle.name();
        if let Err(err) = &outcome {
            log::warn!("background load of {name} failed: {err}");
        }

        for callback in entry.callbacks {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback(outcome.as_ref())));
            if delivered.is_err() {
                log::error!("load callback for {name} panicked");
            }
        }
    }

    log::info!("content loader stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver, Sender};

    use crate::error::ContentError;
    use crate::handle::AssetStatus;
    use crate::testing::{Model, ScriptedReader};
    use crate::tracker::ContentTracker;

    const WAIT: Duration = Duration::from_secs(5);

    type Outcome = std::result::Result<usize, String>;

    fn load_async(
        tracker: &ContentTracker,
        name: &str,
        results: &crossbeam_channel::Sender<(String, Outcome)>,
    ) {
        let sink = results.clone();
        let asset = name.to_string();
        tracker
            .load_async::<Model, _>(
                name,
                move |outcome: Result<Arc<Model>, &ContentError>| {
                    let outcome = outcome
                        .map(|model| model.generation)
                        .map_err(|err| err.to_string());
                    let _ = sink.send((asset, outcome));
                },
            )
            .unwrap();
    }

    /// Holds the worker inside the callback of a "Sky" request until the
    /// returned sender fires.
    fn park_worker(tracker: &ContentTracker) -> Sender<()> {
        let (resume, parked) = unbounded::<()>();
        let (entered, inside) = unbounded();
        tracker
            .load_async::<Model, _>("Sky", move |_| {
                let _ = entered.send(());
                let _ = parked.recv();
            })
            .unwrap();
        inside.recv_timeout(WAIT).unwrap();
        resume
    }

    fn collect(results: &Receiver<(String, Outcome)>, count: usize) -> Vec<(String, Outcome)> {
        (0..count)
            .map(|_| results.recv_timeout(WAIT).expect("callback not delivered"))
            .collect()
    }

    #[test]
    fn duplicate_requests_share_one_read() {
        let reader = ScriptedReader::new();
        reader.asset("Terrain", &[]);
        let (release, started) = reader.gate();
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        load_async(&tracker, "Terrain", &sender);
        assert_eq!(started.recv_timeout(WAIT).unwrap(), "Terrain");
        load_async(&tracker, "Terrain", &sender);
        assert_eq!(tracker.pending_count(), 1);
        release.send(()).unwrap();

        let delivered = collect(&results, 2);
        assert!(delivered.iter().all(|(_, outcome)| *outcome == Ok(1)));
        assert_eq!(reader.read_count("Terrain"), 1);
        assert_eq!(tracker.ref_count("Terrain"), 2);
    }

    #[test]
    fn loaded_asset_fires_callback_immediately() {
        let reader = ScriptedReader::new();
        reader.asset("Sky", &[]);
        let tracker = ContentTracker::new(reader.clone());
        tracker.load::<Model>("Sky").unwrap();

        let (sender, results) = unbounded();
        load_async(&tracker, "Sky", &sender);
        assert_eq!(results.try_recv().unwrap(), ("Sky".to_string(), Ok(1)));
        assert_eq!(tracker.ref_count("Sky"), 2);
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(reader.read_count("Sky"), 1);
    }

    #[test]
    fn failures_are_delivered_and_the_queue_moves_on() {
        let reader = ScriptedReader::new();
        reader.asset("Terrain", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        let (release, started) = reader.gate();
        let missing = {
            let sink = sender.clone();
            tracker
                .load_async::<Model, _>("Missing", move |outcome| {
                    let outcome = outcome.map(|model| model.generation).map_err(|err| {
                        assert!(err.is_not_found());
                        err.to_string()
                    });
                    let _ = sink.send(("Missing".to_string(), outcome));
                })
                .unwrap()
        };
        assert_eq!(started.recv_timeout(WAIT).unwrap(), "Missing");
        release.send(()).unwrap();
        reader.ungate();
        load_async(&tracker, "Terrain", &sender);

        let delivered = collect(&results, 2);
        assert_eq!(delivered[0].0, "Missing");
        assert!(delivered[0].1.is_err());
        assert_eq!(delivered[1], ("Terrain".to_string(), Ok(1)));
        assert_eq!(missing.status(), AssetStatus::Disposed);
        assert!(!tracker.is_loaded("Missing"));
        assert!(tracker.is_loaded("Terrain"));
    }

    #[test]
    fn returned_handle_becomes_active() {
        let reader = ScriptedReader::new();
        reader.asset("Level", &["Terrain"]);
        reader.asset("Terrain", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        let handle = tracker
            .load_async::<Model, _>("Level", move |outcome| {
                let _ = sender.send(outcome.is_ok());
            })
            .unwrap();
        assert!(results.recv_timeout(WAIT).unwrap());
        assert_eq!(handle.status(), AssetStatus::Active);
        assert_eq!(handle.depends_on(), vec!["Terrain".to_string()]);
        assert!(Arc::ptr_eq(&handle, &tracker.handle("Level").unwrap()));
    }

    #[test]
    fn panicking_callback_does_not_stop_the_worker() {
        let reader = ScriptedReader::new();
        reader.asset("Terrain", &[]);
        reader.asset("Sky", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        tracker
            .load_async::<Model, _>("Terrain", |_| panic!("callback failure"))
            .unwrap();
        load_async(&tracker, "Sky", &sender);

        assert_eq!(collect(&results, 1)[0], ("Sky".to_string(), Ok(1)));
        assert!(tracker.is_loaded("Terrain"));
    }

    #[test]
    fn teardown_drains_the_queue_and_the_worker_restarts() {
        let reader = ScriptedReader::new();
        reader.asset("Terrain", &[]);
        reader.asset("Sky", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        load_async(&tracker, "Terrain", &sender);
        tracker.teardown();
        assert_eq!(collect(&results, 1)[0].0, "Terrain");
        assert_eq!(tracker.pending_count(), 0);
        assert!(!tracker.is_loaded("Terrain"));
        assert!(reader.model("Terrain").unwrap().is_disposed());

        load_async(&tracker, "Sky", &sender);
        assert_eq!(collect(&results, 1)[0], ("Sky".to_string(), Ok(1)));
    }

    #[test]
    fn queued_request_keeps_its_type() {
        let reader = ScriptedReader::new();
        reader.asset("Terrain", &[]);
        let (release, started) = reader.gate();
        let tracker = ContentTracker::new(reader.clone());
        let (sender, _results) = unbounded();

        load_async(&tracker, "Terrain", &sender);
        started.recv_timeout(WAIT).unwrap();
        let err = tracker
            .load_async::<String, _>("Terrain", |_| {})
            .unwrap_err();
        assert!(matches!(err, ContentError::TypeMismatch { .. }), "{err:?}");
        release.send(()).unwrap();
    }

    #[test]
    fn queueing_does_not_wait_for_a_running_read() {
        let reader = ScriptedReader::new();
        reader.asset("Slow", &[]);
        reader.asset("Other", &[]);
        let (release, started) = reader.gate();
        let tracker = ContentTracker::new(reader.clone());
        let (sender, results) = unbounded();

        load_async(&tracker, "Slow", &sender);
        assert_eq!(started.recv_timeout(WAIT).unwrap(), "Slow");

        let (queued_tx, queued) = unbounded();
        let returned = thread::scope(|scope| {
            scope.spawn(|| {
                load_async(&tracker, "Other", &sender);
                let _ = queued_tx.send(());
            });
            let returned = queued.recv_timeout(Duration::from_secs(1));
            reader.ungate();
            release.send(()).unwrap();
            returned
        });
        assert!(returned.is_ok(), "load_async blocked behind the running read");

        let mut delivered = collect(&results, 2);
        delivered.sort();
        assert_eq!(
            delivered,
            vec![("Other".to_string(), Ok(1)), ("Slow".to_string(), Ok(1))]
        );
        assert_eq!(reader.read_count("Other"), 1);
    }

    #[test]
    fn request_for_a_live_asset_queued_behind_a_read_is_folded_in() {
        let reader = ScriptedReader::new();
        reader.asset("Slow", &[]);
        reader.asset("Terrain", &[]);
        let tracker = ContentTracker::new(reader.clone());
        tracker.load::<Model>("Terrain").unwrap();
        let (release, started) = reader.gate();
        let (sender, results) = unbounded();

        load_async(&tracker, "Slow", &sender);
        assert_eq!(started.recv_timeout(WAIT).unwrap(), "Slow");
        thread::scope(|scope| {
            scope.spawn(|| load_async(&tracker, "Terrain", &sender));
        });
        assert_eq!(tracker.pending_count(), 2);
        reader.ungate();
        release.send(()).unwrap();

        let mut delivered = collect(&results, 2);
        delivered.sort();
        assert_eq!(delivered[1], ("Terrain".to_string(), Ok(1)));
        assert_eq!(tracker.ref_count("Terrain"), 2);
        assert_eq!(reader.read_count("Terrain"), 1);
    }

    #[test]
    fn reload_of_a_taken_over_request_completes_with_the_new_asset() {
        let reader = ScriptedReader::new();
        reader.asset("Sky", &[]);
        reader.asset("Terrain", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let resume = park_worker(&tracker);
        let (sender, results) = unbounded();

        load_async(&tracker, "Terrain", &sender);
        let first = tracker.load::<Model>("Terrain").unwrap();
        assert_eq!(tracker.ref_count("Terrain"), 2);

        let second = tracker.reload::<Model>("Terrain").unwrap();
        assert_eq!(second.generation, 2);
        assert!(first.is_disposed());
        assert!(!second.is_disposed());
        let handle = tracker.handle("Terrain").unwrap();
        assert_eq!(handle.status(), AssetStatus::Active);
        assert_eq!(tracker.ref_count("Terrain"), 2);

        resume.send(()).unwrap();
        assert_eq!(collect(&results, 1)[0], ("Terrain".to_string(), Ok(2)));
        assert!(Arc::ptr_eq(&handle, &tracker.handle("Terrain").unwrap()));
        assert_eq!(tracker.ref_count("Terrain"), 2);
        assert_eq!(reader.read_count("Terrain"), 2);
        assert!(!second.is_disposed());
    }

    #[test]
    fn unloaded_request_stays_disposed() {
        let reader = ScriptedReader::new();
        reader.asset("Sky", &[]);
        reader.asset("Terrain", &[]);
        let tracker = ContentTracker::new(reader.clone());
        let resume = park_worker(&tracker);
        let (sender, results) = unbounded();

        load_async(&tracker, "Terrain", &sender);
        tracker.load::<Model>("Terrain").unwrap();
        let taken_over = tracker.handle("Terrain").unwrap();
        tracker.unload("Terrain", true);
        assert_eq!(taken_over.status(), AssetStatus::Disposed);

        let fresh = tracker.load::<Model>("Terrain").unwrap();
        assert_eq!(fresh.generation, 2);
        assert_eq!(taken_over.status(), AssetStatus::Disposed);
        let live = tracker.handle("Terrain").unwrap();
        assert!(!Arc::ptr_eq(&live, &taken_over));
        assert_eq!(live.ref_count(), 1);

        resume.send(()).unwrap();
        let delivered = collect(&results, 1);
        assert_eq!(
            delivered[0],
            ("Terrain".to_string(), Err("failed to read asset Terrain".to_string()))
        );
        assert_eq!(tracker.ref_count("Terrain"), 1);
        assert!(!fresh.is_disposed());
        assert_eq!(tracker.pending_count(), 0);
    }
}
