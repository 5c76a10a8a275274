use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chat_provider::{CancelSignal, RunEvent, RunId, RunProvider, RunRequest};
use conversation::Message;
use tracing::{debug, warn};

use crate::app::{App, GenerationSettings, HostOps};

/// Everything a worker thread reports back to the owning thread.
enum WorkerEvent {
    Run(RunEvent),
    Check {
        check_id: RunId,
        outcome: Result<String, String>,
    },
}

struct ActiveRun {
    model: String,
    cancel: CancelSignal,
    join_handle: Option<JoinHandle<()>>,
}

/// Fans runs out to worker threads and feeds their events back to [`App`].
///
/// Every `start_run` and `start_check` spawns one named worker with its own
/// cancel flag. Workers only ever send events over the channel; the owning
/// thread applies them with [`RuntimeController::pump`], so `App` has a single
/// mutator.
pub struct RuntimeController {
    providers: BTreeMap<String, Arc<dyn RunProvider>>,
    sender: Sender<WorkerEvent>,
    receiver: Receiver<WorkerEvent>,
    next_run_id: RunId,
    active_runs: BTreeMap<RunId, ActiveRun>,
    active_checks: BTreeMap<RunId, ActiveRun>,
    render_requested: bool,
    stop_requested: bool,
}

impl RuntimeController {
    pub fn new(providers: BTreeMap<String, Arc<dyn RunProvider>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            providers,
            sender,
            receiver,
            next_run_id: 1,
            active_runs: BTreeMap::new(),
            active_checks: BTreeMap::new(),
            render_requested: false,
            stop_requested: false,
        }
    }

    pub fn has_active_runs(&self) -> bool {
        !self.active_runs.is_empty()
    }

    pub fn active_run_count(&self) -> usize {
        self.active_runs.len()
    }

    pub fn has_active_checks(&self) -> bool {
        !self.active_checks.is_empty()
    }

    /// No run or connection check is outstanding.
    pub fn is_idle(&self) -> bool {
        self.active_runs.is_empty() && self.active_checks.is_empty()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Returns and clears the pending render request.
    pub fn take_render_request(&mut self) -> bool {
        std::mem::take(&mut self.render_requested)
    }

    /// Applies every event already received. Never blocks.
    pub fn pump(&mut self, app: &mut App) -> usize {
        let events: Vec<WorkerEvent> = self.receiver.try_iter().collect();
        self.apply_events(app, events)
    }

    /// Waits up to `timeout` for the first event, then drains the rest.
    pub fn pump_timeout(&mut self, app: &mut App, timeout: Duration) -> usize {
        let first = match self.receiver.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return 0,
        };
        let mut events = vec![first];
        events.extend(self.receiver.try_iter());
        self.apply_events(app, events)
    }

    /// Pumps until nothing is outstanding or `deadline` passes. Returns true
    /// when idle.
    pub fn run_until_idle(&mut self, app: &mut App, deadline: Duration) -> bool {
        let started = Instant::now();
        while !self.is_idle() {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return false;
            }
            let remaining = deadline - elapsed;
            self.pump_timeout(app, remaining.min(Duration::from_millis(50)));
        }
        true
    }

    /// Signals every active run to stop and joins workers that already exited.
    pub fn shutdown(&mut self) {
        for active in self.active_runs.values().chain(self.active_checks.values()) {
            active.cancel.store(true, Ordering::SeqCst);
        }
        let mut outstanding = std::mem::take(&mut self.active_runs);
        outstanding.append(&mut self.active_checks);
        for (_, mut active) in outstanding {
            if let Some(join_handle) = active.join_handle.take() {
                if join_handle.is_finished() {
                    let _ = join_handle.join();
                }
            }
        }
    }

    fn apply_events(&mut self, app: &mut App, events: Vec<WorkerEvent>) -> usize {
        let applied = events.len();
        for event in events {
            let event = match event {
                WorkerEvent::Run(event) => event,
                WorkerEvent::Check { check_id, outcome } => {
                    if let Some(mut check) = self.active_checks.remove(&check_id) {
                        debug!(
                            check_id,
                            model = %check.model,
                            ok = outcome.is_ok(),
                            "connection check completed"
                        );
                        join_if_finished(&mut check);
                    }
                    app.on_check_finished(check_id, outcome);
                    continue;
                }
            };
            let run_id = event.run_id();
            let terminal = event.is_terminal();

            match event {
                RunEvent::Started { run_id } => app.on_run_started(run_id),
                RunEvent::Chunk { run_id, text } => app.on_run_chunk(run_id, &text),
                RunEvent::Finished { run_id } => app.on_run_finished(run_id, self),
                RunEvent::Failed { run_id, error } => app.on_run_failed(run_id, &error),
                RunEvent::Cancelled { run_id } => app.on_run_cancelled(run_id),
            }

            if terminal {
                self.clear_active_run(run_id);
            }
        }
        if applied > 0 {
            self.render_requested = true;
        }
        applied
    }

    fn clear_active_run(&mut self, run_id: RunId) {
        let Some(mut completed) = self.active_runs.remove(&run_id) else {
            return;
        };
        debug!(run_id, model = %completed.model, "run completed");
        join_if_finished(&mut completed);
    }

    fn spawn_worker(
        &self,
        provider: Arc<dyn RunProvider>,
        request: RunRequest,
        cancel: CancelSignal,
    ) -> Result<JoinHandle<()>, String> {
        let run_id = request.run_id;
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("deskchat-run-{run_id}"))
            .spawn(move || run_worker(provider, request, cancel, sender))
            .map_err(|error| format!("failed to spawn run worker: {error}"))
    }

    fn spawn_check_worker(
        &self,
        provider: Arc<dyn RunProvider>,
        check_id: RunId,
        cancel: CancelSignal,
    ) -> Result<JoinHandle<()>, String> {
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("deskchat-check-{check_id}"))
            .spawn(move || check_worker(provider, check_id, cancel, sender))
            .map_err(|error| format!("failed to spawn check worker: {error}"))
    }
}

fn join_if_finished(active: &mut ActiveRun) {
    if let Some(join_handle) = active.join_handle.take() {
        if join_handle.is_finished() {
            let _ = join_handle.join();
        }
    }
}

fn check_worker(
    provider: Arc<dyn RunProvider>,
    check_id: RunId,
    cancel: CancelSignal,
    sender: Sender<WorkerEvent>,
) {
    let outcome = match catch_unwind(AssertUnwindSafe(|| provider.check_connection(cancel))) {
        Ok(outcome) => outcome,
        Err(_) => Err("provider panicked".to_string()),
    };
    if let Err(error) = &outcome {
        warn!(check_id, %error, "connection check failed");
    }
    let _ = sender.send(WorkerEvent::Check { check_id, outcome });
}

fn run_worker(
    provider: Arc<dyn RunProvider>,
    request: RunRequest,
    cancel: CancelSignal,
    sender: Sender<WorkerEvent>,
) {
    let run_id = request.run_id;
    let terminal_emitted = Arc::new(AtomicBool::new(false));
    let terminal_emitted_for_emit = Arc::clone(&terminal_emitted);

    let mut emit = move |event: RunEvent| {
        if event.is_terminal() {
            terminal_emitted_for_emit.store(true, Ordering::SeqCst);
        }
        // The receiver is gone only after the controller is dropped.
        let _ = sender.send(WorkerEvent::Run(event));
    };

    let run_outcome = catch_unwind(AssertUnwindSafe(|| {
        provider.run(request, Arc::clone(&cancel), &mut emit)
    }));

    let failure = match run_outcome {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(_) => Some("provider panicked".to_string()),
    };

    if let Some(error) = failure {
        warn!(run_id, %error, "run ended abnormally");
        if !terminal_emitted.load(Ordering::SeqCst) {
            emit(RunEvent::Failed { run_id, error });
        }
        return;
    }

    if !terminal_emitted.load(Ordering::SeqCst) {
        emit(RunEvent::Failed {
            run_id,
            error: "provider exited without terminal event".to_string(),
        });
    }
}

impl HostOps for RuntimeController {
    fn start_run(
        &mut self,
        model: &str,
        messages: Vec<Message>,
        settings: GenerationSettings,
    ) -> Result<RunId, String> {
        let provider = self
            .providers
            .get(model)
            .cloned()
            .ok_or_else(|| format!("no provider configured for model '{model}'"))?;

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let request = RunRequest::new(run_id, messages)
            .with_stream(settings.stream)
            .with_temperature(settings.temperature)
            .with_max_tokens(settings.max_tokens);
        let join_handle = self.spawn_worker(provider, request, Arc::clone(&cancel))?;

        self.active_runs.insert(
            run_id,
            ActiveRun {
                model: model.to_string(),
                cancel,
                join_handle: Some(join_handle),
            },
        );
        debug!(run_id, model, "run started");
        Ok(run_id)
    }

    fn start_check(&mut self, model: &str) -> Result<RunId, String> {
        let provider = self
            .providers
            .get(model)
            .cloned()
            .ok_or_else(|| format!("no provider configured for model '{model}'"))?;

        let check_id = self.next_run_id;
        self.next_run_id += 1;

        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let join_handle = self.spawn_check_worker(provider, check_id, Arc::clone(&cancel))?;
        self.active_checks.insert(
            check_id,
            ActiveRun {
                model: model.to_string(),
                cancel,
                join_handle: Some(join_handle),
            },
        );
        debug!(check_id, model, "connection check started");
        Ok(check_id)
    }

    fn cancel_run(&mut self, run_id: RunId) {
        if let Some(active) = self
            .active_runs
            .get(&run_id)
            .or_else(|| self.active_checks.get(&run_id))
        {
            active.cancel.store(true, Ordering::SeqCst);
        }
    }

    fn request_render(&mut self) {
        self.render_requested = true;
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

impl Drop for RuntimeController {
    fn drop(&mut self) {
        for active in self.active_runs.values().chain(self.active_checks.values()) {
            active.cancel.store(true, Ordering::SeqCst);
        }
    }
}
