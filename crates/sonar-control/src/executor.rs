//! Non-blocking execution of facade commands for event-loop callers
//!
//! One task slot, one worker thread and one polling timer on the caller's
//! loop. A request is accepted only while idle; a second request while a
//! command is in flight is rejected, never queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::command::{Command, OperationKind};
use crate::facade::ControlFacade;

/// Period of the completion poll on the caller's loop
pub const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Longest worker sleep between shutdown checks
const WORKER_WAIT: Duration = Duration::from_millis(100);

/// Tag of an async action
pub type ActionKind = OperationKind;

/// Whether a timer callback wants to run again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Repeat,
    Stop,
}

pub type TimerCallback = Box<dyn FnMut() -> TimerControl + Send>;

/// A cooperative loop that can run periodic callbacks
pub trait EventLoop: Send + Sync {
    fn add_timer(&self, period: Duration, callback: TimerCallback);
}

/// Timers as tasks on a tokio runtime
pub struct TokioEventLoop {
    handle: tokio::runtime::Handle,
}

impl TokioEventLoop {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling task
    pub fn try_current() -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::new(tokio::runtime::Handle::try_current()?))
    }
}

impl EventLoop for TokioEventLoop {
    fn add_timer(&self, period: Duration, mut callback: TimerCallback) {
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if callback() == TimerControl::Stop {
                    break;
                }
            }
        });
    }
}

/// Loop driven by the owner calling [`ManualEventLoop::run_once`]
#[derive(Default)]
pub struct ManualEventLoop {
    timers: Mutex<VecDeque<TimerCallback>>,
}

impl ManualEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every registered timer once, returns how many remain
    pub fn run_once(&self) -> usize {
        let due: Vec<TimerCallback> = self.timers.lock().drain(..).collect();
        let mut kept = Vec::new();
        for mut callback in due {
            if callback() == TimerControl::Repeat {
                kept.push(callback);
            }
        }

        let mut timers = self.timers.lock();
        timers.extend(kept);
        timers.len()
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}

impl EventLoop for ManualEventLoop {
    fn add_timer(&self, _period: Duration, callback: TimerCallback) {
        self.timers.lock().push_back(callback);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutorEvent {
    /// Raised on the requesting thread when a command is accepted
    Started { action: ActionKind },
    /// Raised on the event loop once the worker has finished
    Completed { action: ActionKind, result: bool },
}

#[derive(Default)]
struct Task {
    command: Option<Command>,
    action: Option<ActionKind>,
    completed: bool,
    result: bool,
}

struct Shared {
    busy: AtomicBool,
    shutdown: AtomicBool,
    task: Mutex<Task>,
    wake: Condvar,
    events: broadcast::Sender<ExecutorEvent>,
}

pub struct AsyncExecutor {
    shared: Arc<Shared>,
    event_loop: Arc<dyn EventLoop>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncExecutor {
    pub fn new(facade: Arc<ControlFacade>, event_loop: Arc<dyn EventLoop>) -> std::io::Result<Self> {
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            busy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            task: Mutex::new(Task::default()),
            wake: Condvar::new(),
            events,
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("sonar-executor".into())
            .spawn(move || worker_loop(worker_shared, facade))?;

        Ok(Self {
            shared,
            event_loop,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Hand a command to the worker; `false` if one is already in flight
    pub fn request(&self, command: Command) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            debug!("Executor shut down, request refused");
            return false;
        }
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(action = ?command.kind(), "Executor busy, request refused");
            return false;
        }

        let action = command.kind();
        {
            let mut task = self.shared.task.lock();
            // The worker only exits under this lock once the flag is set
            if self.shared.shutdown.load(Ordering::Acquire) {
                self.shared.busy.store(false, Ordering::Release);
                debug!("Executor shut down, request refused");
                return false;
            }
            task.command = Some(command);
            task.action = Some(action);
            task.completed = false;
        }
        self.shared.wake.notify_one();

        let _ = self.shared.events.send(ExecutorEvent::Started { action });

        let shared = self.shared.clone();
        self.event_loop
            .add_timer(POLL_PERIOD, Box::new(move || poll_completion(&shared)));
        true
    }

    /// Stop accepting requests and wait for the worker to finish
    pub fn shutdown(&self) {
        {
            let _task = self.shared.task.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.wake.notify_all();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Executor worker panicked");
            }
            info!("Async executor stopped");
        }
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, facade: Arc<ControlFacade>) {
    loop {
        let command = {
            let mut task = shared.task.lock();
            loop {
                if let Some(command) = task.command.take() {
                    break command;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.wake.wait_for(&mut task, WORKER_WAIT);
            }
        };

        let action = command.kind();
        let result = match facade.execute(&command) {
            Ok(()) => true,
            Err(e) => {
                warn!(action = ?action, error = %e, "Async command failed");
                false
            }
        };

        let mut task = shared.task.lock();
        task.result = result;
        task.completed = true;
    }
}

fn poll_completion(shared: &Shared) -> TimerControl {
    let Some(mut task) = shared.task.try_lock() else {
        return TimerControl::Repeat;
    };
    if !task.completed {
        return TimerControl::Repeat;
    }

    task.completed = false;
    let result = task.result;
    let action = task.action.take();
    drop(task);

    shared.busy.store(false, Ordering::Release);
    if let Some(action) = action {
        debug!(action = ?action, result = result, "Async command completed");
        let _ = shared.events.send(ExecutorEvent::Completed { action, result });
    }
    TimerControl::Stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{CommandRouter, Rejected};
    use sonar_core::builder::sample_sidescan;
    use sonar_core::{IdAllocator, MemoryStore, ParameterStore, SchemaBuilder};
    use std::time::Instant;

    struct Fixture {
        _router: Arc<CommandRouter>,
        facade: Arc<ControlFacade>,
    }

    fn fixture(delay: Duration) -> Fixture {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        let store: Arc<dyn ParameterStore> = Arc::new(MemoryStore::new(schema));
        let router = CommandRouter::attach(&store).unwrap();
        router.connect(Arc::new(move |command: &Command| {
            std::thread::sleep(delay);
            match command {
                Command::SonarStart { project, .. } if project.is_empty() => {
                    Err(Rejected::new("no project"))
                }
                _ => Ok(()),
            }
        }));
        Fixture {
            _router: router,
            facade: Arc::new(ControlFacade::new(store).unwrap()),
        }
    }

    fn drive_until_idle(event_loop: &ManualEventLoop) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while event_loop.run_once() > 0 {
            assert!(Instant::now() < deadline, "executor never completed");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_busy_gate_rejects_second_request() {
        let fx = fixture(Duration::from_millis(20));
        let event_loop = Arc::new(ManualEventLoop::new());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap();
        let mut events = executor.subscribe();

        assert!(executor.request(Command::SonarPing));
        assert!(!executor.request(Command::SonarStop));
        assert!(executor.is_busy());

        drive_until_idle(&event_loop);
        assert!(!executor.is_busy());

        assert_eq!(
            events.try_recv().unwrap(),
            ExecutorEvent::Started {
                action: OperationKind::SonarPing
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ExecutorEvent::Completed {
                action: OperationKind::SonarPing,
                result: true
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_started_fires_on_request() {
        let fx = fixture(Duration::ZERO);
        let event_loop = Arc::new(ManualEventLoop::new());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap();
        let mut events = executor.subscribe();

        assert!(executor.request(Command::SonarStop));
        // No loop iteration yet
        assert!(matches!(events.try_recv(), Ok(ExecutorEvent::Started { .. })));
        assert!(events.try_recv().is_err());
        assert_eq!(event_loop.pending(), 1);
        drive_until_idle(&event_loop);
    }

    #[test]
    fn test_failed_command_completes_with_false() {
        let fx = fixture(Duration::ZERO);
        let event_loop = Arc::new(ManualEventLoop::new());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap();
        let mut events = executor.subscribe();

        assert!(executor.request(Command::SonarStart {
            project: String::new(),
            track: "1".to_string(),
            track_type: sonar_core::TrackType::Survey,
        }));
        drive_until_idle(&event_loop);

        let _started = events.try_recv().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ExecutorEvent::Completed {
                action: OperationKind::SonarStart,
                result: false
            }
        );
    }

    #[test]
    fn test_accepts_again_after_completion() {
        let fx = fixture(Duration::ZERO);
        let event_loop = Arc::new(ManualEventLoop::new());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap();

        assert!(executor.request(Command::SonarPing));
        drive_until_idle(&event_loop);
        assert!(executor.request(Command::SonarPing));
        drive_until_idle(&event_loop);
    }

    #[test]
    fn test_shutdown_waits_for_running_command() {
        let fx = fixture(Duration::from_millis(100));
        let event_loop = Arc::new(ManualEventLoop::new());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap();

        assert!(executor.request(Command::SonarPing));
        std::thread::sleep(Duration::from_millis(10));
        executor.shutdown();

        // Result was stored before the worker exited
        assert_eq!(event_loop.run_once(), 0);
        assert!(!executor.request(Command::SonarPing));
    }

    #[test]
    fn test_request_racing_shutdown_never_sticks_busy() {
        for _ in 0..20 {
            let fx = fixture(Duration::ZERO);
            let event_loop = Arc::new(ManualEventLoop::new());
            let executor = Arc::new(AsyncExecutor::new(fx.facade.clone(), event_loop.clone()).unwrap());

            let requester = {
                let executor = executor.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        executor.request(Command::SonarPing);
                    }
                })
            };
            std::thread::sleep(Duration::from_micros(200));
            executor.shutdown();
            requester.join().unwrap();

            // Accepted commands ran before the worker left
            drive_until_idle(&event_loop);
            assert!(!executor.is_busy());
            assert!(!executor.request(Command::SonarPing));
        }
    }

    #[tokio::test]
    async fn test_tokio_loop_delivers_completion() {
        let fx = fixture(Duration::from_millis(10));
        let event_loop = Arc::new(TokioEventLoop::try_current().unwrap());
        let executor = AsyncExecutor::new(fx.facade.clone(), event_loop).unwrap();
        let mut events = executor.subscribe();

        assert!(executor.request(Command::SonarPing));
        let started = events.recv().await.unwrap();
        assert!(matches!(started, ExecutorEvent::Started { .. }));

        let completed = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            completed,
            ExecutorEvent::Completed {
                action: OperationKind::SonarPing,
                result: true
            }
        );
    }
}
