//! Liveness monitoring between a sonar server and its client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use sonar_core::{keys, ListenerId, ParamList, ParameterStore, StoreListener};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Silence after which a timeout fires
    pub timeout: Duration,
    /// How often the watchdog thread wakes up
    pub poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchdogEvent {
    Timeout { elapsed: Duration },
}

struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn touch(&self) {
        *self.last.lock() = Instant::now();
    }
}

impl StoreListener for Activity {
    fn on_changed(&self) {
        self.touch();
    }
}

/// Fires a timeout when the store sees no accepted `set` for too long
///
/// The watchdog only reports; what to do about a silent client is up to
/// the application.
pub struct ServerWatchdog {
    store: Arc<dyn ParameterStore>,
    activity: Arc<Activity>,
    listener: ListenerId,
    events: broadcast::Sender<WatchdogEvent>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerWatchdog {
    pub fn start(store: Arc<dyn ParameterStore>, config: WatchdogConfig) -> std::io::Result<Self> {
        let activity = Arc::new(Activity {
            last: Mutex::new(Instant::now()),
        });
        let listener = store.connect(activity.clone());
        let (events, _) = broadcast::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let activity = activity.clone();
            let events = events.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("sonar-watchdog".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Acquire) {
                        std::thread::sleep(config.poll_interval);

                        let mut last = activity.last.lock();
                        let elapsed = last.elapsed();
                        if elapsed > config.timeout {
                            *last = Instant::now();
                            drop(last);
                            warn!(elapsed_ms = elapsed.as_millis() as u64, "No client activity");
                            let _ = events.send(WatchdogEvent::Timeout { elapsed });
                        }
                    }
                })
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                store.disconnect(listener);
                return Err(e);
            }
        };

        info!(timeout_ms = config.timeout.as_millis() as u64, "Server watchdog started");
        Ok(Self {
            store,
            activity,
            listener,
            events,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    /// Count external activity as a sign of life
    pub fn touch(&self) {
        self.activity.touch();
    }
}

impl Drop for ServerWatchdog {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.store.disconnect(self.listener);
        debug!("Server watchdog stopped");
    }
}

struct Stop {
    flag: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Writes the alive flag at half the device's liveness timeout
pub struct ClientWatchdog {
    stop: Arc<Stop>,
    thread: Option<JoinHandle<()>>,
}

impl ClientWatchdog {
    pub fn start(store: Arc<dyn ParameterStore>) -> Result<Self, ControlError> {
        let values = store.get(&[keys::ALIVE_TIMEOUT])?;
        let timeout = values
            .get_f64(keys::ALIVE_TIMEOUT)
            .filter(|t| t.is_finite() && *t > 0.0)
            .ok_or(ControlError::Unsupported("alive timeout"))?;
        let period = Duration::from_secs_f64(timeout / 2.0);

        let stop = Arc::new(Stop {
            flag: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        });

        let thread = {
            let stop = stop.clone();
            let alive = ParamList::new().with(keys::ALIVE, true);
            std::thread::Builder::new()
                .name("sonar-alive".into())
                .spawn(move || loop {
                    if let Err(e) = store.set(&alive) {
                        debug!(error = %e, "Alive write refused");
                    }

                    let mut guard = stop.lock.lock();
                    if stop.flag.load(Ordering::Acquire) {
                        break;
                    }
                    stop.wake.wait_for(&mut guard, period);
                    if stop.flag.load(Ordering::Acquire) {
                        break;
                    }
                })
                .map_err(|_| ControlError::Unsupported("alive thread"))?
        };

        info!(period_ms = period.as_millis() as u64, "Client watchdog started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for ClientWatchdog {
    fn drop(&mut self) {
        {
            let _guard = self.stop.lock.lock();
            self.stop.flag.store(true, Ordering::Release);
            self.stop.wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
