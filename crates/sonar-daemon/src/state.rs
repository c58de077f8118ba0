//! Application state management

use anyhow::{Context, Result};
use serde::Serialize;
use sonar_control::{
    AsyncExecutor, ControlFacade, DataEvent, ExecutorEvent, HandlerId, ServerWatchdog,
    TokioEventLoop, WatchdogEvent,
};
use sonar_core::DataType;
use sonar_proxy::ProxyForwarder;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::config::Config;
use crate::sim::SimulatedSonar;

/// Metadata of one downstream sample, without the payload
#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub device: String,
    /// Source channel index, 0 for sensor ports
    pub channel: u32,
    pub time: i64,
    pub data_type: DataType,
    pub rate: f64,
    pub points: usize,
    /// Sensor sentence, when the payload is text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl From<&DataEvent> for SampleSummary {
    fn from(event: &DataEvent) -> Self {
        let sample = event.sample();
        let channel = match event {
            DataEvent::Acoustic(a) => a.channel,
            DataEvent::Sensor(_) => 0,
        };
        let text = match sample.data_type {
            DataType::String => Some(String::from_utf8_lossy(&sample.data).into_owned()),
            _ => None,
        };
        Self {
            device: event.device().to_string(),
            channel,
            time: sample.time,
            data_type: sample.data_type,
            rate: sample.rate,
            points: sample.points(),
            text,
        }
    }
}

/// Everything pushed to WebSocket clients
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Sample(SampleSummary),
    Executor(ExecutorEvent),
    Watchdog(WatchdogEvent),
}

/// Shared application state
pub struct AppState {
    /// Runs long facade commands for the REST API
    pub executor: AsyncExecutor,
    /// Client facade over the proxy's downstream store
    pub client: Arc<ControlFacade>,
    /// Liveness of downstream clients
    pub watchdog: ServerWatchdog,
    /// Re-exported device
    pub proxy: ProxyForwarder,
    /// Facade over the simulated device
    pub upstream: Arc<ControlFacade>,
    pub device: SimulatedSonar,
    /// Configuration
    pub config: Config,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<DaemonEvent>,
    sample_handler: HandlerId,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let device = SimulatedSonar::start(&config.device)?;
        let upstream = Arc::new(ControlFacade::new(device.store())?);

        let proxy = ProxyForwarder::new(upstream.clone(), config.proxy.to_proxy_config())?;
        let client = Arc::new(ControlFacade::new(proxy.downstream())?);

        let watchdog = ServerWatchdog::start(
            proxy.downstream(),
            config.watchdog.to_watchdog_config(),
        )?;

        let event_loop = TokioEventLoop::try_current().context("no tokio runtime")?;
        let executor = AsyncExecutor::new(client.clone(), Arc::new(event_loop))?;

        let (events, _) = broadcast::channel(256);

        let sample_events = events.clone();
        let sample_handler = client.connect_data(Arc::new(move |event: &DataEvent| {
            let _ = sample_events.send(DaemonEvent::Sample(SampleSummary::from(event)));
        }));

        info!(
            mode = ?config.proxy.mode,
            sources = client.sources().len(),
            "Sonar stack ready"
        );

        let state = Arc::new(Self {
            executor,
            client,
            watchdog,
            proxy,
            upstream,
            device,
            config,
            events,
            sample_handler,
        });

        // Forward executor events
        let events = state.events.clone();
        let mut rx = state.executor.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(DaemonEvent::Executor(event));
                    }
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Executor events lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        // Forward watchdog timeouts, optionally stopping the track
        let weak: Weak<Self> = Arc::downgrade(&state);
        let mut rx = state.watchdog.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(state) = weak.upgrade() else {
                            break;
                        };
                        state.on_watchdog(&event).await;
                        let _ = state.events.send(DaemonEvent::Watchdog(event));
                    }
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "Watchdog events lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(state)
    }

    async fn on_watchdog(&self, event: &WatchdogEvent) {
        let WatchdogEvent::Timeout { elapsed } = event;
        warn!(elapsed_ms = elapsed.as_millis() as u64, "No client activity");

        if !self.config.watchdog.stop_on_timeout || !self.device.is_running() {
            return;
        }
        let upstream = self.upstream.clone();
        let stopped = tokio::task::spawn_blocking(move || match upstream.sonar() {
            Some(sonar) => sonar.stop().map_err(|e| e.to_string()),
            None => Err("device has no sonar control".to_string()),
        })
        .await;
        match stopped {
            Ok(Ok(())) => info!("Track stopped after client timeout"),
            Ok(Err(e)) => warn!(error = %e, "Failed to stop track after client timeout"),
            Err(e) => warn!(error = %e, "Stop task failed"),
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.client.disconnect_data(self.sample_handler);
    }
}
