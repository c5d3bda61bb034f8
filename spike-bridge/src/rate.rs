//! Poisson live-rate interface.
//!
//! Instead of answering per-spike interval requests, this variant forwards
//! whole rate vectors from a bus topic to a rate-control connection bound at
//! `control_base_port + id`. Same lifecycle and worker pattern as the
//! spike-timing conductor.

use std::sync::Arc;

use parking_lot::Mutex;
use spike_bridge_core::BusValue;
use tracing::{debug, info, warn};

use crate::bench::{TimingRecorder, TimingReport};
use crate::bus::{MessageBus, Subscription};
use crate::config::RateInterfaceConfig;
use crate::error::{Result, TransportError};
use crate::identity::{InterfaceId, InterfaceRegistry};
use crate::lifecycle::{ConductorState, Lifecycle, LifecycleEvent};
use crate::timer::{period_of, Periodic};
use crate::worker::RetryLog;

/// Live control over the rates of a Poisson population.
pub trait RateControl: Send {
    /// Set `(neuron, rate_hz)` pairs on `population`.
    fn set_rates(&mut self, population: &str, rates: &[(u32, f64)]) -> Result<(), TransportError>;
}

/// Opens rate-control connections on a local port.
pub trait RateControlConnector: Send + Sync {
    fn connect(&self, local_port: u16) -> Result<Box<dyn RateControl>, TransportError>;
}

/// Turn a bus message into one rate per neuron. Scalars are broadcast;
/// arrays must cover every neuron (extra entries are ignored).
pub fn rates_for(value: &BusValue, n_neurons: usize) -> Option<Vec<(u32, f64)>> {
    let rates: Vec<f64> = match value {
        BusValue::Scalar(r) => vec![*r; n_neurons],
        BusValue::Array(v) if v.len() >= n_neurons => v[..n_neurons].to_vec(),
        BusValue::Array(v) => {
            warn!(got = v.len(), n_neurons, "rate vector too short, dropped");
            return None;
        }
    };
    if let Some(bad) = rates.iter().find(|r| !r.is_finite() || **r < 0.0) {
        warn!(rate = bad, "rate must be finite and non-negative, vector dropped");
        return None;
    }
    Some(rates.into_iter().enumerate().map(|(i, r)| (i as u32, r)).collect())
}

struct RatePump {
    bus: Arc<dyn MessageBus>,
    connector: Arc<dyn RateControlConnector>,
    topic: String,
    population: String,
    n_neurons: usize,
    port: u16,
    subscription: Option<Subscription>,
    control: Option<Box<dyn RateControl>>,
    pending: Option<Vec<(u32, f64)>>,
    bus_retry: RetryLog,
    control_retry: RetryLog,
    timings: Option<Arc<TimingRecorder>>,
}

impl RatePump {
    fn tick(&mut self) {
        let started = std::time::Instant::now();
        self.pull();
        self.push();
        if let Some(t) = &self.timings {
            t.record(started.elapsed());
        }
    }

    fn pull(&mut self) {
        if self.subscription.is_none() {
            match self.bus.subscribe(&self.topic) {
                Ok(sub) => {
                    self.bus_retry.succeeded("subscribe");
                    self.subscription = Some(sub);
                }
                Err(e) => return self.bus_retry.failed("subscribe", &e),
            }
        }
        let Some(sub) = &self.subscription else {
            return;
        };
        match sub.drain_latest() {
            Ok(Some(value)) => {
                if let Some(rates) = rates_for(&value, self.n_neurons) {
                    self.pending = Some(rates);
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.bus_retry.failed("subscription", &e);
                self.subscription = None;
            }
        }
    }

    fn push(&mut self) {
        if self.pending.is_none() {
            return;
        }
        if self.control.is_none() {
            match self.connector.connect(self.port) {
                Ok(c) => {
                    self.control_retry.succeeded("rate control connect");
                    debug!(port = self.port, "rate control connected");
                    self.control = Some(c);
                }
                Err(e) => return self.control_retry.failed("rate control connect", &e),
            }
        }
        let (Some(control), Some(rates)) = (self.control.as_mut(), self.pending.as_ref()) else {
            return;
        };
        match control.set_rates(&self.population, rates) {
            Ok(()) => {
                self.control_retry.succeeded("set rates");
                self.pending = None;
            }
            Err(e) => {
                // Keep the vector and reconnect next tick.
                self.control_retry.failed("set rates", &e);
                self.control = None;
            }
        }
    }
}

pub struct RateConductor {
    id: InterfaceId,
    config: RateInterfaceConfig,
    control_port: u16,
    /// Released when the run stops; `Stopped` is final.
    bus: Option<Arc<dyn MessageBus>>,
    connector: Arc<dyn RateControlConnector>,
    lifecycle: Lifecycle,
    worker: Option<Periodic>,
    timings: Option<Arc<TimingRecorder>>,
    report: Option<TimingReport>,
}

impl RateConductor {
    pub fn new(
        config: RateInterfaceConfig,
        bus: Arc<dyn MessageBus>,
        connector: Arc<dyn RateControlConnector>,
    ) -> Result<Self> {
        Self::with_registry(config, bus, connector, InterfaceRegistry::process())
    }

    pub fn with_registry(
        config: RateInterfaceConfig,
        bus: Arc<dyn MessageBus>,
        connector: Arc<dyn RateControlConnector>,
        registry: &InterfaceRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let timings = if config.benchmark {
            Some(Arc::new(TimingRecorder::new(format!("rate interface {}", config.population))?))
        } else {
            None
        };
        let id = registry.allocate();
        let control_port = id.port(config.control_base_port)?;
        info!(
            interface = %id,
            population = %config.population,
            control_port,
            "rate interface constructed"
        );
        Ok(Self {
            id,
            config,
            control_port,
            bus: Some(bus),
            connector,
            lifecycle: Lifecycle::new(),
            worker: None,
            timings,
            report: None,
        })
    }

    pub fn arm(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::Arm)
    }

    pub fn on_run_started(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::RunStarted)
    }

    pub fn on_run_stopped(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::RunStopped)
    }

    pub fn handle(&mut self, event: LifecycleEvent) -> Result<ConductorState> {
        self.lifecycle.peek(event)?;
        match event {
            LifecycleEvent::Arm => info!(interface = %self.id, "rate interface armed"),
            LifecycleEvent::RunStarted => self.start_run()?,
            LifecycleEvent::RunStopped => self.stop_run(),
        }
        self.lifecycle.apply(event)
    }

    fn start_run(&mut self) -> Result<()> {
        if let Some(t) = &self.timings {
            t.start();
        }
        let bus = self
            .bus
            .clone()
            .ok_or_else(|| TransportError::Unreachable("bus released".into()))?;
        let mut pump = RatePump {
            bus,
            connector: self.connector.clone(),
            topic: self.config.topic_rates.clone(),
            population: self.config.population.clone(),
            n_neurons: self.config.n_neurons,
            port: self.control_port,
            subscription: None,
            control: None,
            pending: None,
            bus_retry: RetryLog::default(),
            control_retry: RetryLog::default(),
            timings: self.timings.clone(),
        };
        self.worker = Some(Periodic::spawn(
            format!("spike-bridge-rate-{}", self.id),
            period_of(self.config.clock_rate_hz),
            move |_| pump.tick(),
        )?);
        info!(interface = %self.id, "rate interface started");
        Ok(())
    }

    fn stop_run(&mut self) {
        if let Some(mut w) = self.worker.take() {
            w.stop();
            if let Some(t) = &self.timings {
                let report = t.report();
                info!(interface = %self.id, "benchmark {}", report);
                self.report = Some(report);
            }
        }
        self.bus = None;
        info!(interface = %self.id, "rate interface stopped");
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn state(&self) -> ConductorState {
        self.lifecycle.state()
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn node_name(&self) -> String {
        self.id.node_name()
    }

    pub fn benchmark_report(&self) -> Option<&TimingReport> {
        self.report.as_ref()
    }
}

impl Drop for RateConductor {
    fn drop(&mut self) {
        if self.state() == ConductorState::Running {
            self.stop_run();
        }
    }
}

/// `(population, rates)` batches seen by a [`MemoryRateControl`].
pub type RateLog = Arc<Mutex<Vec<(String, Vec<(u32, f64)>)>>>;

/// In-process rate control that logs every batch it receives.
pub struct MemoryRateControl {
    log: RateLog,
}

impl RateControl for MemoryRateControl {
    fn set_rates(&mut self, population: &str, rates: &[(u32, f64)]) -> Result<(), TransportError> {
        self.log.lock().push((population.to_string(), rates.to_vec()));
        Ok(())
    }
}

/// Connector for [`MemoryRateControl`]; can refuse connections to mimic an
/// absent substrate.
#[derive(Default)]
pub struct MemoryRateConnector {
    log: RateLog,
    ports: Mutex<Vec<u16>>,
    refuse: Mutex<bool>,
}

impl MemoryRateConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_refusing(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn log(&self) -> RateLog {
        self.log.clone()
    }

    /// Local ports connections were opened on.
    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().clone()
    }
}

impl RateControlConnector for MemoryRateConnector {
    fn connect(&self, local_port: u16) -> Result<Box<dyn RateControl>, TransportError> {
        if *self.refuse.lock() {
            return Err(TransportError::Unreachable(format!(
                "rate control on port {local_port} refused"
            )));
        }
        self.ports.lock().push(local_port);
        Ok(Box::new(MemoryRateControl {
            log: self.log.clone(),
        }))
    }
}
