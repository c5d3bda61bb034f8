//! Interface conductor: binds a source and/or sink engine to one population,
//! owns the bus worker and drives the lifecycle.
//!
//! Nothing touches the bus before the substrate reports the run start. At
//! that point the engines are reset, run-start callbacks fire once, and the
//! worker threads spawn. They are joined on run stop or drop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use spike_bridge_core::{BusValue, SinkPolicy, SourcePolicy};
use tracing::info;

use crate::bench::{TimingRecorder, TimingReport};
use crate::bus::MessageBus;
use crate::config::InterfaceConfig;
use crate::error::{ConfigError, Result, TransportError};
use crate::identity::{InterfaceId, InterfaceRegistry};
use crate::lifecycle::{ConductorState, Lifecycle, LifecycleEvent};
use crate::sink_engine::SinkEngine;
use crate::slot::Slot;
use crate::source_engine::SourceEngine;
use crate::timer::{period_of, Periodic};
use crate::worker::BusPump;

/// Duration of one base clock tick of the sink engine.
pub const BASE_TICK: Duration = Duration::from_millis(1);

type RunStartCallback = Box<dyn FnOnce(InterfaceId) + Send>;

/// Ports of one interface, each `base + id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMap {
    pub live_output: u16,
    pub injector: u16,
    pub board: u16,
}

/// What the engines recorded during the last run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recording {
    /// `(neuron, interval_ms)` answers of the source engine.
    pub intervals: Vec<(u32, f64)>,
    /// `(time_ms, value)` outputs of the sink engine.
    pub outputs: Vec<(u64, BusValue)>,
}

pub struct ConductorBuilder {
    config: InterfaceConfig,
    source: Option<Box<dyn SourcePolicy>>,
    sink: Option<Box<dyn SinkPolicy>>,
    internal_sink_clock: bool,
}

impl ConductorBuilder {
    pub fn new(config: InterfaceConfig) -> Self {
        Self {
            config,
            source: None,
            sink: None,
            internal_sink_clock: true,
        }
    }

    /// Use `policy` for the encode path instead of `config.source`.
    pub fn source_policy(mut self, policy: Box<dyn SourcePolicy>) -> Self {
        self.source = Some(policy);
        self
    }

    /// Use `policy` for the decode path instead of `config.sink`.
    pub fn sink_policy(mut self, policy: Box<dyn SinkPolicy>) -> Self {
        self.sink = Some(policy);
        self
    }

    /// Leave sink ticks to the caller (typically a stepped substrate) instead
    /// of the conductor's own wall-clock timer.
    pub fn external_sink_clock(mut self) -> Self {
        self.internal_sink_clock = false;
        self
    }

    /// Validate and build with the process-wide registry.
    pub fn build(self, bus: Arc<dyn MessageBus>) -> Result<Conductor> {
        self.build_with_registry(bus, InterfaceRegistry::process())
    }

    pub fn build_with_registry(
        self,
        bus: Arc<dyn MessageBus>,
        registry: &InterfaceRegistry,
    ) -> Result<Conductor> {
        let ConductorBuilder {
            config,
            source,
            sink,
            internal_sink_clock,
        } = self;

        config.validate()?;
        let source = source.or_else(|| config.source.as_ref().map(|k| k.build()));
        let sink = sink.or_else(|| config.sink.as_ref().map(|k| k.build()));
        if source.is_none() && sink.is_none() {
            return Err(ConfigError::MissingPolicy.into());
        }
        config.validate_topics(source.is_some(), sink.is_some())?;

        let timings = if config.benchmark {
            Some(Arc::new(TimingRecorder::new(format!("interface {}", config.population))?))
        } else {
            None
        };

        let id = registry.allocate();
        let ports = PortMap {
            live_output: id.port(config.ports.live_output)?,
            injector: id.port(config.ports.injector)?,
            board: id.port(config.ports.board)?,
        };

        let n = config.n_neurons;
        let source = source.map(|policy| {
            let engine = SourceEngine::new(n, policy, Arc::new(Slot::new()));
            Arc::new(if config.record { engine.with_recording() } else { engine })
        });
        let sink = sink.map(|policy| {
            let engine = SinkEngine::new(n, policy, Arc::new(Slot::new()));
            Arc::new(if config.record { engine.with_recording() } else { engine })
        });

        info!(
            interface = %id,
            population = %config.population,
            n_neurons = n,
            source = source.as_ref().map(|s| s.policy_name()),
            sink = sink.as_ref().map(|s| s.policy_name()),
            "interface constructed"
        );

        Ok(Conductor {
            id,
            config,
            ports,
            bus: Some(bus),
            source,
            sink,
            lifecycle: Lifecycle::new(),
            callbacks: Vec::new(),
            internal_sink_clock,
            worker: None,
            sink_clock: None,
            timings,
            report: None,
        })
    }
}

pub struct Conductor {
    id: InterfaceId,
    config: InterfaceConfig,
    ports: PortMap,
    /// Released when the run stops; `Stopped` is final.
    bus: Option<Arc<dyn MessageBus>>,
    source: Option<Arc<SourceEngine>>,
    sink: Option<Arc<SinkEngine>>,
    lifecycle: Lifecycle,
    callbacks: Vec<RunStartCallback>,
    internal_sink_clock: bool,
    worker: Option<Periodic>,
    sink_clock: Option<Periodic>,
    timings: Option<Arc<TimingRecorder>>,
    report: Option<TimingReport>,
}

impl Conductor {
    pub fn builder(config: InterfaceConfig) -> ConductorBuilder {
        ConductorBuilder::new(config)
    }

    /// Wire the engines; the worker stays idle until the run starts.
    pub fn arm(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::Arm)
    }

    /// Substrate signal: the run is beginning.
    pub fn on_run_started(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::RunStarted)
    }

    /// Substrate signal: the run ended.
    pub fn on_run_stopped(&mut self) -> Result<ConductorState> {
        self.handle(LifecycleEvent::RunStopped)
    }

    pub fn handle(&mut self, event: LifecycleEvent) -> Result<ConductorState> {
        self.lifecycle.peek(event)?;
        match event {
            LifecycleEvent::Arm => {
                info!(
                    interface = %self.id,
                    population = %self.config.population,
                    "interface armed"
                );
            }
            LifecycleEvent::RunStarted => self.start_run()?,
            LifecycleEvent::RunStopped => self.stop_run(),
        }
        self.lifecycle.apply(event)
    }

    /// Run `callback` once when the run starts.
    pub fn add_run_start_callback<F>(&mut self, callback: F)
    where
        F: FnOnce(InterfaceId) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    fn start_run(&mut self) -> Result<()> {
        if let Some(source) = &self.source {
            source.inbound().clear();
            source.reset();
        }
        if let Some(sink) = &self.sink {
            sink.reset();
        }
        if let Some(t) = &self.timings {
            t.start();
        }

        let bus = self
            .bus
            .clone()
            .ok_or_else(|| TransportError::Unreachable("bus released".into()))?;
        let mut pump = BusPump::new(bus);
        if let Some(source) = &self.source {
            pump = pump.inbound(self.config.topic_in.clone(), source.inbound().clone());
        }
        if let Some(sink) = &self.sink {
            pump = pump.outbound(
                self.config.topic_out.clone(),
                sink.outbound().clone(),
                self.config.publish_every(),
            );
        }
        if let Some(t) = &self.timings {
            pump = pump.timed(t.clone());
        }

        let worker = Periodic::spawn(
            format!("spike-bridge-bus-{}", self.id),
            period_of(self.config.clock_rate_hz),
            move |n| pump.tick(n),
        )?;

        let sink_clock = match &self.sink {
            Some(sink) if self.internal_sink_clock => {
                let sink = sink.clone();
                let period = BASE_TICK * sink.calling_rate();
                let origin = Instant::now();
                Some(Periodic::spawn(
                    format!("spike-bridge-sink-{}", self.id),
                    period,
                    move |_| {
                        let sim_time =
                            u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX);
                        sink.on_tick(sim_time);
                    },
                )?)
            }
            _ => None,
        };

        self.worker = Some(worker);
        self.sink_clock = sink_clock;

        for callback in self.callbacks.drain(..) {
            callback(self.id);
        }
        info!(interface = %self.id, "interface started");
        Ok(())
    }

    fn stop_run(&mut self) {
        let was_running = self.worker.is_some();
        if let Some(mut w) = self.worker.take() {
            w.stop();
        }
        if let Some(mut c) = self.sink_clock.take() {
            c.stop();
        }
        self.bus = None;
        if was_running {
            if let Some(t) = &self.timings {
                let report = t.report();
                info!(interface = %self.id, "benchmark {}", report);
                self.report = Some(report);
            }
        }
        info!(interface = %self.id, "interface stopped");
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn state(&self) -> ConductorState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    pub fn ports(&self) -> PortMap {
        self.ports
    }

    /// Name of this interface's node on the bus.
    pub fn node_name(&self) -> String {
        self.id.node_name()
    }

    pub fn source(&self) -> Option<&Arc<SourceEngine>> {
        self.source.as_ref()
    }

    pub fn sink(&self) -> Option<&Arc<SinkEngine>> {
        self.sink.as_ref()
    }

    /// Timing summary of the last finished run, when benchmarking is on.
    pub fn benchmark_report(&self) -> Option<&TimingReport> {
        self.report.as_ref()
    }

    pub fn recording(&self) -> Recording {
        Recording {
            intervals: self
                .source
                .as_ref()
                .map(|s| s.recorded_intervals())
                .unwrap_or_default(),
            outputs: self
                .sink
                .as_ref()
                .map(|s| s.recorded_outputs())
                .unwrap_or_default(),
        }
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        if self.state() == ConductorState::Running {
            self.stop_run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::error::BridgeError;
    use spike_bridge_core::{SinkKind, SourceKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn bidirectional() -> InterfaceConfig {
        InterfaceConfig {
            n_neurons: 2,
            source: Some(SourceKind::ConstantRate),
            sink: Some(SinkKind::Smoothing {
                decay: 0.95,
                increment: 1.0,
                calling_rate: 10,
            }),
            ..Default::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn construction_validates_before_allocating() {
        let reg = InterfaceRegistry::new();
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());

        let err = Conductor::builder(InterfaceConfig::default())
            .build_with_registry(bus.clone(), &reg)
            .err();
        assert!(matches!(err, Some(BridgeError::Config(ConfigError::MissingPolicy))));

        let cfg = InterfaceConfig { n_neurons: 0, ..bidirectional() };
        let err = Conductor::builder(cfg).build_with_registry(bus.clone(), &reg).err();
        assert!(matches!(err, Some(BridgeError::Config(ConfigError::ZeroNeurons))));

        assert_eq!(reg.issued(), 0);
        Conductor::builder(bidirectional())
            .build_with_registry(bus, &reg)
            .unwrap();
        assert_eq!(reg.issued(), 1);
    }

    #[test]
    fn ports_follow_identity() {
        let reg = InterfaceRegistry::new();
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let a = Conductor::builder(bidirectional()).build_with_registry(bus.clone(), &reg).unwrap();
        let b = Conductor::builder(bidirectional()).build_with_registry(bus, &reg).unwrap();
        assert_eq!(a.ports().live_output, 19999);
        assert_eq!(b.ports(), PortMap { live_output: 20000, injector: 17896, board: 12346 });
        assert_eq!(b.node_name(), "spike_bridge_interface_1");
    }

    #[test]
    fn bus_untouched_until_run_start() {
        let bus = Arc::new(LocalBus::new());
        let mut c = Conductor::builder(bidirectional()).build(bus.clone()).unwrap();
        c.arm().unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(bus.subscribers("to_spinnaker"), 0);

        c.on_run_started().unwrap();
        assert!(wait_for(|| bus.subscribers("to_spinnaker") == 1));
        c.on_run_stopped().unwrap();
        assert_eq!(c.state(), ConductorState::Stopped);
    }

    #[test]
    fn run_start_is_driven_by_substrate_only_once() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let mut c = Conductor::builder(bidirectional()).build(bus).unwrap();
        assert!(c.on_run_started().is_err());
        c.arm().unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let id = c.id();
        c.add_run_start_callback(move |started| {
            assert_eq!(started, id);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        c.on_run_started().unwrap();
        assert!(c.on_run_started().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn values_flow_both_ways() {
        let bus = Arc::new(LocalBus::new());
        let mut c = Conductor::builder(bidirectional())
            .external_sink_clock()
            .build(bus.clone())
            .unwrap();
        let out = bus.subscribe("from_spinnaker").unwrap();
        c.arm().unwrap();
        c.on_run_started().unwrap();

        assert!(wait_for(|| bus.subscribers("to_spinnaker") == 1));
        bus.publish("to_spinnaker", &BusValue::Scalar(25.0)).unwrap();
        let source = c.source().unwrap().clone();
        assert!(wait_for(|| source.request_interval(1) == Some(25.0)));

        c.sink().unwrap().on_spike_event(3, 1);
        let mut got = None;
        assert!(wait_for(|| {
            if let Ok(Some(v)) = out.try_recv() {
                got = Some(v);
            }
            got == Some(BusValue::Scalar(1.0))
        }));
        c.on_run_stopped().unwrap();
    }

    #[test]
    fn benchmark_report_after_stop() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let cfg = InterfaceConfig { benchmark: true, ..bidirectional() };
        let mut c = Conductor::builder(cfg).build(bus).unwrap();
        c.arm().unwrap();
        c.on_run_started().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(c.benchmark_report().is_none());
        c.on_run_stopped().unwrap();
        let report = c.benchmark_report().unwrap();
        assert!(report.count > 0);
        assert!(report.wall_time >= Duration::from_millis(20));
    }

    #[test]
    fn stop_before_start_is_allowed() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let mut c = Conductor::builder(bidirectional()).build(bus).unwrap();
        c.arm().unwrap();
        c.on_run_stopped().unwrap();
        assert!(c.arm().is_err());
        assert!(c.benchmark_report().is_none());
    }

    #[test]
    fn run_start_resets_engine_state() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let cfg = InterfaceConfig { record: true, ..bidirectional() };
        let mut c = Conductor::builder(cfg)
            .external_sink_clock()
            .build(bus)
            .unwrap();
        let sink = c.sink().unwrap().clone();
        sink.on_spike_event(1, 0);
        assert_eq!(sink.current_output(), BusValue::Scalar(1.0));

        c.arm().unwrap();
        c.on_run_started().unwrap();
        assert_eq!(sink.current_output(), BusValue::Scalar(0.0));
        assert!(c.recording().outputs.is_empty());

        sink.on_spike_event(4, 1);
        assert_eq!(c.recording().outputs, vec![(4, BusValue::Scalar(1.0))]);
    }

    #[test]
    fn own_sink_clock_decays_output() {
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let cfg = InterfaceConfig {
            n_neurons: 1,
            source: None,
            sink: Some(SinkKind::Smoothing {
                decay: 0.5,
                increment: 1.0,
                calling_rate: 1,
            }),
            ..Default::default()
        };
        let mut c = Conductor::builder(cfg).build(bus).unwrap();
        c.arm().unwrap();
        c.on_run_started().unwrap();

        let sink = c.sink().unwrap().clone();
        sink.on_spike_event(0, 0);
        assert!(wait_for(|| sink.current_output().as_scalar().unwrap() < 0.01));
        c.on_run_stopped().unwrap();

        // The clock is joined: the output no longer moves.
        sink.on_spike_event(0, 0);
        let after = sink.current_output();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.current_output(), after);
    }

    #[test]
    fn stopping_releases_the_bus() {
        let bus = Arc::new(LocalBus::new());
        let mut c = Conductor::builder(bidirectional()).build(bus.clone()).unwrap();
        c.arm().unwrap();
        c.on_run_started().unwrap();
        assert!(Arc::strong_count(&bus) > 1);
        c.on_run_stopped().unwrap();
        assert_eq!(Arc::strong_count(&bus), 1);
        assert!(c.on_run_started().is_err());
    }
}
