// Subcommand bodies.

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use spike_bridge::{Conductor, InterfaceConfig, LocalSubstrate, MessageBus, UdpBus};
use spike_bridge_core::{BusValue, SinkKind, SourceKind};
use tracing::info;

use crate::{ListenArgs, RunArgs, SendArgs};

/// Read a JSON config, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<InterfaceConfig> {
    let Some(path) = path else {
        return Ok(InterfaceConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// A session needs both paths; fill in the stock ones where the config has none.
fn session_config(mut cfg: InterfaceConfig, args: &RunArgs) -> InterfaceConfig {
    if let Some(n) = args.n_neurons {
        cfg.n_neurons = n;
    }
    cfg.benchmark |= args.benchmark;
    cfg.record |= args.record.is_some();
    cfg.source.get_or_insert(SourceKind::ConstantRate);
    cfg.sink.get_or_insert(SinkKind::Smoothing {
        decay: spike_bridge_core::sink::DEFAULT_DECAY,
        increment: spike_bridge_core::sink::DEFAULT_INCREMENT,
        calling_rate: spike_bridge_core::sink::DEFAULT_SMOOTHING_RATE,
    });
    cfg
}

pub fn parse_value(text: &str) -> Result<BusValue> {
    serde_json::from_str(text)
        .with_context(|| format!("'{text}' is not a number or array of numbers"))
}

pub fn run(args: RunArgs) -> Result<()> {
    let cfg = session_config(load_config(args.config.as_deref())?, &args);
    let bus = Arc::new(UdpBus::bind(args.bind, Some(args.peer))?);

    let mut conductor = Conductor::builder(cfg).external_sink_clock().build(bus)?;
    conductor.add_run_start_callback(|id| info!(interface = %id, "run started"));
    conductor.arm()?;

    let mut substrate = LocalSubstrate::attach(&conductor).ticking_sink();
    conductor.on_run_started()?;
    let duration = Duration::from_millis(args.duration_ms);
    let fired = substrate.run_realtime(duration, &AtomicBool::new(false));
    conductor.on_run_stopped()?;
    info!(fired, sim_ms = substrate.now(), "session finished");

    if let Some(report) = conductor.benchmark_report() {
        println!("{report}");
    }
    if let Some(path) = &args.record {
        let json = serde_json::to_string_pretty(&conductor.recording())?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

pub fn send(args: SendArgs) -> Result<()> {
    let value = parse_value(&args.value)?;
    let bus = UdpBus::bind("127.0.0.1:0".parse()?, Some(args.peer))?;
    for i in 0..args.repeat {
        if i > 0 {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
        bus.publish(&args.topic, &value)?;
    }
    info!(topic = %args.topic, peer = %args.peer, times = args.repeat, "sent");
    Ok(())
}

pub fn listen(args: ListenArgs) -> Result<()> {
    let bus = UdpBus::bind(args.bind, None)?;
    let sub = bus.subscribe(&args.topic)?;
    info!(topic = %args.topic, bind = %args.bind, "listening");

    let mut seen = 0u64;
    while args.count.map_or(true, |c| seen < c) {
        match sub.recv_timeout(Duration::from_millis(500)) {
            Ok(Some(value)) => {
                println!("{}", serde_json::to_string(&value)?);
                seen += 1;
            }
            Ok(None) => {}
            Err(e) => bail!(e),
        }
    }
    Ok(())
}
