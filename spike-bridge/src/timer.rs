//! Fixed-rate background threads.
//!
//! A `Periodic` owns one named thread driven by `crossbeam::channel::tick`.
//! Stopping drops the stop sender; the thread sees the disconnect on its next
//! select and exits, and `stop` joins it.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

pub struct Periodic {
    name: String,
    period: Duration,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    /// Call `on_tick(n)` every `period`, `n` counting from 0.
    pub fn spawn<F>(name: impl Into<String>, period: Duration, mut on_tick: F) -> Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(period);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut n = 0u64;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            on_tick(n);
                            n = n.wrapping_add(1);
                        }
                    }
                }
            })
            .map_err(BridgeError::Spawn)?;

        debug!(thread = %name, ?period, "periodic worker started");
        Ok(Self {
            name,
            period,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(thread = %self.name, "periodic worker panicked");
            } else {
                debug!(thread = %self.name, "periodic worker stopped");
            }
        }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Period of a clock running at `hz`.
pub fn period_of(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz)
}
