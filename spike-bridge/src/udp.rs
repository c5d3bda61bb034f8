//! UDP transports: a JSON datagram message bus and a rate-control connection.
//!
//! Every bus datagram is one JSON object `{"topic": "...", "data": <value>}`.
//! Rate-control datagrams are `{"population": "...", "rates": [[id, hz], ...]}`.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spike_bridge_core::BusValue;
use tracing::{debug, trace, warn};

use crate::bus::{Fanout, MessageBus, Subscription};
use crate::error::TransportError;
use crate::rate::{RateControl, RateControlConnector};

/// Largest datagram the receiver accepts.
pub const MAX_DATAGRAM: usize = 65_507;

const RECV_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    pub topic: String,
    pub data: BusValue,
}

impl Datagram {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Message bus over UDP. Incoming datagrams on the bound socket are fanned
/// out to local subscribers; publishing sends to a fixed peer.
pub struct UdpBus {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    fanout: Arc<Fanout>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl UdpBus {
    /// Bind `local` and start the receiver thread. Without a `peer` the bus
    /// is receive-only and `publish` fails.
    pub fn bind(local: SocketAddr, peer: Option<SocketAddr>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)?;
        let rx_socket = socket.try_clone()?;
        rx_socket.set_read_timeout(Some(RECV_POLL))?;

        let fanout = Arc::new(Fanout::default());
        let running = Arc::new(AtomicBool::new(true));
        let receiver = {
            let fanout = fanout.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("spike-bridge-udp-rx".to_string())
                .spawn(move || receive_loop(rx_socket, fanout, running))?
        };
        debug!(local = %socket.local_addr()?, ?peer, "udp bus bound");

        Ok(Self {
            socket,
            peer,
            fanout,
            running,
            receiver: Some(receiver),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

fn receive_loop(socket: UdpSocket, fanout: Arc<Fanout>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => match Datagram::decode(&buf[..len]) {
                Ok(d) => {
                    trace!(%from, topic = %d.topic, "datagram");
                    fanout.deliver(&d.topic, &d.data);
                }
                Err(e) => debug!(%from, error = %e, "malformed datagram dropped"),
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                thread::sleep(RECV_POLL);
            }
        }
    }
}

impl MessageBus for UdpBus {
    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        Ok(self.fanout.subscribe(topic))
    }

    fn publish(&self, topic: &str, value: &BusValue) -> Result<(), TransportError> {
        let peer = self
            .peer
            .ok_or_else(|| TransportError::Unreachable("udp bus has no peer".to_string()))?;
        let bytes = Datagram {
            topic: topic.to_string(),
            data: value.clone(),
        }
        .encode()?;
        self.socket.send_to(&bytes, peer)?;
        Ok(())
    }
}

impl Drop for UdpBus {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDatagram {
    pub population: String,
    pub rates: Vec<(u32, f64)>,
}

/// Rate control that sends JSON datagrams from a bound local port.
pub struct UdpRateControl {
    socket: UdpSocket,
    target: SocketAddr,
}

impl RateControl for UdpRateControl {
    fn set_rates(&mut self, population: &str, rates: &[(u32, f64)]) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(&RateDatagram {
            population: population.to_string(),
            rates: rates.to_vec(),
        })?;
        self.socket.send_to(&bytes, self.target)?;
        Ok(())
    }
}

/// Binds `host:local_port` per connection and talks to `target`.
pub struct UdpRateConnector {
    host: std::net::IpAddr,
    target: SocketAddr,
}

impl UdpRateConnector {
    pub fn new(host: std::net::IpAddr, target: SocketAddr) -> Self {
        Self { host, target }
    }
}

impl RateControlConnector for UdpRateConnector {
    fn connect(&self, local_port: u16) -> Result<Box<dyn RateControl>, TransportError> {
        let socket = UdpSocket::bind(SocketAddr::new(self.host, local_port))?;
        Ok(Box::new(UdpRateControl {
            socket,
            target: self.target,
        }))
    }
}
