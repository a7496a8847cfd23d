//! Probabilistic packet delivery model.
//!
//! Nothing here touches a socket. A transmission draws a base latency and
//! then succeeds or fails according to a per-protocol model:
//!
//! | Protocol | Success rate | On success        | On failure                      |
//! |----------|--------------|-------------------|---------------------------------|
//! | tcp      | 0.95         | base latency      | "connection refused", +100..300 |
//! | udp      | 0.85         | base latency x0.8 | "packet lost", base latency     |
//!
//! Protocol names other than tcp/udp are rejected by the caller with
//! [`UNSUPPORTED_PROTOCOL`].

use rand::Rng;

use crate::models::{DeliveryStatus, Protocol};

pub const TCP_SUCCESS_RATE: f64 = 0.95;
pub const UDP_SUCCESS_RATE: f64 = 0.85;
/// UDP skips the handshake, so successful datagrams arrive faster.
pub const UDP_LATENCY_FACTOR: f64 = 0.8;

pub const CONNECTION_REFUSED: &str = "connection refused";
pub const PACKET_LOST: &str = "packet lost";
pub const UNSUPPORTED_PROTOCOL: &str = "unsupported protocol";

/// Outcome of one simulated transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transmission {
    pub status: DeliveryStatus,
    /// Milliseconds.
    pub latency: f64,
    pub error: Option<&'static str>,
}

impl Transmission {
    fn success(latency: f64) -> Self {
        Self {
            status: DeliveryStatus::Success,
            latency,
            error: None,
        }
    }

    fn failed(latency: f64, error: &'static str) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            latency,
            error: Some(error),
        }
    }
}

/// Base network latency in `[10, 101)` ms: a whole part in `[10, 100)` plus
/// a fractional jitter.
pub fn base_latency<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    f64::from(rng.gen_range(10u32..100)) + rng.gen::<f64>()
}

/// Simulates sending one packet to an open port.
pub fn transmit<R: Rng + ?Sized>(rng: &mut R, protocol: Protocol) -> Transmission {
    let latency = base_latency(rng);
    match protocol {
        Protocol::Tcp => {
            if rng.gen::<f64>() < TCP_SUCCESS_RATE {
                Transmission::success(latency)
            } else {
                let penalty = f64::from(rng.gen_range(100u32..300));
                Transmission::failed(latency + penalty, CONNECTION_REFUSED)
            }
        }
        Protocol::Udp => {
            if rng.gen::<f64>() < UDP_SUCCESS_RATE {
                Transmission::success(latency * UDP_LATENCY_FACTOR)
            } else {
                Transmission::failed(latency, PACKET_LOST)
            }
        }
    }
}
