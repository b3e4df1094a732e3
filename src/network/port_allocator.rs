//! Opportunistic host port reservation.
//!
//! Ports are found by binding a throwaway listener and releasing it right away. Nothing is
//! held between allocation and the moment the port is actually used, so another process can
//! grab it in between. Sessions accept that race: a stolen port surfaces later as a launch or
//! connect failure and the session is torn down.

use crate::configuration::types::PortRange;
use crate::error_handling::types::NetworkError;
use log::{debug, warn};
use rand::seq::SliceRandom;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PortAllocator {
    range: Option<PortRange>,
    issued: AtomicU64,
}

impl PortAllocator {
    pub fn new(range: Option<PortRange>) -> Self {
        Self {
            range,
            issued: AtomicU64::new(0),
        }
    }

    /// Lets the OS pick a free port on the wildcard address.
    pub fn allocate() -> Result<u16, NetworkError> {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(NetworkError::BindFail)?;
        let port = listener
            .local_addr()
            .map_err(NetworkError::BindFail)?
            .port();
        drop(listener);
        debug!("Allocated ephemeral port {}", port);
        Ok(port)
    }

    /// Tries every port of `min..=max` in random order and returns the first one that binds.
    pub fn allocate_from_range(min: u16, max: u16) -> Result<u16, NetworkError> {
        if min == 0 || min > max {
            return Err(NetworkError::InvalidRange { min, max });
        }

        let mut candidates: Vec<u16> = (min..=max).collect();
        candidates.shuffle(&mut rand::rng());

        for port in candidates {
            match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
                Ok(listener) => {
                    drop(listener);
                    debug!("Allocated port {} from range {}-{}", port, min, max);
                    return Ok(port);
                }
                Err(_) => continue,
            }
        }

        warn!("Port range {}-{} is exhausted", min, max);
        Err(NetworkError::RangeExhausted { min, max })
    }

    /// Allocates from the configured range, or from the OS when no range is configured.
    pub fn next_port(&self) -> Result<u16, NetworkError> {
        let [port] = self.next_ports::<1>(&[])?;
        Ok(port)
    }

    /// Allocates `N` distinct ports, none of them in `in_use`.
    ///
    /// Every chosen listener stays bound until the whole set is drawn, so the OS and the
    /// range walk can never hand the same port out twice within one call.
    pub fn next_ports<const N: usize>(&self, in_use: &[u16]) -> Result<[u16; N], NetworkError> {
        let mut ports = [0u16; N];
        let mut held = Vec::with_capacity(N + in_use.len());

        match self.range {
            Some(range) => {
                let (min, max) = (range.start, range.end);
                if min == 0 || min > max {
                    return Err(NetworkError::InvalidRange { min, max });
                }

                let mut candidates: Vec<u16> =
                    (min..=max).filter(|port| !in_use.contains(port)).collect();
                candidates.shuffle(&mut rand::rng());

                let mut chosen = candidates.into_iter().filter_map(|port| {
                    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                        .ok()
                        .map(|listener| (port, listener))
                });
                for slot in ports.iter_mut() {
                    let Some((port, listener)) = chosen.next() else {
                        warn!("Port range {}-{} cannot supply {} ports", min, max, N);
                        return Err(NetworkError::RangeExhausted { min, max });
                    };
                    held.push(listener);
                    *slot = port;
                }
            }
            None => {
                let mut filled = 0;
                while filled < N {
                    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
                        .map_err(NetworkError::BindFail)?;
                    let port = listener
                        .local_addr()
                        .map_err(NetworkError::BindFail)?
                        .port();
                    // a port from `in_use` stays held so the next bind moves past it
                    if !in_use.contains(&port) {
                        ports[filled] = port;
                        filled += 1;
                    }
                    held.push(listener);
                }
            }
        }

        drop(held);
        debug!("Allocated ports {:?}", ports);
        self.issued.fetch_add(N as u64, Ordering::Relaxed);
        Ok(ports)
    }

    /// Number of ports handed out by [`next_port`](Self::next_port) so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
