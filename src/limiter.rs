//! Per-client rate limiting.
//!
//! Sliding one-minute counters per client address, a temporary ban for
//! clients that blow through their limit, and a coarse global
//! queries-per-second guard. Denied datagrams are dropped without a
//! response.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

struct Window {
    count: u64,
    started: Instant,
}

pub struct RateLimiter {
    per_client: DashMap<IpAddr, Window>,
    banned: DashMap<IpAddr, Instant>,
    global: Mutex<Window>,
    per_client_per_minute: u64,
    global_per_second: u64,
    ban_duration: Duration,
}

impl RateLimiter {
    pub fn new(per_client_per_minute: u64, global_per_second: u64, ban_duration: Duration) -> Self {
        Self {
            per_client: DashMap::new(),
            banned: DashMap::new(),
            global: Mutex::new(Window {
                count: 0,
                started: Instant::now(),
            }),
            per_client_per_minute,
            global_per_second,
            ban_duration,
        }
    }

    /// Whether a datagram from `client` may enter the pipeline.
    pub fn check(&self, client: IpAddr) -> bool {
        let now = Instant::now();

        if let Some(until) = self.banned.get(&client).map(|e| *e.value()) {
            if now < until {
                return false;
            }
            // Ban lifted: the client starts over with a fresh window.
            self.banned.remove(&client);
            self.per_client.remove(&client);
        }

        {
            let Ok(mut global) = self.global.lock() else {
                return true;
            };
            if now.duration_since(global.started) >= Duration::from_secs(1) {
                global.count = 0;
                global.started = now;
            }
            global.count += 1;
            if global.count > self.global_per_second {
                warn!(rate = global.count, "global query rate exceeded, shedding");
                return false;
            }
        }

        let mut window = self.per_client.entry(client).or_insert_with(|| Window {
            count: 0,
            started: now,
        });
        if now.duration_since(window.started) >= Duration::from_secs(60) {
            window.count = 0;
            window.started = now;
        }
        window.count += 1;
        if window.count > self.per_client_per_minute {
            drop(window);
            self.banned.insert(client, now + self.ban_duration);
            warn!(%client, "client exceeded query limit, banned");
            return false;
        }

        true
    }
}
