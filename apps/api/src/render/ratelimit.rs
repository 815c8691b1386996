//! Fixed-window admission control.
//!
//! Each identifier gets one window at a time: the first check opens it
//! with count=1, later checks in the same window increment, and a
//! saturated window denies without incrementing. When the window
//! elapses the next check replaces it. Exceeding the budget is a
//! normal outcome, not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::render::clock::Clock;

/// Outcome of an admission check. `reset_at` is the instant the
/// identifier's current window rolls over.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: SystemTime,
}

#[derive(Debug, Serialize)]
pub struct LimiterStats {
    pub active_windows: usize,
    pub limit: u32,
    pub window_secs: u64,
}

struct Window {
    count: u32,
    reset_at: SystemTime,
}

/// Per-identifier fixed-window request counter.
///
/// State is process-local and lost on restart. The window map is
/// bounded by the periodic sweep; `check` must hold the map lock for
/// its whole read-modify-write so concurrent checks for the same
/// identifier never lose an increment.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or denies one request for `identifier`.
    pub fn check(&self, identifier: &str) -> Decision {
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate limit window map poisoned");

        if let Some(window) = windows.get_mut(identifier) {
            if window.reset_at > now {
                if window.count >= self.limit {
                    // Saturated: deny without incrementing.
                    return Decision {
                        allowed: false,
                        limit: self.limit,
                        remaining: 0,
                        reset_at: window.reset_at,
                    };
                }
                window.count += 1;
                return Decision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit - window.count,
                    reset_at: window.reset_at,
                };
            }
        }

        // Fresh identifier or elapsed window: replace, never merge.
        let reset_at = now + self.window;
        windows.insert(identifier.to_string(), Window { count: 1, reset_at });
        Decision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - 1,
            reset_at,
        }
    }

    /// Administrative escape hatch: drops the identifier's window now.
    pub fn reset(&self, identifier: &str) -> bool {
        let mut windows = self.windows.lock().expect("rate limit window map poisoned");
        let removed = windows.remove(identifier).is_some();
        if removed {
            info!("rate limit window reset for {identifier}");
        }
        removed
    }

    /// Drops every window whose reset time has passed. Returns the
    /// number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate limit window map poisoned");
        let before = windows.len();
        windows.retain(|_, window| window.reset_at > now);
        before - windows.len()
    }

    pub fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let windows = self.windows.lock().expect("rate limit window map poisoned");
        LimiterStats {
            active_windows: windows.values().filter(|w| w.reset_at > now).count(),
            limit: self.limit,
            window_secs: self.window.as_secs(),
        }
    }

    /// Spawns the background sweep that bounds the window map to
    /// currently-or-recently-active identifiers. The returned handle is
    /// the sweep's lifecycle: dropping it detaches, aborting it stops.
    pub fn start_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    debug!("rate limit sweep removed {removed} expired windows");
                }
            }
        })
    }
}
