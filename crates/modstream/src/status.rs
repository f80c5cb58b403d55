use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters updated from the completion context and the decode worker.
///
/// All fields are relaxed atomics: readers get a best-effort view.
#[derive(Debug, Default)]
pub struct StreamCounters {
    periods: AtomicU64,
    underruns: AtomicU64,
    decode_failures: AtomicU64,
    last_underrun_log_ms: AtomicU64,
    last_decode_log_ms: AtomicU64,
}

/// Plain copy of [`StreamCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub periods: u64,
    pub underruns: u64,
    pub decode_failures: u64,
}

const LOG_INTERVAL_MS: u64 = 1000;

impl StreamCounters {
    pub fn reset(&self) {
        self.periods.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_period(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an underrun and warn at most once per second.
    pub fn record_underrun(&self, live_buffer: u8) {
        let total = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        if should_log(&self.last_underrun_log_ms) {
            tracing::warn!(
                underruns = total,
                live_buffer,
                "no filled buffer ready, replaying silence"
            );
        }
    }

    /// Count a failed decode cycle and warn at most once per second.
    pub fn record_decode_failure(&self, err: &dyn std::fmt::Display) {
        let total = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if should_log(&self.last_decode_log_ms) {
            tracing::warn!(failures = total, "decode failed, period silenced: {err}");
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            periods: self.periods.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

fn should_log(last_ms: &AtomicU64) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let last = last_ms.load(Ordering::Relaxed);
    if now.saturating_sub(last) > LOG_INTERVAL_MS {
        last_ms.store(now, Ordering::Relaxed);
        return true;
    }
    false
}
