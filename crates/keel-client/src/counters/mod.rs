// Frame and request counters with snapshot support for the client.
#[cfg(feature = "telemetry")]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "telemetry")]
#[derive(Default)]
pub(crate) struct FrameCounters {
    pub(crate) frames_in_ok: AtomicU64,
    pub(crate) frames_in_err: AtomicU64,
    pub(crate) frames_out_ok: AtomicU64,
    pub(crate) bytes_in: AtomicU64,
    pub(crate) bytes_out: AtomicU64,
    pub(crate) requests_enqueued: AtomicU64,
    pub(crate) responses_matched: AtomicU64,
    pub(crate) flushes_injected: AtomicU64,
    pub(crate) handles_released: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct FrameCountersSnapshot {
    pub frames_in_ok: u64,
    pub frames_in_err: u64,
    pub frames_out_ok: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub requests_enqueued: u64,
    pub responses_matched: u64,
    pub flushes_injected: u64,
    pub handles_released: u64,
}

#[cfg(feature = "telemetry")]
static FRAME_COUNTERS: std::sync::OnceLock<FrameCounters> = std::sync::OnceLock::new();

#[cfg(feature = "telemetry")]
pub(crate) fn frame_counters() -> &'static FrameCounters {
    FRAME_COUNTERS.get_or_init(FrameCounters::default)
}

pub fn frame_counters_snapshot() -> FrameCountersSnapshot {
    #[cfg(feature = "telemetry")]
    {
        let counters = frame_counters();
        FrameCountersSnapshot {
            frames_in_ok: counters.frames_in_ok.load(Ordering::Relaxed),
            frames_in_err: counters.frames_in_err.load(Ordering::Relaxed),
            frames_out_ok: counters.frames_out_ok.load(Ordering::Relaxed),
            bytes_in: counters.bytes_in.load(Ordering::Relaxed),
            bytes_out: counters.bytes_out.load(Ordering::Relaxed),
            requests_enqueued: counters.requests_enqueued.load(Ordering::Relaxed),
            responses_matched: counters.responses_matched.load(Ordering::Relaxed),
            flushes_injected: counters.flushes_injected.load(Ordering::Relaxed),
            handles_released: counters.handles_released.load(Ordering::Relaxed),
        }
    }
    #[cfg(not(feature = "telemetry"))]
    {
        FrameCountersSnapshot {
            frames_in_ok: 0,
            frames_in_err: 0,
            frames_out_ok: 0,
            bytes_in: 0,
            bytes_out: 0,
            requests_enqueued: 0,
            responses_matched: 0,
            flushes_injected: 0,
            handles_released: 0,
        }
    }
}

pub fn reset_frame_counters() {
    #[cfg(feature = "telemetry")]
    {
        let counters = frame_counters();
        counters.frames_in_ok.store(0, Ordering::Relaxed);
        counters.frames_in_err.store(0, Ordering::Relaxed);
        counters.frames_out_ok.store(0, Ordering::Relaxed);
        counters.bytes_in.store(0, Ordering::Relaxed);
        counters.bytes_out.store(0, Ordering::Relaxed);
        counters.requests_enqueued.store(0, Ordering::Relaxed);
        counters.responses_matched.store(0, Ordering::Relaxed);
        counters.flushes_injected.store(0, Ordering::Relaxed);
        counters.handles_released.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counters_snapshot_returns_values() {
        let snapshot = frame_counters_snapshot();
        // All zeros in non-telemetry mode; present either way.
        let _ = snapshot.frames_in_ok;
        let _ = snapshot.frames_in_err;
        let _ = snapshot.frames_out_ok;
        let _ = snapshot.bytes_in;
        let _ = snapshot.bytes_out;
        let _ = snapshot.requests_enqueued;
        let _ = snapshot.responses_matched;
        let _ = snapshot.flushes_injected;
        let _ = snapshot.handles_released;
    }

    #[test]
    fn reset_frame_counters_does_not_panic() {
        reset_frame_counters();
    }
}
