// src/instrumentation/probes.rs
//! Built-in event producers
//!
//! - **CPU load**: periodic hook reporting the process's CPU usage since the
//!   previous sample
//! - **Thread sleep**: an instrumented async sleep that commits a duration event

use crate::instrumentation::catalog::{CPU_LOAD, THREAD_SLEEP};
use crate::instrumentation::event::CapturedEvent;
use crate::instrumentation::flight_recorder::FlightRecorder;
use crate::utils::errors::Result;
use parking_lot::Mutex;
use serde_json::json;
use std::time::{Duration, Instant};

/// Samples process CPU time through `getrusage(RUSAGE_SELF)`
pub struct CpuLoadProbe {
    cores: usize,
    last: Mutex<(Instant, Duration)>,
}

impl CpuLoadProbe {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            cores,
            last: Mutex::new((Instant::now(), process_cpu_time().unwrap_or_default())),
        }
    }

    /// CPU load since the previous sample, normalized to `0.0..=1.0`
    pub fn sample(&self) -> Option<serde_json::Value> {
        let cpu = process_cpu_time()?;
        let now = Instant::now();

        let mut last = self.last.lock();
        let wall = now.duration_since(last.0);
        let used = cpu.saturating_sub(last.1);
        *last = (now, cpu);

        if wall.is_zero() {
            return None;
        }

        let load = (used.as_secs_f64() / wall.as_secs_f64() / self.cores as f64).clamp(0.0, 1.0);
        Some(json!({
            "processLoad": load,
            "cpuTimeMs": cpu.as_millis() as u64,
            "cores": self.cores,
        }))
    }

    /// Register this probe as the `runtime.CPULoad` hook
    pub fn install(self, recorder: &FlightRecorder) -> Result<()> {
        recorder.add_periodic_hook(CPU_LOAD, move || self.sample())
    }
}

impl Default for CpuLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// User plus system CPU time consumed by this process
fn process_cpu_time() -> Option<Duration> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: initialized by the successful call above
    let usage = unsafe { usage.assume_init() };

    let to_duration = |tv: libc::timeval| {
        Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64)
    };
    Some(to_duration(usage.ru_utime) + to_duration(usage.ru_stime))
}

/// Sleep for `duration` and record a `runtime.ThreadSleep` event if enabled
pub async fn timed_sleep(recorder: &FlightRecorder, duration: Duration) {
    let started = Instant::now();
    tokio::time::sleep(duration).await;

    if recorder.is_enabled(THREAD_SLEEP) {
        let event = CapturedEvent::new(
            THREAD_SLEEP,
            json!({ "requestedMs": duration.as_millis() as u64 }),
        )
        .with_duration(started.elapsed())
        .on_current_thread();
        recorder.commit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::event::Sensitivity;
    use crate::instrumentation::session::{CaptureSession, SessionMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_cpu_time_is_readable() {
        assert!(process_cpu_time().is_some());
    }

    #[test]
    fn test_cpu_load_sample_in_range() {
        let probe = CpuLoadProbe::new();

        // burn a little CPU so the sample is non-trivial
        let mut acc = 0u64;
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(20) {
            acc = acc.wrapping_add(std::hint::black_box(acc ^ 0x5bd1e995));
        }
        std::hint::black_box(acc);

        let sample = probe.sample().unwrap();
        let load = sample["processLoad"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&load));
        assert!(sample["cores"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_timed_sleep_records_when_enabled() {
        let hub = Arc::new(FlightRecorder::with_builtin_catalog());

        // nothing enabled: nothing committed
        timed_sleep(&hub, Duration::from_millis(2)).await;
        assert_eq!(hub.committed(), 0);

        let seen = Arc::new(AtomicUsize::new(0));
        let recording = hub.new_recording(1, SessionMode::Stream, "sleepy");
        recording
            .enable(THREAD_SLEEP, Sensitivity::Threshold(Duration::from_millis(1)))
            .unwrap();
        let counter = Arc::clone(&seen);
        recording
            .on_event(Box::new(move |event| {
                assert!(event.duration().unwrap() >= Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        recording.start().unwrap();

        timed_sleep(&hub, Duration::from_millis(5)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        recording.close();
    }

    #[test]
    fn test_install_registers_hook() {
        let hub = FlightRecorder::with_builtin_catalog();
        CpuLoadProbe::new().install(&hub).unwrap();
        assert!(hub.periodic_hook(CPU_LOAD).is_some());
    }
}
