// perf.rs - Performance timing infrastructure for Rook
//
// This module provides timing instrumentation for diagnosing model-build
// latency. Controlled via ROOK_PERF environment variable.
//
// Usage:
//   ROOK_PERF=1 rook model <path>       # Enable basic timing logs
//   ROOK_PERF=verbose rook model <path> # Enable detailed timing with thresholds


use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Global flag indicating whether performance timing is enabled
static PERF_ENABLED: OnceLock<bool> = OnceLock::new();

/// Global flag indicating verbose mode (includes threshold warnings)
static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Check if performance timing is enabled
pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("ROOK_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("ROOK_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// Use this to measure the duration of a scope:
/// ```
/// use rook::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("operation_name");
/// // ... do work ...
/// // Duration logged when _guard goes out of scope
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    /// Create a new timing guard with the given name
    ///
    /// Duration will be logged at INFO level when the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// Create a timing guard with a warning threshold
    ///
    /// If the operation takes longer than `threshold_ms`, a warning will be logged.
    #[allow(dead_code)] // Part of the public perf API for benchmarks/diagnostics
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: Some(threshold_ms),
            enabled: is_enabled(),
        }
    }

    /// Get the elapsed time without consuming the guard
    #[allow(dead_code)] // Part of the public perf API for benchmarks/diagnostics
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Manually complete the timing and return the duration
    ///
    /// This consumes the guard without logging (useful when you want to handle
    /// the duration yourself).
    #[allow(dead_code)] // Part of the public perf API for benchmarks/diagnostics
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        std::mem::forget(self); // Prevent Drop from running
        elapsed
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Aggregated performance metrics for a model-build run
#[derive(Debug, Default, Clone)]
pub struct PerfMetrics {
    /// Duration of source-file discovery
    pub scan_duration: Option<Duration>,
    /// Duration of parsing (all units)
    pub parse_duration: Option<Duration>,
    /// Duration of semantic analysis (all units)
    pub analysis_duration: Option<Duration>,
    /// Number of files discovered during scanning
    pub files_scanned: usize,
    /// Number of source models built
    pub models_built: usize,
}

impl PerfMetrics {
    /// Create a new empty PerfMetrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a summary of the metrics
    pub fn log_summary(&self) {
        if !is_enabled() {
            return;
        }

        log::info!("[PERF] === Model Build Performance Summary ===");

        if let Some(d) = self.scan_duration {
            log::info!("[PERF] Scan: {:?} ({} files)", d, self.files_scanned);
        }

        if let Some(d) = self.parse_duration {
            log::info!("[PERF] Parse: {:?}", d);
        }

        if let Some(d) = self.analysis_duration {
            log::info!(
                "[PERF] Analysis: {:?} ({} models)",
                d,
                self.models_built
            );
        }
    }
}

/// Global metrics collector for model-build timing
static BUILD_METRICS: OnceLock<std::sync::Mutex<PerfMetrics>> = OnceLock::new();

/// Get or initialize the global build metrics
pub fn build_metrics() -> &'static std::sync::Mutex<PerfMetrics> {
    BUILD_METRICS.get_or_init(|| std::sync::Mutex::new(PerfMetrics::new()))
}

/// Record source scan completion
pub fn record_scan(duration: Duration, files_scanned: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = build_metrics().lock() {
        metrics.scan_duration = Some(duration);
        metrics.files_scanned = files_scanned;
    }
}

/// Record parse completion
pub fn record_parse(duration: Duration) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = build_metrics().lock() {
        metrics.parse_duration = Some(duration);
    }
}

/// Record analysis completion
pub fn record_analysis(duration: Duration, models_built: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = build_metrics().lock() {
        metrics.analysis_duration = Some(duration);
        metrics.models_built = models_built;
    }
}

/// Returns the peak resident set size (RSS) of the current process in bytes.
///
/// - **macOS**: Uses `libc::getrusage` (`ru_maxrss`, which is in bytes on macOS).
/// - **Linux**: Reads `/proc/self/status` and parses the `VmHWM` field (reported in kB).
/// - **Other platforms**: Returns `None`.
pub fn peak_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        peak_rss_macos()
    }
    #[cfg(target_os = "linux")]
    {
        peak_rss_linux()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

#[cfg(target_os = "macos")]
fn peak_rss_macos() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut usage = MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage writes into the provided pointer; we check the return value.
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if ret == 0 {
        // SAFETY: getrusage succeeded, so the struct is fully initialized.
        let usage = unsafe { usage.assume_init() };
        // On macOS, ru_maxrss is in bytes.
        Some(usage.ru_maxrss as u64)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn peak_rss_linux() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            // Format: "VmHWM:    12345 kB"
            let trimmed = rest.trim();
            let kb_str = trimmed.strip_suffix("kB").unwrap_or(trimmed).trim();
            let kb: u64 = kb_str.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
