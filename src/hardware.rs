//! Periodic hardware usage reports.
//!
//! Samples memory and per-core CPU usage and PATCHes them to the
//! collector. Failures are counted and reported up to a quiet limit; the
//! sampler keeps trying regardless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::emitter::Emitter;
use crate::failure::FailureCounter;
use crate::tag::TAG_ERROR;
use crate::transport::{Transport, HARDWARE_PATH};

/// Shortest window that yields a meaningful CPU usage reading.
const MIN_CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(200);

/// Descriptor of the first CPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuInfo {
    pub vendor_id: String,
    pub brand: String,
    pub name: String,
    pub mhz: u64,
    pub cores: usize,
}

/// One hardware sample, in the collector's schema. Memory is in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HardwareUsage {
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub cpus: Vec<f64>,
    pub cpu_info: CpuInfo,
}

/// Source of hardware samples.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> HardwareUsage;
}

/// Live metrics from the host via `sysinfo`.
pub struct SystemMetrics {
    system: Mutex<System>,
    window: Duration,
}

impl SystemMetrics {
    /// `window` is how long CPU usage is measured over.
    pub fn new(window: Duration) -> Self {
        Self {
            system: Mutex::new(System::new()),
            window: window.max(MIN_CPU_SAMPLE_WINDOW),
        }
    }
}

#[async_trait]
impl MetricsSource for SystemMetrics {
    async fn sample(&self) -> HardwareUsage {
        let mut system = self.system.lock().await;

        // CPU usage is the delta between two refreshes
        system.refresh_cpu();
        tokio::time::sleep(self.window).await;
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_info = system
            .cpus()
            .first()
            .map(|cpu| CpuInfo {
                vendor_id: cpu.vendor_id().to_string(),
                brand: cpu.brand().to_string(),
                name: cpu.name().to_string(),
                mhz: cpu.frequency(),
                cores: system.cpus().len(),
            })
            .unwrap_or_default();

        HardwareUsage {
            memory_total: system.total_memory(),
            memory_used: system.used_memory(),
            memory_free: system.free_memory(),
            cpus: system
                .cpus()
                .iter()
                .map(|cpu| f64::from(cpu.cpu_usage()))
                .collect(),
            cpu_info,
        }
    }
}

/// Result of one hardware report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Failed { failures: u32 },
}

/// Samples hardware usage and reports it on a fixed interval.
pub struct HardwareSampler {
    source: Arc<dyn MetricsSource>,
    transport: Arc<dyn Transport>,
    emitter: Emitter,
    failures: FailureCounter,
    quiet_limit: u32,
    interval: Duration,
}

impl HardwareSampler {
    /// `quiet_limit` is how many failures get reported before the sampler
    /// stops reporting them. It never stops sending.
    pub fn new(
        source: Arc<dyn MetricsSource>,
        transport: Arc<dyn Transport>,
        emitter: Emitter,
        quiet_limit: u32,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            transport,
            emitter,
            failures: FailureCounter::new(),
            quiet_limit,
            interval,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.count()
    }

    /// Take one sample and report it.
    pub async fn tick(&self) -> ReportOutcome {
        let usage = self.source.sample().await;
        self.report(&usage).await
    }

    /// Send one sample to the collector.
    pub async fn report(&self, usage: &HardwareUsage) -> ReportOutcome {
        let body = match serde_json::to_vec(usage) {
            Ok(body) => body,
            Err(e) => return self.fail(format!("Error marshalling hardware-info {}", e)),
        };

        match self.transport.send(Method::PATCH, HARDWARE_PATH, body).await {
            Ok(response) if response.is_accepted() => {
                debug!(cpus = usage.cpus.len(), "Hardware usage reported");
                ReportOutcome::Sent
            }
            Ok(response) => self.fail(format!(
                "Error transmitting hardware-info {}",
                response.describe()
            )),
            Err(e) => self.fail(format!("Error transmitting hardware-info {}", e)),
        }
    }

    fn fail(&self, diagnostic: String) -> ReportOutcome {
        let failures = self.failures.record();
        warn!(failures, "Hardware report failed");
        if failures <= self.quiet_limit {
            self.emitter.log_tagged(false, TAG_ERROR, diagnostic);
        }
        ReportOutcome::Failed { failures }
    }

    /// Sample and report forever, pausing `interval` between samples.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "Hardware sampler started");
        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
