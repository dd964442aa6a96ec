//! The process-wide pour handle.
//!
//! [`Pour`] owns the buffer, persister, emitter and background tasks of
//! one process. Build it with [`Pour::bootstrap`] as early as possible so
//! events can be captured, then call [`Pour::start`] once configuration
//! is settled to fix the run id and begin shipping.

use std::sync::Arc;

use colored::Color;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::buffer::EventBuffer;
use crate::config::Config;
use crate::emitter::Emitter;
use crate::hardware::{HardwareSampler, MetricsSource, SystemMetrics};
use crate::persist::{LocalPersister, RunId};
use crate::shipment::ShipmentLoop;
use crate::transport::{HttpTransport, Transport};

/// Handle to a running pour client.
pub struct Pour {
    config: Config,
    buffer: Arc<EventBuffer>,
    persister: Arc<LocalPersister>,
    emitter: Emitter,
    shipment: Option<Arc<ShipmentLoop>>,
    dispatcher: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pour {
    /// Create the pipeline and start dispatching events.
    ///
    /// Events emitted before [`Pour::start`] are buffered in memory and
    /// written to disk once the run id is set.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bootstrap(config: Config) -> Self {
        let buffer = Arc::new(EventBuffer::new());
        let persister = Arc::new(LocalPersister::new(config.log_path.clone()));
        let (emitter, dispatcher) = Emitter::new(buffer.clone(), persister.clone(), config.console);
        let dispatcher = tokio::spawn(dispatcher.run());

        Self {
            config,
            buffer,
            persister,
            emitter,
            shipment: None,
            dispatcher,
            tasks: Vec::new(),
        }
    }

    /// Fix the run id and start the remote tasks against the configured
    /// collector, using live host metrics.
    ///
    /// The hardware sampler shares the shipment loop's gate: it is only
    /// started when remote logs are requested and the connection settings
    /// are complete. Once started it runs independently and keeps
    /// reporting after the shipment loop has disabled itself.
    pub fn start(&mut self) {
        let remote = self.remote_transport();
        let metrics = Arc::new(SystemMetrics::new(self.config.cpu_sample_window));
        self.launch(remote, metrics);
    }

    /// Like [`Pour::start`], with the transport and metrics source supplied.
    pub fn start_with(&mut self, transport: Arc<dyn Transport>, metrics: Arc<dyn MetricsSource>) {
        let remote = self.remote_allowed().then_some(transport);
        self.launch(remote, metrics);
    }

    /// Whether configuration permits remote shipping. Reports one
    /// diagnostic when remote logs are requested but the connection
    /// settings are incomplete.
    fn remote_allowed(&self) -> bool {
        if !self.config.remote_logs {
            return false;
        }
        if !self.config.remote_ready() {
            self.emitter.log_color(
                false,
                Color::Magenta,
                "LogServer values invalid, falling back to local",
            );
            return false;
        }
        true
    }

    fn remote_transport(&self) -> Option<Arc<dyn Transport>> {
        if !self.remote_allowed() {
            return None;
        }
        match HttpTransport::new(&self.config) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(e) => {
                self.emitter.log_error(&e);
                None
            }
        }
    }

    fn launch(&mut self, remote: Option<Arc<dyn Transport>>, metrics: Arc<dyn MetricsSource>) {
        if let Err(e) = self.persister.set_run_id(RunId::now()) {
            warn!(error = %e, "Pour already started");
            return;
        }

        self.emitter.log_color(
            false,
            Color::Magenta,
            format!(
                "Log-Server configured at {}:{}",
                self.config.host, self.config.port
            ),
        );

        if let Some(transport) = remote {
            let shipment = Arc::new(ShipmentLoop::new(
                self.buffer.clone(),
                transport.clone(),
                self.emitter.clone(),
                self.config.max_log_failures,
                self.config.ship_interval,
            ));
            let sampler = Arc::new(HardwareSampler::new(
                metrics,
                transport,
                self.emitter.clone(),
                self.config.hardware_quiet_limit,
                self.config.hardware_interval,
            ));

            self.tasks.push(tokio::spawn(shipment.clone().run()));
            self.tasks.push(tokio::spawn(sampler.run()));
            self.shipment = Some(shipment);
        }

        info!(
            remote = self.shipment.is_some(),
            log_file = ?self.persister.log_file(),
            "Pour started"
        );
        self.emitter.log_color(false, Color::Green, "Pour up and running..");
    }

    /// Handle for emitting events.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Events not yet accepted by the collector.
    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn persister(&self) -> &Arc<LocalPersister> {
        &self.persister
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shipment loop, if remote shipping was started.
    pub fn shipment(&self) -> Option<&Arc<ShipmentLoop>> {
        self.shipment.as_ref()
    }

    /// True while events are still being shipped remotely.
    pub fn is_remote_enabled(&self) -> bool {
        self.shipment.as_ref().is_some_and(|s| s.is_enabled())
    }

    /// Stop the periodic tasks and wait for queued events to be delivered.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.emitter.flush().await;
        self.dispatcher.abort();
        info!("Pour stopped");
    }
}
