//! Periodic shipment of buffered events to the collector.
//!
//! Each tick POSTs a snapshot of the [`EventBuffer`] as a JSON array. A
//! `202 Accepted` drains the snapshot from the buffer; anything else keeps
//! it for the next tick and counts a failure. Past the failure ceiling,
//! remote shipment is switched off for the rest of the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::EventBuffer;
use crate::emitter::Emitter;
use crate::failure::FailureCounter;
use crate::tag::TAG_ERROR;
use crate::transport::{Transport, LOGS_PATH};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Remote shipment is off; nothing was attempted
    Disabled,

    /// Buffer was empty; nothing was sent
    Empty,

    /// The collector accepted this many events
    Shipped(usize),

    /// The attempt failed; the buffer is kept
    Failed { failures: u32 },

    /// The attempt failed and pushed the count past the ceiling
    Tripped { failures: u32 },
}

/// Ships the event buffer on a fixed interval.
pub struct ShipmentLoop {
    buffer: Arc<EventBuffer>,
    transport: Arc<dyn Transport>,
    emitter: Emitter,
    failures: FailureCounter,
    enabled: AtomicBool,
    ceiling: u32,
    interval: Duration,
}

impl ShipmentLoop {
    /// Create an enabled shipment loop.
    ///
    /// `ceiling` is the number of failures tolerated; the next one
    /// disables shipment.
    pub fn new(
        buffer: Arc<EventBuffer>,
        transport: Arc<dyn Transport>,
        emitter: Emitter,
        ceiling: u32,
        interval: Duration,
    ) -> Self {
        Self {
            buffer,
            transport,
            emitter,
            failures: FailureCounter::new(),
            enabled: AtomicBool::new(true),
            ceiling,
            interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Failed attempts so far.
    pub fn failures(&self) -> u32 {
        self.failures.count()
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Attempt one shipment.
    pub async fn tick(&self) -> TickOutcome {
        if !self.is_enabled() {
            return TickOutcome::Disabled;
        }
        if self.buffer.is_empty() {
            return TickOutcome::Empty;
        }

        let snapshot = self.buffer.snapshot();
        let body = match serde_json::to_vec(&snapshot) {
            Ok(body) => body,
            Err(e) => return self.fail(format!("Error marshalling logs {}", e)),
        };

        debug!(events = snapshot.len(), "Shipping buffered events");

        match self.transport.send(Method::POST, LOGS_PATH, body).await {
            Ok(response) if response.is_accepted() => {
                let shipped = self.buffer.drain_shipped(snapshot.len());
                debug!(shipped, "Collector accepted events");
                TickOutcome::Shipped(shipped)
            }
            Ok(response) => {
                warn!(status = response.status.as_u16(), "Collector rejected events");
                self.fail(format!("Error logging {}", response.describe()))
            }
            Err(e) => {
                warn!(error = %e, "Failed to reach collector");
                self.fail(format!("Error transmitting logs {}", e))
            }
        }
    }

    /// Count a failure and report it, or disable once past the ceiling.
    fn fail(&self, diagnostic: String) -> TickOutcome {
        let failures = self.failures.record();

        if failures > self.ceiling {
            self.disable();
            return TickOutcome::Tripped { failures };
        }

        self.emitter.log_tagged(false, TAG_ERROR, diagnostic);
        TickOutcome::Failed { failures }
    }

    /// Switch remote shipment off. Reports it exactly once.
    fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            warn!(
                failures = self.failures(),
                ceiling = self.ceiling,
                "Disabling remote log shipment"
            );
            self.emitter.log_tagged(
                false,
                TAG_ERROR,
                format!(
                    "unsuccessfully re-tried remote logging {} times, disabling remote..",
                    self.ceiling
                ),
            );
        }
    }

    /// Tick every interval until shipment is disabled.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Shipment loop started");

        loop {
            ticker.tick().await;
            if self.tick().await == TickOutcome::Disabled {
                break;
            }
        }

        info!("Shipment loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogEvent;
    use crate::persist::LocalPersister;
    use crate::tag::Tag;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers every request with a fixed status and records the bodies.
    struct StubTransport {
        status: Option<StatusCode>,
        calls: AtomicUsize,
        bodies: Mutex<Vec<serde_json::Value>>,
        // Appended to the buffer while the request is in flight
        during_send: Option<Arc<EventBuffer>>,
    }

    impl StubTransport {
        fn answering(status: StatusCode) -> Self {
            Self {
                status: Some(status),
                calls: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
                during_send: None,
            }
        }

        fn unreachable() -> Self {
            Self {
                status: None,
                ..Self::answering(StatusCode::OK)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(
            &self,
            method: Method,
            path: &str,
            body: Vec<u8>,
        ) -> Result<TransportResponse, TransportError> {
            assert_eq!(method, Method::POST);
            assert_eq!(path, "/logs");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&body).unwrap());

            if let Some(buffer) = &self.during_send {
                buffer.append(LogEvent::new("late arrival", None, None));
            }

            match self.status {
                Some(status) => Ok(TransportResponse {
                    status,
                    body: "nope".to_string(),
                }),
                None => Err(TransportError::Timeout),
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        buffer: Arc<EventBuffer>,
        emitter: Emitter,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(EventBuffer::new());
        let persister = Arc::new(LocalPersister::new(dir.path()));
        let (emitter, dispatcher) = Emitter::new(buffer.clone(), persister, false);
        tokio::spawn(dispatcher.run());
        Harness {
            _dir: dir,
            buffer,
            emitter,
        }
    }

    fn shipment(h: &Harness, transport: Arc<StubTransport>, ceiling: u32) -> ShipmentLoop {
        ShipmentLoop::new(
            h.buffer.clone(),
            transport,
            h.emitter.clone(),
            ceiling,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_empty_buffer_sends_nothing() {
        let h = harness();
        let transport = Arc::new(StubTransport::answering(StatusCode::ACCEPTED));
        let shipment = shipment(&h, transport.clone(), 10);

        assert_eq!(shipment.tick().await, TickOutcome::Empty);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_accepted_shipment_clears_buffer() {
        let h = harness();
        let transport = Arc::new(StubTransport::answering(StatusCode::ACCEPTED));
        let shipment = shipment(&h, transport.clone(), 10);

        h.buffer.append(LogEvent::new("a", Some(Tag::Success), None));
        h.buffer.append(LogEvent::new("b", None, None));

        assert_eq!(shipment.tick().await, TickOutcome::Shipped(2));
        assert!(h.buffer.is_empty());
        assert_eq!(transport.calls(), 1);

        let bodies = transport.bodies.lock().unwrap();
        let sent = bodies[0].as_array().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["log"], "a");
        assert_eq!(sent[0]["tag"]["name"], "Success");
        assert_eq!(sent[1]["log"], "b");
    }

    #[tokio::test]
    async fn test_events_appended_in_flight_are_kept() {
        let h = harness();
        let transport = Arc::new(StubTransport {
            during_send: Some(h.buffer.clone()),
            ..StubTransport::answering(StatusCode::ACCEPTED)
        });
        let shipment = shipment(&h, transport.clone(), 10);

        h.buffer.append(LogEvent::new("first", None, None));

        assert_eq!(shipment.tick().await, TickOutcome::Shipped(1));
        let left = h.buffer.snapshot();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message(), "late arrival");
    }

    #[tokio::test]
    async fn test_rejected_shipment_keeps_buffer_and_reports() {
        let h = harness();
        let transport = Arc::new(StubTransport::answering(StatusCode::OK));
        let shipment = shipment(&h, transport.clone(), 10);

        h.buffer.append(LogEvent::new("kept", None, None));

        assert_eq!(shipment.tick().await, TickOutcome::Failed { failures: 1 });
        h.emitter.flush().await;

        let events = h.buffer.snapshot();
        assert_eq!(events[0].message(), "kept");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].tag(), Some(Tag::Error));
        assert!(events[1].message().ends_with("Error logging nope"));
    }

    #[tokio::test]
    async fn test_transport_error_counts_as_failure() {
        let h = harness();
        let transport = Arc::new(StubTransport::unreachable());
        let shipment = shipment(&h, transport.clone(), 10);

        h.buffer.append(LogEvent::new("kept", None, None));

        assert_eq!(shipment.tick().await, TickOutcome::Failed { failures: 1 });
        assert_eq!(shipment.tick().await, TickOutcome::Failed { failures: 2 });
        assert_eq!(shipment.failures(), 2);
        assert!(shipment.is_enabled());
    }

    #[tokio::test]
    async fn test_ceiling_disables_shipment_for_good() {
        let h = harness();
        let transport = Arc::new(StubTransport::answering(StatusCode::INTERNAL_SERVER_ERROR));
        let shipment = shipment(&h, transport.clone(), 10);

        h.buffer.append(LogEvent::new("never shipped", None, None));

        for expected in 1..=10 {
            assert_eq!(
                shipment.tick().await,
                TickOutcome::Failed { failures: expected }
            );
        }
        assert_eq!(shipment.tick().await, TickOutcome::Tripped { failures: 11 });
        assert!(!shipment.is_enabled());
        assert_eq!(transport.calls(), 11);

        for _ in 0..5 {
            assert_eq!(shipment.tick().await, TickOutcome::Disabled);
        }
        assert_eq!(transport.calls(), 11);
        assert_eq!(shipment.failures(), 11);

        // Original event, ten diagnostics and one terminal report
        h.emitter.flush().await;
        let events = h.buffer.snapshot();
        assert_eq!(events.len(), 12);
        assert_eq!(events[0].message(), "never shipped");
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| e.message().contains("disabling remote"))
            .collect();
        assert_eq!(terminal.len(), 1);
    }

    #[tokio::test]
    async fn test_success_does_not_reset_failures() {
        let h = harness();
        let failing = Arc::new(StubTransport::unreachable());
        let shipment = shipment(&h, failing, 10);

        h.buffer.append(LogEvent::new("x", None, None));
        shipment.tick().await;
        assert_eq!(shipment.failures(), 1);

        let ok = ShipmentLoop {
            transport: Arc::new(StubTransport::answering(StatusCode::ACCEPTED)),
            ..shipment
        };
        assert!(matches!(ok.tick().await, TickOutcome::Shipped(_)));
        assert_eq!(ok.failures(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_once_disabled() {
        let h = harness();
        let transport = Arc::new(StubTransport::unreachable());
        let shipment = Arc::new(shipment(&h, transport.clone(), 2));

        h.buffer.append(LogEvent::new("x", None, None));

        let handle = tokio::spawn(shipment.clone().run());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop after tripping")
            .unwrap();

        assert!(!shipment.is_enabled());
        assert_eq!(transport.calls(), 3);
    }
}
