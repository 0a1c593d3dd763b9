//! Batching writer
//!
//! ```text
//!  Tracer::finish ──export()──►  unbounded mpsc  ──►  background task
//!  (sync, never blocks)                                 │ buffer: Vec<FinishedSpan>
//!                                                       │
//!        flush when: buffer ≥ max_batch_spans ──────────┤
//!                    interval tick ─────────────────────┤
//!                    flush(done) / flush_and_wait() ────┤
//!                                                       ▼
//!                                       encode ──► Transport::send
//!                                                       │
//!                             failure: error! + count, batch dropped
//! ```
//!
//! Flush completion callbacks always run, also when delivery failed or the
//! writer has already shut down.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::encoder::{encode, Metadata, Payload};
use super::transport::{HttpTransport, Transport};
use crate::config::Config;
use crate::error::ExportError;
use crate::metrics::{EXPORT_BATCHES, EXPORT_BUFFERED_SPANS, EXPORT_SPANS_DROPPED};
use crate::span::{FinishedSpan, FlushCallback, SpanSink};

/// Batching knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub flush_interval: Duration,
    pub max_batch_spans: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(2000),
            max_batch_spans: 1000,
        }
    }
}

impl WriterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            max_batch_spans: config.max_batch_spans.max(1),
        }
    }
}

enum Command {
    Export(FinishedSpan),
    Flush(Option<FlushCallback>),
    FlushAndNotify(oneshot::Sender<Result<(), ExportError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle on the background export task
pub struct Writer {
    tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// Start the background task on the current Tokio runtime
    pub fn spawn(
        transport: Arc<dyn Transport>,
        metadata: Metadata,
        options: WriterOptions,
    ) -> Result<Self, ExportError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ExportError::Closed)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = handle.spawn(run(rx, transport, metadata, options));
        info!(
            flush_interval_ms = options.flush_interval.as_millis() as u64,
            max_batch_spans = options.max_batch_spans,
            "Span writer started"
        );
        Ok(Self {
            tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Writer posting to the intake configured in `config`
    pub fn from_config(config: &Config) -> Result<Self, ExportError> {
        let transport = HttpTransport::from_config(config)?;
        Self::spawn(
            Arc::new(transport),
            Metadata::new(config.service.clone(), config.env.clone()),
            WriterOptions::from_config(config),
        )
    }

    /// Queue a finished span; never blocks
    pub fn export(&self, span: FinishedSpan) {
        if self.tx.send(Command::Export(span)).is_err() {
            EXPORT_SPANS_DROPPED.inc();
            debug!("Writer closed, span dropped");
        }
    }

    /// Request a flush; `done` runs once it completed
    pub fn flush(&self, done: Option<FlushCallback>) {
        if let Err(mpsc::error::SendError(command)) = self.tx.send(Command::Flush(done)) {
            if let Command::Flush(Some(done)) = command {
                done();
            }
        }
    }

    /// Flush and wait for delivery of everything queued so far
    pub async fn flush_and_wait(&self) -> Result<(), ExportError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::FlushAndNotify(tx))
            .map_err(|_| ExportError::Closed)?;
        rx.await.map_err(|_| ExportError::Closed)?
    }

    /// Flush what is buffered and stop the background task
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Span writer task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl SpanSink for Writer {
    fn export(&self, span: FinishedSpan) {
        Writer::export(self, span);
    }

    fn flush(&self, done: Option<FlushCallback>) {
        Writer::flush(self, done);
    }
}

struct Batcher {
    transport: Arc<dyn Transport>,
    metadata: Metadata,
    buffer: Vec<FinishedSpan>,
}

impl Batcher {
    fn push(&mut self, span: FinishedSpan) {
        self.buffer.push(span);
        EXPORT_BUFFERED_SPANS.set(self.buffer.len() as f64);
    }

    async fn flush(&mut self) -> Result<(), ExportError> {
        if self.buffer.is_empty() {
            EXPORT_BATCHES.with_label_values(&["empty"]).inc();
            return Ok(());
        }
        let spans = std::mem::take(&mut self.buffer);
        EXPORT_BUFFERED_SPANS.set(0.0);

        let result = match encode(&Payload::new(self.metadata.clone(), &spans)) {
            Ok(body) => self.transport.send(body).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                EXPORT_BATCHES.with_label_values(&["sent"]).inc();
                debug!(spans = spans.len(), "Batch delivered");
            }
            Err(e) => {
                EXPORT_BATCHES.with_label_values(&["failed"]).inc();
                EXPORT_SPANS_DROPPED.inc_by(spans.len() as u64);
                error!(spans = spans.len(), error = %e, "Failed to deliver batch, dropping it");
            }
        }
        result
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn Transport>,
    metadata: Metadata,
    options: WriterOptions,
) {
    let mut batcher = Batcher {
        transport,
        metadata,
        buffer: Vec::new(),
    };
    let mut ticker = tokio::time::interval(options.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Export(span)) => {
                    batcher.push(span);
                    if batcher.buffer.len() >= options.max_batch_spans {
                        let _ = batcher.flush().await;
                    }
                }
                Some(Command::Flush(done)) => {
                    let _ = batcher.flush().await;
                    if let Some(done) = done {
                        done();
                    }
                }
                Some(Command::FlushAndNotify(reply)) => {
                    let _ = reply.send(batcher.flush().await);
                }
                Some(Command::Shutdown(reply)) => {
                    let _ = batcher.flush().await;
                    let _ = reply.send(());
                    break;
                }
                None => {
                    let _ = batcher.flush().await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batcher.buffer.is_empty() {
                    let _ = batcher.flush().await;
                }
            }
        }
    }

    // Commands queued behind a shutdown: spans are lost, callbacks still run
    rx.close();
    while let Ok(command) = rx.try_recv() {
        match command {
            Command::Export(_) => EXPORT_SPANS_DROPPED.inc(),
            Command::Flush(Some(done)) => done(),
            Command::Flush(None) => {}
            Command::FlushAndNotify(reply) => {
                let _ = reply.send(Err(ExportError::Closed));
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("Span writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::encoder::decode;
    use crate::exporter::transport::RecordingTransport;
    use crate::span::{Role, SpanId, Tags, TraceId};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn span(id: u64) -> FinishedSpan {
        FinishedSpan {
            trace_id: TraceId(1),
            span_id: SpanId(id),
            parent_id: None,
            name: "mocha.test".to_string(),
            resource: format!("a.test.{}", id),
            service: "svc".to_string(),
            role: Role::Test,
            tags: Tags::new(),
            start_ns: 10,
            finish_ns: 20,
        }
    }

    fn writer(transport: &Arc<RecordingTransport>, options: WriterOptions) -> Writer {
        Writer::spawn(transport.clone(), Metadata::new("svc", None), options).unwrap()
    }

    fn slow_interval(max_batch_spans: usize) -> WriterOptions {
        WriterOptions {
            flush_interval: Duration::from_secs(3600),
            max_batch_spans,
        }
    }

    async fn wait_for_bodies(transport: &RecordingTransport, count: usize) -> Vec<Vec<u8>> {
        for _ in 0..200 {
            let bodies = transport.bodies();
            if bodies.len() >= count {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        transport.bodies()
    }

    #[tokio::test]
    async fn test_explicit_flush_sends_one_batch() {
        let transport = RecordingTransport::new();
        let writer = writer(&transport, slow_interval(100));
        for id in 1..=3 {
            writer.export(span(id));
        }
        writer.flush_and_wait().await.unwrap();

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        let payload = decode(&bodies[0]).unwrap();
        assert_eq!(payload.events.len(), 3);
        assert_eq!(payload.spans()[2], span(3));
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_flush() {
        let transport = RecordingTransport::new();
        let writer = writer(&transport, slow_interval(2));
        writer.export(span(1));
        writer.export(span(2));
        writer.export(span(3));

        let bodies = wait_for_bodies(&transport, 1).await;
        assert_eq!(decode(&bodies[0]).unwrap().events.len(), 2);
        writer.shutdown().await;
        assert_eq!(transport.bodies().len(), 2);
    }

    #[tokio::test]
    async fn test_interval_triggers_flush() {
        let transport = RecordingTransport::new();
        let writer = writer(
            &transport,
            WriterOptions {
                flush_interval: Duration::from_millis(20),
                max_batch_spans: 100,
            },
        );
        writer.export(span(1));
        assert_eq!(wait_for_bodies(&transport, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_and_writer_recovers() {
        let transport = RecordingTransport::new();
        let writer = writer(&transport, slow_interval(100));
        transport.fail_next(1);

        writer.export(span(1));
        assert!(matches!(writer.flush_and_wait().await, Err(ExportError::Transport(_))));

        writer.export(span(2));
        writer.flush_and_wait().await.unwrap();
        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(decode(&bodies[0]).unwrap().spans(), vec![span(2)]);
    }

    #[tokio::test]
    async fn test_callbacks_run_even_after_shutdown() {
        let transport = RecordingTransport::new();
        let writer = writer(&transport, slow_interval(100));

        let (tx, rx) = oneshot::channel();
        writer.flush(Some(Box::new(move || {
            let _ = tx.send(());
        })));
        rx.await.unwrap();

        writer.shutdown().await;
        assert!(writer.is_closed());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        writer.flush(Some(Box::new(move || flag.store(true, Ordering::SeqCst))));
        assert!(ran.load(Ordering::SeqCst));
        writer.export(span(9));
        assert!(matches!(writer.flush_and_wait().await, Err(ExportError::Closed)));
    }

    #[tokio::test]
    async fn test_empty_flush_is_counted() {
        let transport = RecordingTransport::new();
        let writer = writer(&transport, slow_interval(100));
        let empty = || EXPORT_BATCHES.with_label_values(&["empty"]).get();

        let before = empty();
        writer.flush_and_wait().await.unwrap();
        assert!(empty() >= before + 1.0);
        assert!(transport.bodies().is_empty());
        writer.shutdown().await;
    }
}
