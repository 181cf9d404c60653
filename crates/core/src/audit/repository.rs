use super::chain::{self, ChainVerification, GENESIS_HASH};
use super::event::AuditEvent;
use super::traits::{AuditBackend, AuditFilter, BackendHealth};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{error, warn};

struct WriteRequest {
    event: AuditEvent,
    reply: oneshot::Sender<Result<AuditEvent>>,
}

/// Where `AuditBackendCore` persists each linked event, beyond the in-memory
/// snapshot every backend keeps regardless. The in-memory backend uses a
/// no-op sink; the file backend appends a line per §6.2.
#[async_trait]
trait PersistSink: Send + Sync {
    async fn append(&self, line: &str) -> Result<()>;
}

struct NullSink;

#[async_trait]
impl PersistSink for NullSink {
    async fn append(&self, _line: &str) -> Result<()> {
        Ok(())
    }
}

struct FileSink {
    file: Mutex<tokio::fs::File>,
}

#[async_trait]
impl PersistSink for FileSink {
    async fn append(&self, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// The single logical writer described in §5: every append is funneled
/// through an unbounded mpsc channel to one background task, which is the
/// only place that reads the chain's tail hash and links the next event.
/// Readers go through `snapshot`, a separate lock the writer task updates
/// after each successful append, so reads never block on the writer.
struct AuditBackendCore {
    tx: mpsc::UnboundedSender<WriteRequest>,
    snapshot: Arc<RwLock<Vec<AuditEvent>>>,
}

impl AuditBackendCore {
    fn spawn(initial_events: Vec<AuditEvent>, persist: Arc<dyn PersistSink>) -> Self {
        let snapshot = Arc::new(RwLock::new(initial_events.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
        let writer_snapshot = snapshot.clone();

        tokio::spawn(async move {
            let mut tail_hash = initial_events
                .last()
                .map(|e| e.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.clone());

            while let Some(request) = rx.recv().await {
                let mut event = request.event;
                let linked = chain::link(&mut event, tail_hash.clone()).map(|_| event);

                let outcome = match linked {
                    Ok(event) => {
                        let line = match chain::to_persisted_line(&event) {
                            Ok(line) => line,
                            Err(e) => {
                                let _ = request.reply.send(Err(e));
                                continue;
                            }
                        };
                        if let Err(e) = persist.append(&line).await {
                            error!(error = %e, "audit persistence sink failed; event not durable");
                            let _ = request.reply.send(Err(e));
                            continue;
                        }
                        tail_hash = event.hash.clone();
                        writer_snapshot.write().await.push(event.clone());
                        Ok(event)
                    }
                    Err(e) => Err(e),
                };
                let _ = request.reply.send(outcome);
            }
        });

        Self { tx, snapshot }
    }

    async fn store_event(&self, event: AuditEvent) -> Result<AuditEvent> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest { event, reply: reply_tx })
            .map_err(|_| Error::internal("audit writer task is no longer running"))?;
        reply_rx
            .await
            .map_err(|_| Error::internal("audit writer task dropped the append request"))?
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let events = self.snapshot.read().await;
        let mut matched: Vec<AuditEvent> = events
            .iter()
            .rev()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();

        let offset = filter.offset.unwrap_or(0) as usize;
        if offset > 0 {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        let events = self.snapshot.read().await;
        Ok(events.iter().filter(|e| matches_filter(e, filter)).count() as u64)
    }

    async fn verify(&self, from_index: Option<usize>, to_index: Option<usize>) -> Result<ChainVerification> {
        let events = self.snapshot.read().await;
        let from = from_index.unwrap_or(0);
        let to = to_index.unwrap_or(events.len()).min(events.len());
        if from >= to {
            return Ok(ChainVerification {
                ok: true,
                first_break_index: None,
            });
        }
        let expected_prev = if from == 0 {
            GENESIS_HASH.clone()
        } else {
            events[from - 1].hash.clone()
        };
        let mut result = chain::verify_chain(&events[from..to], &expected_prev)?;
        if let Some(idx) = result.first_break_index {
            result.first_break_index = Some(idx + from);
        }
        Ok(result)
    }

    async fn health_check(&self) -> Result<BackendHealth> {
        let events = self.snapshot.read().await;
        Ok(BackendHealth {
            is_healthy: true,
            message: None,
            last_write: events.last().map(|e| e.timestamp),
            events_stored: events.len() as u64,
        })
    }
}

fn matches_filter(event: &AuditEvent, filter: &AuditFilter) -> bool {
    if let Some(start) = filter.start_time {
        if event.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_time {
        if event.timestamp > end {
            return false;
        }
    }
    if let Some(ref actor_id) = filter.actor_id {
        if event.actor_id.as_deref() != Some(actor_id.as_str()) {
            return false;
        }
    }
    if let Some(ref workflow_id) = filter.workflow_id {
        if event.workflow_id.as_deref() != Some(workflow_id.as_str()) {
            return false;
        }
    }
    if let Some(ref entity_id) = filter.entity_id {
        if event.entity_id.as_deref() != Some(entity_id.as_str()) {
            return false;
        }
    }
    if let Some(ref types) = filter.event_types {
        if !types.iter().any(|t| t == &event.event_type.to_string()) {
            return false;
        }
    }
    if let Some(ref severities) = filter.severities {
        if !severities.iter().any(|s| s == &event.severity.to_string()) {
            return false;
        }
    }
    if let Some(ref results) = filter.results {
        if !results.iter().any(|r| r == &event.result.to_string()) {
            return false;
        }
    }
    true
}

/// Purely in-memory audit backend. Suitable as the sole backend in tests and
/// as a fronting cache layered under [`FileAuditBackend`] in the composite.
pub struct InMemoryAuditBackend(AuditBackendCore);

impl InMemoryAuditBackend {
    pub fn new() -> Self {
        Self(AuditBackendCore::spawn(Vec::new(), Arc::new(NullSink)))
    }
}

impl Default for InMemoryAuditBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditBackend for InMemoryAuditBackend {
    async fn store_event(&self, event: AuditEvent) -> Result<AuditEvent> {
        self.0.store_event(event).await
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        self.0.retrieve_events(filter).await
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        self.0.count_events(filter).await
    }

    async fn verify(&self, from_index: Option<usize>, to_index: Option<usize>) -> Result<ChainVerification> {
        self.0.verify(from_index, to_index).await
    }

    async fn health_check(&self) -> Result<BackendHealth> {
        self.0.health_check().await
    }
}

/// Audit backend persisted as line-delimited canonical records (§6.2), one
/// event per line with `hash` trailing. Existing lines are replayed into the
/// in-memory snapshot at startup so queries and `verify` never touch disk.
pub struct FileAuditBackend {
    core: AuditBackendCore,
    path: PathBuf,
}

impl FileAuditBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = Self::load_existing(&path).await?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let core = AuditBackendCore::spawn(existing, Arc::new(FileSink { file: Mutex::new(file) }));
        Ok(Self { core, path })
    }

    async fn load_existing(path: &Path) -> Result<Vec<AuditEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = tokio::fs::read_to_string(path).await?;
        let mut events = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(line).map_err(|e| {
                Error::internal(format!("corrupt audit log at line {}: {}", line_no + 1, e))
            })?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditBackend for FileAuditBackend {
    async fn store_event(&self, event: AuditEvent) -> Result<AuditEvent> {
        self.core.store_event(event).await
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        self.core.retrieve_events(filter).await
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        self.core.count_events(filter).await
    }

    async fn verify(&self, from_index: Option<usize>, to_index: Option<usize>) -> Result<ChainVerification> {
        self.core.verify(from_index, to_index).await
    }

    async fn health_check(&self) -> Result<BackendHealth> {
        self.core.health_check().await
    }
}

/// Fans writes out across multiple backends while treating exactly one as
/// authoritative. The hash chain itself only ever lives on the primary;
/// secondary backends receive the already-linked event for redundancy and
/// their failures are logged, not propagated.
pub struct AuditRepository {
    backends: Vec<Box<dyn AuditBackend>>,
    primary_backend: usize,
}

impl AuditRepository {
    pub fn new(primary: Box<dyn AuditBackend>) -> Self {
        Self {
            backends: vec![primary],
            primary_backend: 0,
        }
    }

    pub fn with_secondary(mut self, backend: Box<dyn AuditBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    fn primary(&self) -> &dyn AuditBackend {
        self.backends[self.primary_backend].as_ref()
    }
}

#[async_trait]
impl AuditBackend for AuditRepository {
    async fn store_event(&self, event: AuditEvent) -> Result<AuditEvent> {
        let stored = self.primary().store_event(event).await?;

        for (idx, backend) in self.backends.iter().enumerate() {
            if idx == self.primary_backend {
                continue;
            }
            if let Err(e) = backend.store_event(stored.clone()).await {
                warn!(backend_index = idx, error = %e, "secondary audit backend write failed");
            }
        }

        Ok(stored)
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        self.primary().retrieve_events(filter).await
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        self.primary().count_events(filter).await
    }

    async fn verify(&self, from_index: Option<usize>, to_index: Option<usize>) -> Result<ChainVerification> {
        self.primary().verify(from_index, to_index).await
    }

    async fn health_check(&self) -> Result<BackendHealth> {
        self.primary().health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventType;

    fn event(action: &str) -> AuditEvent {
        AuditEvent::builder(EventType::StateTransition, action, "test transition").build()
    }

    #[tokio::test]
    async fn append_chains_sequential_events() {
        let backend = InMemoryAuditBackend::new();
        let first = backend.store_event(event("one")).await.unwrap();
        let second = backend.store_event(event("two")).await.unwrap();

        assert_eq!(first.prev_hash, *GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);

        let verification = backend.verify(None, None).await.unwrap();
        assert!(verification.ok);
    }

    #[tokio::test]
    async fn retrieve_events_respects_limit_and_recency_order() {
        let backend = InMemoryAuditBackend::new();
        for i in 0..5 {
            backend.store_event(event(&format!("action-{i}"))).await.unwrap();
        }

        let filter = AuditFilter::builder().limit(2).build();
        let events = backend.retrieve_events(&filter).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "action-4");
        assert_eq!(events[1].action, "action-3");
    }

    #[tokio::test]
    async fn file_backend_persists_and_reloads() {
        let dir = std::env::temp_dir().join(format!("occam-audit-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("audit.jsonl");

        {
            let backend = FileAuditBackend::open(&path).await.unwrap();
            backend.store_event(event("persisted")).await.unwrap();
        }

        let reopened = FileAuditBackend::open(&path).await.unwrap();
        let count = reopened.count_events(&AuditFilter::default()).await.unwrap();
        assert_eq!(count, 1);
        let verification = reopened.verify(None, None).await.unwrap();
        assert!(verification.ok);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn secondary_backend_receives_fan_out_writes() {
        let primary = InMemoryAuditBackend::new();
        let secondary = InMemoryAuditBackend::new();
        let repo = AuditRepository::new(Box::new(primary)).with_secondary(Box::new(secondary));

        repo.store_event(event("fan-out")).await.unwrap();
        let count = repo.count_events(&AuditFilter::default()).await.unwrap();
        assert_eq!(count, 1);
    }
}
