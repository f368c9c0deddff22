//! Import orchestrator - drives one run from source file to verified storage
//!
//! Load -> (lease, reset) -> Embed -> Write documents -> Write entities ->
//! Write relations -> (prune) -> Verify. Phases never overlap; inside a
//! phase work runs on a bounded pool of `workers` futures.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use crossbeam::channel::Sender;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::embedding::Embedder;
use crate::graph::CanonicalGraph;
use crate::key::{RecordKey, RecordKind};
use crate::lease::Lease;
use crate::loader::GraphLoader;
use crate::model::{DocStatus, DocumentStatus};
use crate::retry::retry_with_backoff;
use crate::storage::{BackendAdapter, Backends, Payload, Record};
use crate::ui::progress_message::{ProgressMessage, ProgressPhase};
use crate::{Error, Result};
use super::chunk::{self, Chunk};
use super::options::{GraphMerge, ImportOptions};
use super::report::{
    ConsistencyWarning, FailureStage, ImportReport, KindCounts, PhaseTiming, RecordFailure,
};
use super::state::{RunState, WritePhase};

/// Per-chunk embedding result; `Err` carries the reason
type ChunkResult = std::result::Result<Vec<f32>, String>;

/// Vectors computed during the embedding phase
#[derive(Default)]
struct Embeddings {
    /// Fresh vectors with the hash of their text
    vectors: HashMap<RecordKey, (Vec<f32>, String)>,
    /// Chunks whose embedding failed, with the reason
    failed: HashMap<RecordKey, String>,
}

/// What happened to one record during a write phase
struct WriteOutcome {
    key: RecordKey,
    kv: bool,
    vector: bool,
    graph: bool,
    cancelled: bool,
    failures: Vec<RecordFailure>,
}

impl WriteOutcome {
    fn new(key: &RecordKey) -> Self {
        Self {
            key: key.clone(),
            kv: false,
            vector: false,
            graph: false,
            cancelled: false,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, stage: FailureStage, error: &Error, fatal: bool) {
        error!("{} write of {} failed: {}", stage, self.key, error);
        let failure = RecordFailure::new(&self.key, stage, error.to_string());
        self.failures.push(if fatal { failure.fatal() } else { failure });
    }
}

fn phase_kind(phase: WritePhase) -> RecordKind {
    match phase {
        WritePhase::Documents => RecordKind::Document,
        WritePhase::Entities => RecordKind::Entity,
        WritePhase::Relations => RecordKind::Relation,
    }
}

fn progress_phase(phase: WritePhase) -> ProgressPhase {
    match phase {
        WritePhase::Documents => ProgressPhase::Documents,
        WritePhase::Entities => ProgressPhase::Entities,
        WritePhase::Relations => ProgressPhase::Relations,
    }
}

fn timing(phase: impl Into<String>, started: Instant) -> PhaseTiming {
    PhaseTiming {
        phase: phase.into(),
        millis: started.elapsed().as_millis() as u64,
    }
}

/// Drives import runs against one set of backends
pub struct ImportOrchestrator {
    options: ImportOptions,
    embedder: Arc<Embedder>,
    backends: Backends,
    progress: Option<Sender<ProgressMessage>>,
    cancel: CancellationToken,
}

impl ImportOrchestrator {
    pub fn new(options: ImportOptions, embedder: Arc<Embedder>, backends: Backends) -> Self {
        Self {
            options,
            embedder,
            backends,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report progress on `tx`
    pub fn with_progress(mut self, tx: Sender<ProgressMessage>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Token that stops the run at the next batch or write boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import a graph description file
    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        self.run(|| GraphLoader::new().load_file(path)).await
    }

    /// Import a graph description given as JSON text
    pub async fn import_str(&self, source: &str) -> Result<ImportReport> {
        self.run(|| GraphLoader::new().load(source)).await
    }

    /// Import an already loaded graph
    pub async fn import(&self, graph: CanonicalGraph) -> Result<ImportReport> {
        self.run(move || Ok(graph)).await
    }

    /// Load errors and lease conflicts return `Err` before anything is
    /// written. Everything after that lands in the report.
    async fn run<F>(&self, load: F) -> Result<ImportReport>
    where
        F: FnOnce() -> Result<CanonicalGraph>,
    {
        let started = Instant::now();
        let namespace = self.options.namespace.as_str();
        let mut state = RunState::Idle;

        state.advance(RunState::Loading)?;
        self.emit(ProgressMessage::Started { phase: ProgressPhase::Loading, total: 1 });
        let graph = match load() {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                error!("Loading failed, nothing written: {}", e);
                return Err(e);
            }
        };
        self.emit(ProgressMessage::Finished { phase: ProgressPhase::Loading });
        let stats = graph.stats();
        info!(
            "Loaded {} entities, {} relations, {} documents",
            stats.entities, stats.relations, stats.documents
        );

        let run_id = Uuid::new_v4().to_string();
        let mut lease = self
            .backends
            .leases
            .acquire(namespace, &run_id, &self.options.holder, self.options.lease_ttl)
            .await?;
        info!("Run {} holds namespace '{}'", run_id, namespace);

        let mut report = ImportReport::new(&run_id, namespace);
        report.reset = self.options.reset;
        report.full_reset = self.options.reset && self.options.full_reset;
        report.source = KindCounts {
            documents: stats.documents,
            entities: stats.entities,
            relations: stats.relations,
        };
        report.phases.push(timing("loading", started));

        let result = self.execute(&graph, &mut state, &mut report, &mut lease).await;

        if let Err(e) = self.backends.leases.release(&lease).await {
            warn!("Could not release namespace '{}' held by run {}: {}", namespace, run_id, e);
        }

        if let Err(e) = result {
            error!("Run {} failed in state {}: {}", run_id, state, e);
            report.error = Some(e.to_string());
            if !state.is_terminal() {
                state.advance(RunState::Failed)?;
            }
        }

        report.state = state;
        report.tally();
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Run {} finished {}: {} completed, {} failed, {} warnings",
            run_id,
            report.state,
            report.completed,
            report.failed,
            report.warnings.len()
        );
        Ok(report)
    }

    async fn execute(
        &self,
        graph: &CanonicalGraph,
        state: &mut RunState,
        report: &mut ImportReport,
        lease: &mut Lease,
    ) -> Result<()> {
        let namespace = self.options.namespace.as_str();

        self.check_cancelled()?;
        if self.options.reset {
            self.reset(namespace).await?;
        }

        self.renew(lease).await?;
        state.advance(RunState::Embedding)?;
        let started = Instant::now();
        self.mark_pending(graph, report).await;
        let embeddings = self.embed(chunk::assemble(graph, namespace, &self.embedder.model_id()), report).await?;
        report.phases.push(timing("embedding", started));

        let records = chunk::records(graph, namespace);
        // Entities that did not reach the graph store
        let mut unavailable: HashSet<RecordKey> = HashSet::new();

        for phase in WritePhase::all() {
            self.check_cancelled()?;
            self.renew(lease).await?;
            state.advance(RunState::Writing(phase))?;
            let started = Instant::now();
            let kind = phase_kind(phase);

            let batch: Vec<&(RecordKey, Record)> = records.iter().filter(|(key, _)| key.kind == kind).collect();
            let outcomes = self.write_phase(phase, batch, &embeddings, &unavailable).await;

            let mut cancelled = false;
            for outcome in outcomes {
                cancelled |= outcome.cancelled;
                if outcome.kv {
                    report.written.kv.add(kind, 1);
                }
                if outcome.vector {
                    report.written.vector.add(kind, 1);
                }
                if outcome.graph {
                    report.written.graph.add(kind, 1);
                }
                // Relations need both endpoints in KV and in the graph
                if kind == RecordKind::Entity && !outcome.cancelled && !(outcome.kv && outcome.graph) {
                    unavailable.insert(outcome.key.clone());
                }
                for failure in &outcome.failures {
                    self.emit(ProgressMessage::RecordFailed(format!("{}: {}", failure.key, failure.reason)));
                }
                report.failures.extend(outcome.failures);
            }
            report.phases.push(timing(format!("writing:{}", phase.as_str()), started));

            if cancelled {
                return Err(Error::Cancelled);
            }
        }

        if self.options.graph_merge == GraphMerge::Replace {
            let keep: HashSet<RecordKey> = records
                .iter()
                .filter(|(key, _)| key.kind != RecordKind::Document)
                .map(|(key, _)| key.clone())
                .collect();
            report.pruned = self.backends.graph.prune(namespace, &keep).await?;
            info!("Pruned {} graph records absent from the source", report.pruned);
        }

        if self.options.verify {
            self.check_cancelled()?;
            self.renew(lease).await?;
            state.advance(RunState::Verifying)?;
            let started = Instant::now();
            self.verify(graph, report).await?;
            report.phases.push(timing("verifying", started));
        }

        if report.has_fatal() {
            error!("Entities missing from the KV or graph store, run marked failed");
            state.advance(RunState::Failed)?;
        } else {
            state.advance(RunState::Done)?;
        }
        Ok(())
    }

    /// Clear the vector and KV namespaces, and the graph on full reset
    async fn reset(&self, namespace: &str) -> Result<()> {
        if self.options.full_reset {
            info!("Full reset of namespace '{}' (vector, kv, graph)", namespace);
        } else {
            info!("Resetting namespace '{}' (vector, kv); graph merge is additive", namespace);
        }
        self.backends.vectors.clear(namespace).await?;
        self.backends.kv.clear(namespace).await?;
        if self.options.full_reset {
            self.backends.graph.clear(namespace).await?;
        }
        Ok(())
    }

    /// Extend the lease before a phase; losing it stops the run
    async fn renew(&self, lease: &mut Lease) -> Result<()> {
        *lease = self.backends.leases.renew(lease, self.options.lease_ttl).await?;
        debug!("Run {} holds '{}' until {}", lease.run_id, lease.namespace, lease.expires_at);
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, message: ProgressMessage) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(message);
        }
    }

    async fn write<A>(&self, adapter: &A, key: &RecordKey, payload: &Payload) -> Result<()>
    where
        A: BackendAdapter + ?Sized,
    {
        let label = format!("{} upsert {}", adapter.backend(), key);
        retry_with_backoff(&self.options.retry, &label, || adapter.upsert(key, payload)).await
    }

    async fn set_status(&self, key: &RecordKey, status: &DocumentStatus) -> Result<()> {
        let label = format!("status {} -> {}", key, status.status);
        retry_with_backoff(&self.options.retry, &label, || self.backends.kv.set_status(key, status)).await
    }

    /// Every document starts the run as `pending`
    async fn mark_pending(&self, graph: &CanonicalGraph, report: &mut ImportReport) {
        for document in graph.documents() {
            let key = document.key(&self.options.namespace);
            let status = DocumentStatus::new(DocStatus::Pending, document.content.len());
            if let Err(e) = self.set_status(&key, &status).await {
                error!("Could not mark {} pending: {}", key, e);
                report.failures.push(RecordFailure::new(&key, FailureStage::Kv, e.to_string()));
            }
        }
    }

    // ========== Embedding ==========

    async fn embed(&self, chunks: Vec<Chunk>, report: &mut ImportReport) -> Result<Embeddings> {
        let mut embeddings = Embeddings::default();

        // Vectors whose text is unchanged since they were stored are kept
        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let stored = self.backends.vectors.content_hash(&chunk.key).await?;
            if stored.as_deref() == Some(chunk.content_hash.as_str()) && self.reusable(&chunk.key).await? {
                report.reused.add(chunk.key.kind, 1);
            } else {
                pending.push(chunk);
            }
        }

        let batches: Vec<Vec<Chunk>> = pending
            .chunks(self.embedder.batch_size())
            .map(<[Chunk]>::to_vec)
            .collect();
        info!(
            "Embedding {} chunks in {} batches via {} ({} reused)",
            pending.len(),
            batches.len(),
            self.embedder.provider_name(),
            report.reused.total()
        );
        self.emit(ProgressMessage::Started { phase: ProgressPhase::Embedding, total: pending.len() });

        let embedded = AtomicUsize::new(0);
        let results = stream::iter(batches)
            .map(|batch| {
                let embedded = &embedded;
                async move {
                    if self.cancel.is_cancelled() {
                        return (batch, Err(Error::Cancelled));
                    }
                    let result = self.embed_batch(&batch).await;
                    let current = embedded.fetch_add(batch.len(), Ordering::Relaxed) + batch.len();
                    self.emit(ProgressMessage::Progress {
                        phase: ProgressPhase::Embedding,
                        current,
                        item: None,
                    });
                    (batch, result)
                }
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect::<Vec<_>>()
            .await;
        self.emit(ProgressMessage::Finished { phase: ProgressPhase::Embedding });

        let mut cancelled = false;
        for (batch, result) in results {
            match result {
                Err(Error::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
                Ok(items) => {
                    for (chunk, item) in batch.into_iter().zip(items) {
                        match item {
                            Ok(vector) => {
                                report.embedded.add(chunk.key.kind, 1);
                                embeddings.vectors.insert(chunk.key, (vector, chunk.content_hash));
                            }
                            Err(reason) => {
                                report
                                    .failures
                                    .push(RecordFailure::new(&chunk.key, FailureStage::Embedding, reason.clone()));
                                embeddings.failed.insert(chunk.key, reason);
                            }
                        }
                    }
                }
            }
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(embeddings)
    }

    /// A stored vector is reusable only at the dimension the embedder is
    /// locked to, once that is known
    async fn reusable(&self, key: &RecordKey) -> Result<bool> {
        let Some(dim) = self.embedder.dimension() else {
            return Ok(true);
        };
        let stored = self.backends.vectors.get_vector(key).await?;
        Ok(stored.is_some_and(|v| v.len() == dim))
    }

    /// Embed one batch. A failing batch is retried chunk by chunk so one bad
    /// text only fails its own record. `Err` is reserved for run-fatal errors.
    async fn embed_batch(&self, batch: &[Chunk]) -> Result<Vec<ChunkResult>> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => Ok(vectors.into_iter().map(Ok).collect()),
            Err(e @ Error::DimensionMismatch { .. }) => Err(e),
            Err(e) if batch.len() == 1 => {
                error!("Embedding of {} failed: {}", batch[0].key, e);
                Ok(vec![Err(e.to_string())])
            }
            Err(e) => {
                warn!("Batch of {} failed ({}), embedding its chunks one by one", batch.len(), e);
                let mut results = Vec::with_capacity(batch.len());
                for (chunk, text) in batch.iter().zip(texts) {
                    match self.embedder.embed_batch(std::slice::from_ref(&text)).await {
                        Ok(vectors) => results.push(
                            vectors
                                .into_iter()
                                .next()
                                .ok_or_else(|| "provider returned no vector".to_string()),
                        ),
                        Err(e @ Error::DimensionMismatch { .. }) => return Err(e),
                        Err(e) => {
                            error!("Embedding of {} failed: {}", chunk.key, e);
                            results.push(Err(e.to_string()));
                        }
                    }
                }
                Ok(results)
            }
        }
    }

    // ========== Writing ==========

    async fn write_phase(
        &self,
        phase: WritePhase,
        records: Vec<&(RecordKey, Record)>,
        embeddings: &Embeddings,
        unavailable: &HashSet<RecordKey>,
    ) -> Vec<WriteOutcome> {
        let progress = progress_phase(phase);
        info!("Writing {} {}", records.len(), phase.as_str());
        self.emit(ProgressMessage::Started { phase: progress, total: records.len() });

        let written = AtomicUsize::new(0);
        let outcomes = stream::iter(records)
            .map(|(key, record)| {
                let written = &written;
                async move {
                    let outcome = self.write_record(key, record, embeddings, unavailable).await;
                    let current = written.fetch_add(1, Ordering::Relaxed) + 1;
                    self.emit(ProgressMessage::Progress {
                        phase: progress,
                        current,
                        item: Some(key.id.clone()),
                    });
                    outcome
                }
            })
            .buffer_unordered(self.options.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        self.emit(ProgressMessage::Finished { phase: progress });
        outcomes
    }

    /// Write one record to every backend that holds its kind
    async fn write_record(
        &self,
        key: &RecordKey,
        record: &Record,
        embeddings: &Embeddings,
        unavailable: &HashSet<RecordKey>,
    ) -> WriteOutcome {
        let mut outcome = WriteOutcome::new(key);
        if self.cancel.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        if let Record::Relation(relation) = record {
            let missing: Vec<&str> = [&relation.source_id, &relation.target_id]
                .into_iter()
                .filter(|id| unavailable.contains(&RecordKey::entity(&key.namespace, id)))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                warn!("Skipping {}: endpoint unavailable ({})", key, missing.join(", "));
                outcome.failures.push(RecordFailure::new(
                    key,
                    FailureStage::Dependency,
                    format!("endpoint unavailable: {}", missing.join(", ")),
                ));
                return outcome;
            }
        }

        let content_length = match record {
            Record::Document(document) => Some(document.content.len()),
            _ => None,
        };
        if let Some(len) = content_length {
            let processing = DocumentStatus::new(DocStatus::Processing, len);
            if let Err(e) = self.set_status(key, &processing).await {
                outcome.fail(FailureStage::Kv, &e, false);
            }
        }

        let payload = match embeddings.vectors.get(key) {
            Some((vector, hash)) => Payload::with_vector(record.clone(), vector.clone(), hash.clone()),
            None => Payload::record(record.clone()),
        };

        // An entity missing from either store leaves its relations dangling
        let fatal = key.kind == RecordKind::Entity;

        match self.write(&*self.backends.kv, key, &payload).await {
            Ok(()) => outcome.kv = true,
            Err(e) => outcome.fail(FailureStage::Kv, &e, fatal),
        }

        if payload.vector.is_some() {
            match self.write(&*self.backends.vectors, key, &payload).await {
                Ok(()) => outcome.vector = true,
                Err(e) => outcome.fail(FailureStage::Vector, &e, false),
            }
        }

        if key.kind != RecordKind::Document {
            match self.write(&*self.backends.graph, key, &payload).await {
                Ok(()) => outcome.graph = true,
                Err(e) => outcome.fail(FailureStage::Graph, &e, fatal),
            }
        }

        if let Some(len) = content_length {
            let mut reasons: Vec<String> = outcome.failures.iter().map(|f| f.reason.clone()).collect();
            if let Some(reason) = embeddings.failed.get(key) {
                reasons.insert(0, reason.clone());
            }
            let status = if reasons.is_empty() {
                DocumentStatus::new(DocStatus::Completed, len)
            } else {
                DocumentStatus::failed(len, reasons.join("; "))
            };
            if let Err(e) = self.set_status(key, &status).await {
                outcome.fail(FailureStage::Kv, &e, false);
            }
        }

        debug!("Wrote {}", key);
        outcome
    }

    // ========== Verification ==========

    async fn verify(&self, graph: &CanonicalGraph, report: &mut ImportReport) -> Result<()> {
        let namespace = self.options.namespace.as_str();
        self.emit(ProgressMessage::Started { phase: ProgressPhase::Verifying, total: 3 });

        // A cleared namespace must hold exactly what this run wrote, one
        // that carries earlier records at least that much
        let kv_exact = self.options.reset;
        let graph_exact =
            (self.options.reset && self.options.full_reset) || self.options.graph_merge == GraphMerge::Replace;

        for (step, kind) in RecordKind::all().iter().copied().enumerate() {
            let kv = self.backends.kv.count(namespace, kind).await?;
            let expected = report.written.kv.get(kind);
            self.check_count(report, self.backends.kv.backend(), kind, kv, expected, kv_exact);

            let vectors = self.backends.vectors.count(namespace, kind).await?;
            let expected = report.written.vector.get(kind) + report.reused.get(kind);
            self.check_count(report, self.backends.vectors.backend(), kind, vectors, expected, kv_exact);

            if kind != RecordKind::Document {
                let nodes = self.backends.graph.count(namespace, kind).await?;
                let expected = report.written.graph.get(kind);
                self.check_count(report, self.backends.graph.backend(), kind, nodes, expected, graph_exact);
            }

            self.emit(ProgressMessage::Progress {
                phase: ProgressPhase::Verifying,
                current: step + 1,
                item: Some(kind.to_string()),
            });
        }

        for relation in graph.relations() {
            let key = relation.key(namespace);
            let in_graph = self.backends.graph.exists(&key).await?;
            let in_kv = self.backends.kv.exists(&key).await?;
            if !in_graph && !in_kv {
                continue;
            }
            for endpoint in [&relation.source_id, &relation.target_id] {
                let node = RecordKey::entity(namespace, endpoint);
                if in_graph && self.backends.graph.get_node(&node).await?.is_none() {
                    self.warn(report, self.backends.graph.backend(), format!("{} references missing node {}", key, node));
                }
                if !self.backends.kv.exists(&node).await? {
                    self.warn(report, self.backends.kv.backend(), format!("{} references missing record {}", key, node));
                }
            }
        }

        self.emit(ProgressMessage::Finished { phase: ProgressPhase::Verifying });
        Ok(())
    }

    fn check_count(
        &self,
        report: &mut ImportReport,
        backend: &str,
        kind: RecordKind,
        actual: usize,
        expected: usize,
        exact: bool,
    ) {
        let consistent = if exact { actual == expected } else { actual >= expected };
        if !consistent {
            let relation = if exact { "" } else { "at least " };
            self.warn(
                report,
                backend,
                format!("{} {} records: expected {}{}, found {}", kind, backend, relation, expected, actual),
            );
        }
    }

    fn warn(&self, report: &mut ImportReport, backend: &str, message: String) {
        warn!("Consistency: {}", message);
        self.emit(ProgressMessage::Warning(message.clone()));
        report.warnings.push(ConsistencyWarning {
            backend: backend.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::embedding::EmbeddingProvider;
    use crate::import::report::Outcome;
    use crate::lease::{LeaseStore, MemoryLeaseStore};
    use crate::model::Entity;
    use crate::retry::RetryPolicy;
    use crate::storage::{GraphEdge, GraphNode, GraphStore, KvStore, MemoryGraphStore, MemoryKvStore};

    const NS: &str = "test";
    const DIM: usize = 8;

    const ABC: &str = r#"{
        "entities": [
            { "entity_id": "A", "entity_type": "PERSON", "description": "A is the first person" },
            { "entity_id": "B", "entity_type": "PERSON", "description": "B is the second person" },
            { "entity_id": "C", "entity_type": "PLACE", "description": "C is a place" }
        ],
        "relations": [
            { "source_id": "A", "target_id": "B", "description": "A knows B" },
            { "source_id": "B", "target_id": "C", "description": "B lives in C" }
        ],
        "documents": [
            { "document_id": "d1", "content": "A met B at a conference." },
            { "document_id": "d2", "content": "B moved to C last year." },
            { "document_id": "d3", "content": "C is a quiet town." }
        ]
    }"#;

    /// Deterministic vectors from the text hash; rejects texts containing
    /// `poison`, can be switched fully off, can change dimension
    struct HashProvider {
        label: &'static str,
        dim: usize,
        calls: Mutex<usize>,
        poison: Option<String>,
        down: bool,
        shrink_after_first: bool,
    }

    impl HashProvider {
        fn new() -> Self {
            Self {
                label: "hash",
                dim: DIM,
                calls: Mutex::new(0),
                poison: None,
                down: false,
                shrink_after_first: false,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashProvider {
        fn name(&self) -> &str {
            self.label
        }

        fn dimension(&self) -> Option<usize> {
            None
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.down {
                return Err(Error::EmbeddingUnavailable("connection refused".into()));
            }
            if let Some(poison) = &self.poison {
                if texts.iter().any(|t| t.contains(poison.as_str())) {
                    return Err(Error::Embedding("input rejected".into()));
                }
            }
            let dim = if self.shrink_after_first && call > 1 { self.dim / 2 } else { self.dim };
            Ok(texts
                .iter()
                .map(|t| {
                    let hash = blake3::hash(t.as_bytes());
                    hash.as_bytes()[..dim].iter().map(|b| *b as f32 / 255.0).collect()
                })
                .collect())
        }
    }

    /// Graph store whose upserts of one key always fail
    struct FailingGraph {
        inner: MemoryGraphStore,
        fail_on: RecordKey,
    }

    #[async_trait]
    impl BackendAdapter for FailingGraph {
        fn backend(&self) -> &str {
            "failing-graph"
        }

        async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
            if key == &self.fail_on {
                return Err(Error::backend_write(self.backend(), key, "constraint violation", false));
            }
            self.inner.upsert(key, payload).await
        }

        async fn exists(&self, key: &RecordKey) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn clear(&self, namespace: &str) -> Result<()> {
            self.inner.clear(namespace).await
        }

        async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
            self.inner.count(namespace, kind).await
        }
    }

    #[async_trait]
    impl GraphStore for FailingGraph {
        async fn get_node(&self, key: &RecordKey) -> Result<Option<GraphNode>> {
            self.inner.get_node(key).await
        }

        async fn get_edge(&self, namespace: &str, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>> {
            self.inner.get_edge(namespace, source_id, target_id).await
        }

        async fn prune(&self, namespace: &str, keep: &HashSet<RecordKey>) -> Result<usize> {
            self.inner.prune(namespace, keep).await
        }
    }

    /// KV store whose upserts of one key always fail
    struct FailingKv {
        inner: MemoryKvStore,
        fail_on: RecordKey,
    }

    #[async_trait]
    impl BackendAdapter for FailingKv {
        fn backend(&self) -> &str {
            "failing-kv"
        }

        async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
            if key == &self.fail_on {
                return Err(Error::backend_write(self.backend(), key, "disk quota exceeded", false));
            }
            self.inner.upsert(key, payload).await
        }

        async fn exists(&self, key: &RecordKey) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn clear(&self, namespace: &str) -> Result<()> {
            self.inner.clear(namespace).await
        }

        async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
            self.inner.count(namespace, kind).await
        }
    }

    #[async_trait]
    impl KvStore for FailingKv {
        async fn get(&self, key: &RecordKey) -> Result<Option<serde_json::Value>> {
            self.inner.get(key).await
        }

        async fn set_status(&self, key: &RecordKey, status: &DocumentStatus) -> Result<()> {
            self.inner.set_status(key, status).await
        }

        async fn get_status(&self, key: &RecordKey) -> Result<Option<DocumentStatus>> {
            self.inner.get_status(key).await
        }
    }

    /// Lease registry that counts renewals and can lose the namespace on
    /// the n-th one
    #[derive(Default)]
    struct TrackedLeases {
        inner: MemoryLeaseStore,
        renewals: Mutex<usize>,
        lost_at: Option<usize>,
    }

    #[async_trait]
    impl LeaseStore for TrackedLeases {
        async fn acquire(&self, namespace: &str, run_id: &str, holder: &str, ttl: Duration) -> Result<Lease> {
            self.inner.acquire(namespace, run_id, holder, ttl).await
        }

        async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
            let n = {
                let mut renewals = self.renewals.lock().unwrap();
                *renewals += 1;
                *renewals
            };
            if self.lost_at == Some(n) {
                return Err(Error::RunInProgress {
                    namespace: lease.namespace.clone(),
                    holder: "intruder (someone)".to_string(),
                });
            }
            self.inner.renew(lease, ttl).await
        }

        async fn release(&self, lease: &Lease) -> Result<()> {
            self.inner.release(lease).await
        }

        async fn current(&self, namespace: &str) -> Result<Option<Lease>> {
            self.inner.current(namespace).await
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    fn options() -> ImportOptions {
        ImportOptions {
            namespace: NS.to_string(),
            retry: fast_retry(),
            ..ImportOptions::default()
        }
    }

    fn orchestrator(backends: &Backends, provider: Arc<HashProvider>, options: ImportOptions) -> ImportOrchestrator {
        let embedder = Arc::new(Embedder::new(provider, 2, fast_retry()));
        ImportOrchestrator::new(options, embedder, backends.clone())
    }

    async fn count<A: BackendAdapter + ?Sized>(adapter: &A, kind: RecordKind) -> usize {
        adapter.count(NS, kind).await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_abc() {
        let backends = Backends::memory();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.outcome(), Outcome::Success);
        assert_eq!(count(&*backends.kv, RecordKind::Entity).await, 3);
        assert_eq!(count(&*backends.kv, RecordKind::Relation).await, 2);
        assert_eq!(count(&*backends.graph, RecordKind::Entity).await, 3);
        assert_eq!(count(&*backends.graph, RecordKind::Relation).await, 2);
        assert_eq!(report.embedded.documents, 3);
        assert_eq!(report.embedded.total(), 8);
        assert!(report.warnings.is_empty());

        let status = backends.kv.get_status(&RecordKey::document(NS, "d1")).await.unwrap().unwrap();
        assert_eq!(status.status, DocStatus::Completed);
        assert!(backends.graph.get_edge(NS, "A", "B").await.unwrap().is_some());
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reimport_with_reset_is_idempotent() {
        let backends = Backends::memory();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let first = importer.import_str(ABC).await.unwrap();
        let second = importer.import_str(ABC).await.unwrap();

        assert_eq!(first.written, second.written);
        for kind in RecordKind::all() {
            assert_eq!(count(&*backends.kv, *kind).await, first.source.get(*kind));
            assert_eq!(count(&*backends.vectors, *kind).await, first.source.get(*kind));
        }
        assert_eq!(count(&*backends.graph, RecordKind::Entity).await, 3);
        assert_eq!(second.state, RunState::Done);
    }

    #[tokio::test]
    async fn test_single_bad_chunk_is_isolated() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider {
            poison: Some("second person".to_string()),
            ..HashProvider::new()
        });
        let importer = orchestrator(&backends, provider, options());

        let report = importer.import_str(ABC).await.unwrap();

        let bad = RecordKey::entity(NS, "B");
        assert_eq!(report.failed_keys().into_iter().collect::<Vec<_>>(), vec![&bad]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 7);
        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.exit_code(), 2);

        // Still in KV and graph, only the vector is missing
        assert!(backends.kv.exists(&bad).await.unwrap());
        assert!(backends.graph.exists(&bad).await.unwrap());
        assert!(!backends.vectors.exists(&bad).await.unwrap());
        assert_eq!(count(&*backends.graph, RecordKind::Relation).await, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_vectors_but_not_graph() {
        let backends = Backends::memory();
        let stale = Entity::new("Z", "OLD", "stale vector from an older model");
        backends
            .vectors
            .upsert(
                &stale.key(NS),
                &Payload::with_vector(Record::Entity(stale.clone()), vec![0.5; DIM], "old".into()),
            )
            .await
            .unwrap();
        let prior = Entity::new("G", "PERSON", "only in the graph");
        backends
            .graph
            .upsert(&prior.key(NS), &Payload::record(Record::Entity(prior.clone())))
            .await
            .unwrap();

        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());
        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert!(!backends.vectors.exists(&stale.key(NS)).await.unwrap());
        assert!(backends.graph.exists(&prior.key(NS)).await.unwrap());
        assert_eq!(count(&*backends.graph, RecordKind::Entity).await, 4);
    }

    #[tokio::test]
    async fn test_full_reset_clears_graph() {
        let backends = Backends::memory();
        let prior = Entity::new("G", "PERSON", "only in the graph");
        backends
            .graph
            .upsert(&prior.key(NS), &Payload::record(Record::Entity(prior.clone())))
            .await
            .unwrap();

        let importer = orchestrator(
            &backends,
            Arc::new(HashProvider::new()),
            ImportOptions { full_reset: true, ..options() },
        );
        let report = importer.import_str(ABC).await.unwrap();

        assert!(report.full_reset);
        assert!(!backends.graph.exists(&prior.key(NS)).await.unwrap());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_reference_writes_nothing() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider::new());
        let importer = orchestrator(&backends, provider.clone(), options());
        let source = r#"{
            "entities": [{ "entity_id": "A", "description": "a" }],
            "relations": [{ "source_id": "A", "target_id": "X" }]
        }"#;

        let err = importer.import_str(source).await.unwrap_err();

        assert!(matches!(err, Error::Parse(ref msg) if msg.contains("dangling relation reference")));
        for kind in RecordKind::all() {
            assert_eq!(count(&*backends.kv, *kind).await, 0);
            assert_eq!(count(&*backends.vectors, *kind).await, 0);
            assert_eq!(count(&*backends.graph, *kind).await, 0);
        }
        assert_eq!(provider.calls(), 0);
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_run_on_held_namespace_is_rejected() {
        let backends = Backends::memory();
        backends
            .leases
            .acquire(NS, "other-run", "someone", Duration::from_secs(60))
            .await
            .unwrap();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let err = importer.import_str(ABC).await.unwrap_err();

        assert!(matches!(err, Error::RunInProgress { .. }));
        assert_eq!(count(&*backends.kv, RecordKind::Entity).await, 0);
        assert_eq!(backends.leases.current(NS).await.unwrap().unwrap().run_id, "other-run");
    }

    #[tokio::test]
    async fn test_entity_missing_from_graph_fails_run() {
        let mut backends = Backends::memory();
        backends.graph = Arc::new(FailingGraph {
            inner: MemoryGraphStore::default(),
            fail_on: RecordKey::entity(NS, "A"),
        });
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.exit_code(), 1);
        let entity = report.failures_for(&RecordKey::entity(NS, "A"));
        assert!(entity.iter().any(|f| f.fatal && f.stage == FailureStage::Graph));

        let skipped = report.failures_for(&RecordKey::relation(NS, "A", "B", true));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].stage, FailureStage::Dependency);
        assert!(skipped[0].reason.contains("endpoint unavailable"));
        // The unrelated relation still lands
        assert!(backends.graph.get_edge(NS, "B", "C").await.unwrap().is_some());
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entity_missing_from_kv_skips_its_relations() {
        let mut backends = Backends::memory();
        backends.kv = Arc::new(FailingKv {
            inner: MemoryKvStore::default(),
            fail_on: RecordKey::entity(NS, "A"),
        });
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        let entity = report.failures_for(&RecordKey::entity(NS, "A"));
        assert!(entity.iter().any(|f| f.fatal && f.stage == FailureStage::Kv));

        let ab = RecordKey::relation(NS, "A", "B", true);
        let skipped = report.failures_for(&ab);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].stage, FailureStage::Dependency);
        assert!(!backends.kv.exists(&ab).await.unwrap());
        assert!(backends.graph.get_edge(NS, "A", "B").await.unwrap().is_none());
        assert!(backends.graph.get_edge(NS, "B", "C").await.unwrap().is_some());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_verify_flags_relation_endpoint_missing_from_kv() {
        let backends = Backends::memory();
        let graph = GraphLoader::new().load(ABC).unwrap();
        let relation = graph.get_relation("A", "B").unwrap().clone();
        backends
            .kv
            .upsert(&relation.key(NS), &Payload::record(Record::Relation(relation)))
            .await
            .unwrap();
        let importer = orchestrator(
            &backends,
            Arc::new(HashProvider::new()),
            ImportOptions { reset: false, ..options() },
        );

        let mut report = ImportReport::new("run", NS);
        importer.verify(&graph, &mut report).await.unwrap();

        assert!(report
            .warnings
            .iter()
            .any(|w| w.backend == "memory-kv" && w.message.contains("missing record kg://test/entity/A")));
    }

    #[tokio::test]
    async fn test_provider_down_marks_records_failed() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider { down: true, ..HashProvider::new() });
        let importer = orchestrator(&backends, provider, options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.failed, 8);
        assert_eq!(report.embedded.total(), 0);
        assert_eq!(count(&*backends.kv, RecordKind::Entity).await, 3);
        assert_eq!(count(&*backends.vectors, RecordKind::Entity).await, 0);

        let status = backends.kv.get_status(&RecordKey::document(NS, "d2")).await.unwrap().unwrap();
        assert_eq!(status.status, DocStatus::Failed);
        assert!(status.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_run() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider {
            shrink_after_first: true,
            ..HashProvider::new()
        });
        let importer = orchestrator(&backends, provider, options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert!(report.error.unwrap().contains("dimension mismatch"));
        assert_eq!(count(&*backends.kv, RecordKind::Entity).await, 0);
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unchanged_text_reuses_vectors() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider::new());
        let importer = orchestrator(&backends, provider.clone(), ImportOptions { reset: false, ..options() });

        importer.import_str(ABC).await.unwrap();
        let calls = provider.calls();
        let second = importer.import_str(ABC).await.unwrap();

        assert_eq!(provider.calls(), calls);
        assert_eq!(second.embedded.total(), 0);
        assert_eq!(second.reused.total(), 8);
        assert_eq!(second.state, RunState::Done);
        assert!(second.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_model_change_re_embeds_unchanged_text() {
        let backends = Backends::memory();
        let small = Arc::new(HashProvider { label: "small", dim: DIM / 2, ..HashProvider::new() });
        orchestrator(&backends, small, ImportOptions { reset: false, ..options() })
            .import_str(ABC)
            .await
            .unwrap();

        let large = Arc::new(HashProvider { label: "large", ..HashProvider::new() });
        let report = orchestrator(&backends, large, ImportOptions { reset: false, ..options() })
            .import_str(ABC)
            .await
            .unwrap();

        assert_eq!(report.reused.total(), 0);
        assert_eq!(report.embedded.total(), 8);
        let vector = backends.vectors.get_vector(&RecordKey::entity(NS, "A")).await.unwrap().unwrap();
        assert_eq!(vector.len(), DIM);
    }

    #[tokio::test]
    async fn test_vectors_of_another_dimension_are_not_reused() {
        let backends = Backends::memory();
        let small = Arc::new(HashProvider { dim: DIM / 2, ..HashProvider::new() });
        orchestrator(&backends, small, ImportOptions { reset: false, ..options() })
            .import_str(ABC)
            .await
            .unwrap();

        // Same provider name, but the first embedding locks a larger dimension
        let embedder = Arc::new(Embedder::new(Arc::new(HashProvider::new()), 2, fast_retry()));
        assert_eq!(embedder.warm_up().await.unwrap(), DIM);
        let importer = ImportOrchestrator::new(ImportOptions { reset: false, ..options() }, embedder, backends.clone());
        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.reused.total(), 0);
        assert_eq!(report.state, RunState::Done);
        for kind in RecordKind::all() {
            assert_eq!(count(&*backends.vectors, *kind).await, report.source.get(*kind));
        }
        let vector = backends.vectors.get_vector(&RecordKey::document(NS, "d1")).await.unwrap().unwrap();
        assert_eq!(vector.len(), DIM);
    }

    #[tokio::test]
    async fn test_lease_is_renewed_between_phases() {
        let mut backends = Backends::memory();
        let leases = Arc::new(TrackedLeases::default());
        backends.leases = leases.clone();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        // Embedding, three write phases, verification
        assert_eq!(*leases.renewals.lock().unwrap(), 5);
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_when_lease_is_lost() {
        let mut backends = Backends::memory();
        // Third renewal precedes the entity phase
        backends.leases = Arc::new(TrackedLeases { lost_at: Some(3), ..TrackedLeases::default() });
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert!(report.error.as_deref().unwrap().contains("intruder"));
        assert_eq!(count(&*backends.kv, RecordKind::Document).await, 3);
        assert_eq!(count(&*backends.kv, RecordKind::Entity).await, 0);
        assert_eq!(count(&*backends.graph, RecordKind::Entity).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_and_releases_lease() {
        let backends = Backends::memory();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());
        importer.cancellation_token().cancel();

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.error.as_deref(), Some("Import cancelled"));
        assert!(backends.leases.current(NS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_policy_prunes_graph() {
        let backends = Backends::memory();
        let provider = Arc::new(HashProvider::new());
        orchestrator(&backends, provider.clone(), options())
            .import_str(ABC)
            .await
            .unwrap();

        let smaller = r#"{
            "entities": [
                { "entity_id": "A", "description": "A is the first person" },
                { "entity_id": "B", "description": "B is the second person" }
            ],
            "relations": [{ "source_id": "A", "target_id": "B", "description": "A knows B" }]
        }"#;
        let replace = ImportOptions { graph_merge: GraphMerge::Replace, ..options() };
        let report = orchestrator(&backends, provider, replace)
            .import_str(smaller)
            .await
            .unwrap();

        assert_eq!(report.pruned, 2);
        assert_eq!(report.state, RunState::Done);
        assert!(!backends.graph.exists(&RecordKey::entity(NS, "C")).await.unwrap());
        assert!(backends.graph.get_edge(NS, "B", "C").await.unwrap().is_none());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_cover_phases() {
        let backends = Backends::memory();
        let (tx, rx) = crossbeam::channel::unbounded();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options()).with_progress(tx);

        importer.import_str(ABC).await.unwrap();
        drop(importer);

        let finished: Vec<ProgressPhase> = rx
            .iter()
            .filter_map(|m| match m {
                ProgressMessage::Finished { phase } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            finished,
            vec![
                ProgressPhase::Loading,
                ProgressPhase::Embedding,
                ProgressPhase::Documents,
                ProgressPhase::Entities,
                ProgressPhase::Relations,
                ProgressPhase::Verifying,
            ]
        );
    }

    #[tokio::test]
    async fn test_import_into_sqlite_backends() {
        let dir = tempfile::tempdir().unwrap();
        let backends = Backends::open(Default::default(), &dir.path().join("kg.db")).unwrap();
        let importer = orchestrator(&backends, Arc::new(HashProvider::new()), options());

        let report = importer.import_str(ABC).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert!(report.warnings.is_empty());
        assert_eq!(count(&*backends.graph, RecordKind::Relation).await, 2);
        let hits = backends
            .vectors
            .search(NS, backends.vectors.get_vector(&RecordKey::entity(NS, "C")).await.unwrap().unwrap().as_slice(), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].key, RecordKey::entity(NS, "C"));
    }
}
