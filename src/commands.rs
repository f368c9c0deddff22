use crate::{emit_success, OutputMode};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use kgsync::config::{self, KgsyncConfig};
use kgsync::import::{GraphMerge, ImportOrchestrator};
use kgsync::key::{RecordKey, RecordKind};
use kgsync::storage::{BackendAdapter, Backends, Engine, SqliteStore};
use kgsync::ui::{self, is_quiet, Icons, ProgressManager, Spinner};
use kgsync::GraphLoader;

/// How many failed records are listed in text output
const MAX_LISTED_FAILURES: usize = 20;

/// Import flags that override the config
pub struct ImportFlags {
    pub reset: Option<bool>,
    pub full_reset: bool,
    pub merge: Option<String>,
    pub workers: Option<usize>,
    pub no_verify: bool,
}

pub fn run_init(config: &KgsyncConfig, path: &Path, force: bool) -> anyhow::Result<()> {
    config::write_config(path, config, force)?;

    let root = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    config::ensure_gitignore(root)?;

    let selection = config.engine_selection()?;
    if [selection.kv, selection.vector, selection.graph].contains(&Engine::Sqlite) {
        let db_path = config.database_path();
        config::ensure_db_dir(&db_path)?;
        SqliteStore::open(&db_path)?;
        ui::info("Database", &db_path.display().to_string());
    }

    ui::success(&format!("Wrote {}", path.display()));
    Ok(())
}

pub async fn run_import(
    config: &KgsyncConfig,
    source: &Path,
    flags: ImportFlags,
    output_mode: OutputMode,
) -> anyhow::Result<i32> {
    let human = output_mode.is_human() && !is_quiet();

    let mut options = config.import_options()?;
    if let Some(reset) = flags.reset {
        options.reset = reset;
    }
    if flags.full_reset {
        options.reset = true;
        options.full_reset = true;
    }
    if let Some(merge) = &flags.merge {
        options.graph_merge = merge.parse::<GraphMerge>()?;
    }
    if let Some(workers) = flags.workers {
        options.workers = workers.max(1);
    }
    if flags.no_verify {
        options.verify = false;
    }

    if human {
        ui::header("kgsync import");
        ui::info("Source", &source.display().to_string());
        ui::info("Namespace", &options.namespace);
        ui::info(
            "Storage",
            &format!(
                "kv={} vector={} graph={}",
                config.storage.kv, config.storage.vector, config.storage.graph
            ),
        );
        ui::info("Database", &config.database);
        ui::info(
            "Reset",
            &format!(
                "{}{}, graph merge {}",
                options.reset,
                if options.full_reset { " (full)" } else { "" },
                options.graph_merge.as_str()
            ),
        );
    }

    let graph = GraphLoader::new().load_file(source)?;
    if human {
        ui::section("Source");
        print!("{}", graph.stats());
    }

    let spinner = human.then(|| Spinner::new("Loading embedding provider"));
    let embedder = config.build_embedder()?;
    let dimension = embedder.warm_up().await?;
    if let Some(spinner) = &spinner {
        spinner.finish_with_message(&format!("{} ready (dimension {})", embedder.provider_name(), dimension));
    }

    let backends = config.open_backends()?;
    let mut orchestrator = ImportOrchestrator::new(options, Arc::new(embedder), backends);

    let mut progress = None;
    if human {
        let (manager, tx) = ProgressManager::new();
        orchestrator = orchestrator.with_progress(tx);
        progress = Some(manager);
    }

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after in-flight writes");
            token.cancel();
        }
    });

    let started = Instant::now();
    let result = orchestrator.import(graph).await;
    // Closes the progress channel
    drop(orchestrator);
    if let Some(manager) = &mut progress {
        match &result {
            Ok(report) => manager.finish_with_summary(started.elapsed(), report),
            Err(_) => {
                manager.join();
                manager.clear();
            }
        }
    }
    let report = result?;

    if output_mode.is_human() {
        if !is_quiet() {
            println!("{}", ui::report_table(&report));
        }
        if !report.failures.is_empty() {
            ui::section("Failed records");
            for failure in report.failures.iter().take(MAX_LISTED_FAILURES) {
                ui::failure(failure);
            }
            if report.failures.len() > MAX_LISTED_FAILURES {
                ui::summary_row("...", &format!("{} more", report.failures.len() - MAX_LISTED_FAILURES));
            }
        }
        for warning in &report.warnings {
            ui::warn(&format!("[{}] {}", warning.backend, warning.message));
        }
        if report.pruned > 0 {
            ui::summary_row("Pruned", &report.pruned.to_string());
        }
        if !is_quiet() {
            ui::timings(&report);
        }
        ui::outcome(&report);
    } else {
        emit_success(output_mode, "import", serde_json::to_value(&report)?)?;
    }

    Ok(report.exit_code())
}

pub async fn run_clean(config: &KgsyncConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    let backends = config.open_backends()?;
    let namespace = config.namespace.as_str();

    // Never clear under a running import
    let run_id = format!("clean-{}", uuid::Uuid::new_v4());
    let holder = kgsync::import::options::default_holder();
    let lease = backends
        .leases
        .acquire(namespace, &run_id, &holder, Duration::from_secs(60))
        .await?;

    let result = clear_all(&backends, namespace).await;
    backends.leases.release(&lease).await?;
    result?;

    if output_mode.is_human() {
        println!(
            "{} Cleared namespace {} from {}, {} and {}",
            Icons::DEL,
            ui::key(namespace),
            backends.kv.backend(),
            backends.vectors.backend(),
            backends.graph.backend()
        );
    } else {
        emit_success(output_mode, "clean", serde_json::json!({ "namespace": namespace }))?;
    }
    Ok(())
}

async fn clear_all(backends: &Backends, namespace: &str) -> kgsync::Result<()> {
    backends.vectors.clear(namespace).await?;
    backends.kv.clear(namespace).await?;
    backends.graph.clear(namespace).await?;
    Ok(())
}

async fn counts<A: BackendAdapter + ?Sized>(adapter: &A, namespace: &str) -> kgsync::Result<[usize; 3]> {
    let mut out = [0; 3];
    for (slot, kind) in out.iter_mut().zip(RecordKind::all()) {
        *slot = adapter.count(namespace, *kind).await?;
    }
    Ok(out)
}

pub async fn run_stats(config: &KgsyncConfig, output_mode: OutputMode) -> anyhow::Result<()> {
    let backends = config.open_backends()?;
    let namespace = config.namespace.as_str();

    let kv = counts(&*backends.kv, namespace).await?;
    let vectors = counts(&*backends.vectors, namespace).await?;
    let graph = counts(&*backends.graph, namespace).await?;
    let lease = backends.leases.current(namespace).await?;

    if output_mode.is_human() {
        ui::header(&format!("{} Namespace {}", Icons::STATS, ui::key(namespace)));
        let rows = [
            ("KV documents", kv[0].to_string()),
            ("KV entities", kv[1].to_string()),
            ("KV relations", kv[2].to_string()),
            ("Vectors", (vectors[0] + vectors[1] + vectors[2]).to_string()),
            ("Graph nodes", graph[1].to_string()),
            ("Graph edges", graph[2].to_string()),
        ];
        println!("{}", ui::stats_table(&rows));
        match lease {
            Some(lease) => ui::status(
                Icons::LOCK,
                "Held by",
                &format!("run {} ({}) until {}", lease.run_id, lease.holder, lease.expires_at),
            ),
            None => ui::status(Icons::DATABASE, "Lease", "free"),
        }
    } else {
        let data = serde_json::json!({
            "namespace": namespace,
            "kv": { "documents": kv[0], "entities": kv[1], "relations": kv[2] },
            "vector": { "documents": vectors[0], "entities": vectors[1], "relations": vectors[2] },
            "graph": { "entities": graph[1], "relations": graph[2] },
            "lease": lease,
        });
        emit_success(output_mode, "stats", data)?;
    }
    Ok(())
}

pub async fn run_status(config: &KgsyncConfig, document: &str, output_mode: OutputMode) -> anyhow::Result<()> {
    let backends = config.open_backends()?;
    let key = RecordKey::document(&config.namespace, document);

    let Some(status) = backends.kv.get_status(&key).await? else {
        anyhow::bail!("no status recorded for {}", key);
    };

    if output_mode.is_human() {
        ui::status(Icons::FILE, "Document", &ui::key(&key.to_string()));
        ui::summary_row("Status", status.status.as_str());
        ui::summary_row("Length", &status.content_length.to_string());
        ui::summary_row("Created", &status.created_at.to_rfc3339());
        ui::summary_row("Updated", &status.updated_at.to_rfc3339());
        if let Some(error) = &status.error {
            ui::summary_row("Error", error);
        }
    } else {
        emit_success(
            output_mode,
            "status",
            serde_json::json!({ "key": key, "status": status }),
        )?;
    }
    Ok(())
}
