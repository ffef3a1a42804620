mod args;
mod client;
mod codec;
mod database;
mod memory;
mod metrics;
mod properties;
mod spongebase;
mod store;
mod workload;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::client::{Client, Record, Status};
use crate::database::Database;
use crate::memory::MemoryStore;
use crate::metrics::{ConcurrentMetrics, Metrics, OpKind, OpSummary};
use crate::properties::Properties;
use crate::spongebase::SpongebaseClient;
use crate::workload::{
    build_key, build_update, build_values, load_order, KeyChooser, KeySequence, Operation,
    Workload, WorkloadConfig,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let runtime = configure_runtime(&args)?;
    let workload = Workload::new(args.workload);
    let props = build_properties(&args, &workload)?;
    let config = create_workload_config(&args);

    let report = runtime.block_on(run(&args, &props, &config, &workload))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn configure_runtime(args: &Args) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.worker_threads(args.worker_threads.max(1));
    builder.enable_all();
    builder.build().context("failed to build tokio runtime")
}

/// Layer workload defaults, the property file and `-p` overrides.
fn build_properties(args: &Args, workload: &Workload) -> Result<Properties> {
    let mut props = workload.properties();
    props.insert("table", args.table.clone());
    props.insert("recordcount", args.record_count.to_string());
    props.insert("operationcount", args.operation_count.to_string());
    props.insert("fieldcount", args.field_count.to_string());
    props.insert("fieldlength", args.field_length.to_string());

    if let Some(path) = &args.property_file {
        props.extend(Properties::load(path)?);
    }
    for (key, value) in &args.properties {
        props.insert(key.clone(), value.clone());
    }
    Ok(props)
}

fn create_workload_config(args: &Args) -> WorkloadConfig {
    WorkloadConfig {
        table: args.table.clone(),
        record_count: args.record_count,
        operation_count: args.operation_count,
        field_count: args.field_count,
        field_length: args.field_length,
        max_scan_length: args.max_scan_length.max(1),
        load_pattern: args.load_pattern,
    }
}

async fn run(
    args: &Args,
    props: &Properties,
    config: &WorkloadConfig,
    workload: &Workload,
) -> Result<Report> {
    match args.database {
        Database::Spongebase => {
            for (key, value) in props.iter() {
                debug!(key, value, "property");
            }
            let client = SpongebaseClient::<MemoryStore>::new(props)
                .context("failed to initialize Spongebase client")?;
            let store = client.store();
            info!(
                bucket = store.bucket(),
                endpoints = store.endpoints().len(),
                nodes = store.nodes(),
                persist_to = ?client.config().persist_to,
                replicate_to = ?client.config().replicate_to,
                "connected to in-process cluster"
            );
            run_bench(client, config, workload, args.num_clients, args.delete_after).await
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    started_at: String,
    workload: Workload,
    record_count: u32,
    operation_count: u32,
    num_clients: u32,
    load_seconds: f64,
    run_seconds: f64,
    run_throughput: f64,
    load: Vec<OpSummary>,
    run: Vec<OpSummary>,
    cleanup: Vec<OpSummary>,
    #[serde(skip)]
    load_metrics: Metrics,
    #[serde(skip)]
    run_metrics: Metrics,
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nLoad Phase ({:.2} s)", self.load_seconds)?;
        write!(f, "{}", self.load_metrics)?;
        writeln!(
            f,
            "\nRun Phase: Workload {:?} ({:.2} s, {:.2} ops/sec)",
            self.workload.workload_type, self.run_seconds, self.run_throughput
        )?;
        write!(f, "{}", self.run_metrics)?;
        writeln!(
            f,
            "Total Operations: {} ({} errors)",
            self.run_metrics.total_operations(),
            self.run_metrics.total_errors()
        )
    }
}

async fn run_bench<C: Client + Clone + 'static>(
    client: C,
    config: &WorkloadConfig,
    workload: &Workload,
    num_clients: u32,
    delete_after: bool,
) -> Result<Report> {
    let num_clients = num_clients.max(1);
    let started_at = chrono::Utc::now().to_rfc3339();

    info!(
        records = config.record_count,
        pattern = ?config.load_pattern,
        clients = num_clients,
        "loading initial dataset"
    );
    let load_start = Instant::now();
    let load_metrics = run_load_phase(&client, config, num_clients).await?;
    let load_seconds = load_start.elapsed().as_secs_f64();
    if load_metrics.total_errors() > 0 {
        warn!(errors = load_metrics.total_errors(), "some inserts failed during load");
    }

    info!(
        workload = ?workload.workload_type,
        operations = config.operation_count,
        "running workload"
    );
    let keys = Arc::new(KeySequence::new(config.record_count as u64));
    let run_start = Instant::now();
    let run_metrics =
        run_transaction_phase(&client, config, workload, num_clients, keys.clone()).await?;
    let run_seconds = run_start.elapsed().as_secs_f64();

    let mut cleanup = Vec::new();
    if delete_after {
        let total = keys.issued();
        info!(records = total, "deleting records");
        let metrics = ConcurrentMetrics::default();
        for index in 0..total {
            let start = Instant::now();
            let status = client.delete(&config.table, &build_key(index)).await;
            metrics.record(OpKind::Delete, start.elapsed(), status).await;
        }
        cleanup = metrics.get_metrics().await.summaries();
    }

    client.cleanup().await;
    info!("benchmark complete");

    let run_throughput = if run_seconds > 0.0 {
        run_metrics.total_operations() as f64 / run_seconds
    } else {
        0.0
    };

    Ok(Report {
        started_at,
        workload: workload.clone(),
        record_count: config.record_count,
        operation_count: config.operation_count,
        num_clients,
        load_seconds,
        run_seconds,
        run_throughput,
        load: load_metrics.summaries(),
        run: run_metrics.summaries(),
        cleanup,
        load_metrics,
        run_metrics,
    })
}

/// Split `total` into `parts` shares that differ by at most one.
fn split_evenly(total: u64, parts: u32) -> Vec<u64> {
    let parts = parts.max(1) as u64;
    (0..parts)
        .map(|i| total / parts + u64::from(i < total % parts))
        .collect()
}

async fn run_load_phase<C: Client + Clone + 'static>(
    client: &C,
    config: &WorkloadConfig,
    num_clients: u32,
) -> Result<Metrics> {
    let metrics = ConcurrentMetrics::default();
    let order = load_order(config.record_count, config.load_pattern);

    let mut handles = Vec::new();
    let mut offset = 0usize;
    for share in split_evenly(order.len() as u64, num_clients) {
        let chunk: Vec<u64> = order[offset..offset + share as usize].to_vec();
        offset += share as usize;

        let client = client.clone();
        let metrics = metrics.clone();
        let table = config.table.clone();
        let field_count = config.field_count;
        let field_length = config.field_length;

        handles.push(task::spawn(async move {
            let mut local = Metrics::default();
            for index in chunk {
                let values = build_values(field_count, field_length);
                let start = Instant::now();
                let status = client.insert(&table, &build_key(index), &values).await;
                local.record(OpKind::Insert, start.elapsed(), status);
            }
            metrics.merge(local).await;
        }));
    }

    for handle in handles {
        handle.await?;
    }
    Ok(metrics.get_metrics().await)
}

async fn run_transaction_phase<C: Client + Clone + 'static>(
    client: &C,
    config: &WorkloadConfig,
    workload: &Workload,
    num_clients: u32,
    keys: Arc<KeySequence>,
) -> Result<Metrics> {
    let metrics = ConcurrentMetrics::default();
    let chooser = Arc::new(KeyChooser::new(workload.distribution, config.record_count)?);

    let mut handles = Vec::new();
    for (client_id, ops) in split_evenly(config.operation_count as u64, num_clients)
        .into_iter()
        .enumerate()
    {
        let client = client.clone();
        let metrics = metrics.clone();
        let chooser = chooser.clone();
        let keys = keys.clone();
        let config = config.clone();
        let mix = workload.mix;

        handles.push(task::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut local = Metrics::default();
            for i in 0..ops {
                if i > 0 && i % 10_000 == 0 {
                    info!(client = client_id, done = i, total = ops, "progress");
                }
                let op = mix.choose(rng.gen::<f64>());
                let (kind, elapsed, status) =
                    execute(&client, &config, op, &chooser, &keys, &mut rng).await;
                local.record(kind, elapsed, status);
            }
            metrics.merge(local).await;
        }));
    }

    for handle in handles {
        handle.await?;
    }
    Ok(metrics.get_metrics().await)
}

async fn execute<C: Client>(
    client: &C,
    config: &WorkloadConfig,
    op: Operation,
    chooser: &KeyChooser,
    keys: &KeySequence,
    rng: &mut StdRng,
) -> (OpKind, Duration, Status) {
    let table = config.table.as_str();
    let existing = chooser.next(rng, keys.acknowledged());
    let key = build_key(existing);
    let all_fields: Option<&HashSet<String>> = None;

    match op {
        Operation::Read => {
            let mut result = Record::new();
            let start = Instant::now();
            let status = client.read(table, &key, all_fields, &mut result).await;
            (OpKind::Read, start.elapsed(), status)
        }
        Operation::Update => {
            let values = build_update(config.field_count, config.field_length);
            let start = Instant::now();
            let status = client.update(table, &key, &values).await;
            (OpKind::Update, start.elapsed(), status)
        }
        Operation::Insert => {
            let index = keys.reserve();
            let values = build_values(config.field_count, config.field_length);
            let start = Instant::now();
            let status = client.insert(table, &build_key(index), &values).await;
            let elapsed = start.elapsed();
            keys.acknowledge(index);
            (OpKind::Insert, elapsed, status)
        }
        Operation::Scan => {
            let len = rng.gen_range(1..=config.max_scan_length);
            let mut result = Vec::new();
            let start = Instant::now();
            let status = client.scan(table, &key, len, all_fields, &mut result).await;
            (OpKind::Scan, start.elapsed(), status)
        }
        Operation::ReadModifyWrite => {
            let values = build_update(config.field_count, config.field_length);
            let mut result = Record::new();
            let start = Instant::now();
            let status = match client.read(table, &key, all_fields, &mut result).await {
                Status::Ok => client.update(table, &key, &values).await,
                Status::Error => Status::Error,
            };
            (OpKind::ReadModifyWrite, start.elapsed(), status)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::workload::WorkloadType;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("spongebase-bench").chain(argv.iter().copied()))
            .unwrap()
    }

    fn small_config(record_count: u32, operation_count: u32) -> WorkloadConfig {
        WorkloadConfig {
            table: "usertable".to_string(),
            record_count,
            operation_count,
            field_count: 4,
            field_length: 16,
            max_scan_length: 10,
            load_pattern: workload::LoadPattern::Random,
        }
    }

    fn memory_client(pairs: &[(&str, &str)]) -> SpongebaseClient<MemoryStore> {
        let props: Properties = pairs.iter().copied().collect();
        SpongebaseClient::new(&props).unwrap()
    }

    #[test]
    fn should_split_work_evenly() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(split_evenly(5, 0), vec![5]);
    }

    #[test]
    fn should_layer_cli_properties_over_workload_defaults() {
        // given
        let args = parse(&["--workload", "e", "-p", "scanproportion=0", "-p", "spongebase.json=false"]);

        // when
        let props = build_properties(&args, &Workload::new(args.workload)).unwrap();

        // then
        assert_eq!(props.get("scanproportion"), Some("0"));
        assert_eq!(props.get("insertproportion"), Some("0.05"));
        assert_eq!(props.get("spongebase.json"), Some("false"));
        assert_eq!(props.get("table"), Some("usertable"));
    }

    #[test]
    fn should_refuse_scan_workload_at_init() {
        let args = parse(&["--workload", "e"]);
        let props = build_properties(&args, &Workload::new(args.workload)).unwrap();

        let result = SpongebaseClient::<MemoryStore>::new(&props);

        assert!(matches!(result, Err(spongebase::Error::ScanUnsupported)));
    }

    #[tokio::test]
    async fn should_run_update_heavy_workload_without_errors() {
        // given
        let client = memory_client(&[]);
        let config = small_config(50, 200);
        let workload = Workload::new(WorkloadType::A);

        // when
        let report = run_bench(client.clone(), &config, &workload, 4, false)
            .await
            .unwrap();

        // then
        assert_eq!(report.load_metrics.total_operations(), 50);
        assert_eq!(report.load_metrics.total_errors(), 0);
        assert_eq!(report.run_metrics.total_operations(), 200);
        assert_eq!(report.run_metrics.total_errors(), 0);
        assert!(report.cleanup.is_empty());
        assert!(serde_json::to_string(&report).unwrap().contains("\"run\""));
    }

    #[tokio::test]
    async fn should_insert_new_keys_and_delete_everything_after() {
        // given
        let client = memory_client(&[]);
        let config = small_config(20, 100);
        let workload = Workload::new(WorkloadType::D);

        // when
        let report = run_bench(client.clone(), &config, &workload, 2, true)
            .await
            .unwrap();

        // then
        assert_eq!(report.run_metrics.total_errors(), 0);
        let deletes = &report.cleanup[0];
        assert_eq!(deletes.operation, OpKind::Delete);
        assert_eq!(deletes.errors, 0);
        assert!(deletes.count >= 20);
        assert_eq!(client.store().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_only_read_inserted_keys_under_parallel_inserts() {
        // given
        let client = memory_client(&[]);
        let mut config = small_config(1, 20_000);
        config.field_count = 10;
        config.field_length = 100;
        let workload = Workload::new(WorkloadType::D);

        // when
        let report = run_bench(client, &config, &workload, 8, false)
            .await
            .unwrap();

        // then
        let reads = report
            .run
            .iter()
            .find(|s| s.operation == OpKind::Read)
            .unwrap();
        assert!(reads.count > 0);
        assert_eq!(reads.errors, 0);
        assert_eq!(report.run_metrics.total_errors(), 0);
    }

    #[test]
    fn should_place_property_file_between_defaults_and_overrides() {
        // given
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# tuned run\nscanproportion=0.5\nfieldcount=3\nspongebase.json=false"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = parse(&[
            "--workload",
            "e",
            "--property-file",
            path.as_str(),
            "-p",
            "spongebase.json=true",
        ]);

        // when
        let props = build_properties(&args, &Workload::new(args.workload)).unwrap();

        // then
        assert_eq!(props.get("scanproportion"), Some("0.5"));
        assert_eq!(props.get("fieldcount"), Some("3"));
        assert_eq!(props.get("spongebase.json"), Some("true"));
        assert_eq!(props.get("insertproportion"), Some("0.05"));
    }

    #[test]
    fn should_fail_on_missing_property_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.properties");
        let args = parse(&["--property-file", path.to_str().unwrap()]);

        assert!(build_properties(&args, &Workload::new(args.workload)).is_err());
    }

    #[tokio::test]
    async fn should_run_read_modify_write_workload() {
        let client = memory_client(&[("spongebase.persistTo", "1"), ("spongebase.replicateTo", "1")]);
        let config = small_config(10, 50);

        let report = run_bench(client, &config, &Workload::new(WorkloadType::F), 1, false)
            .await
            .unwrap();

        assert_eq!(report.run_metrics.total_operations(), 50);
        assert_eq!(report.run_metrics.total_errors(), 0);
    }
}
