use std::path::PathBuf;

use crate::database::Database;
use crate::properties::Properties;
use crate::workload::LoadPattern;
use crate::workload::WorkloadType;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(term_width = 0)]
pub struct Args {
    /// The database to benchmark
    #[arg(short, long, default_value = "spongebase")]
    pub database: Database,

    /// YCSB core workload
    #[arg(long, default_value = "a")]
    pub workload: WorkloadType,

    /// Table name used to namespace keys
    #[arg(long, default_value = "usertable")]
    pub table: String,

    /// Number of records to load initially
    #[arg(long, default_value = "1000")]
    pub record_count: u32,

    /// Number of operations to perform
    #[arg(long, default_value = "1000")]
    pub operation_count: u32,

    /// Number of fields per record
    #[arg(long, default_value = "10")]
    pub field_count: u32,

    /// Length of each field value
    #[arg(long, default_value = "100")]
    pub field_length: usize,

    /// Maximum number of records per scan
    #[arg(long, default_value = "100")]
    pub max_scan_length: usize,

    /// Number of concurrent clients
    #[arg(long, default_value = "1")]
    pub num_clients: u32,

    /// Pattern for loading initial data (sequential or random)
    #[arg(long, default_value = "sequential")]
    pub load_pattern: LoadPattern,

    /// Delete every loaded record after the run phase
    #[arg(long)]
    pub delete_after: bool,

    /// Print the final report as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Tokio worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    pub worker_threads: usize,

    /// Properties file read before any -p overrides
    #[arg(long)]
    pub property_file: Option<PathBuf>,

    /// Client property, e.g. -p spongebase.persistTo=1 (repeatable)
    #[arg(short = 'p', long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    Properties::parse_assignment(s).map_err(|e| e.to_string())
}
