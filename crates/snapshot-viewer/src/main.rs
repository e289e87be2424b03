use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use common::pretty::{self, TableStyleKind};
use serde::Serialize;
use snapshot::{SnapshotFileReader, SnapshotHeader};
use statemachine::{SnapshotMeta, Snapshotter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "manifest.json";

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let reports = collect_reports(&args.path)
        .with_context(|| format!("failed to inspect {}", args.path.display()))?;

    if reports.is_empty() {
        println!("No snapshots found.");
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => {
            let style: TableStyleKind = args.style.into();
            println!("{}", render_reports(&reports, style));
            for report in reports.iter().filter(|r| !r.files.is_empty()) {
                println!();
                println!("External files of snapshot {}:", report.index);
                println!("{}", render_files(&report.files, style));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "snapshot-viewer")]
#[command(about = "Inspect replicated state machine snapshots", long_about = None)]
struct Args {
    /// A snapshot store, a single snapshot directory, or a raw data file
    path: PathBuf,
    /// Output format (table or json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Style used for table rendering
    #[arg(long, value_enum, default_value_t = CliTableStyle::Modern)]
    style: CliTableStyle,
    /// Log each file as it is inspected
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliTableStyle {
    Modern,
    Ascii,
    Plain,
}

impl From<CliTableStyle> for TableStyleKind {
    fn from(value: CliTableStyle) -> Self {
        match value {
            CliTableStyle::Modern => TableStyleKind::Modern,
            CliTableStyle::Ascii => TableStyleKind::Ascii,
            CliTableStyle::Plain => TableStyleKind::Plain,
        }
    }
}

/// Everything known about one snapshot data file.
#[derive(Debug, Serialize)]
struct SnapshotReport {
    path: PathBuf,
    group: Option<String>,
    replica: Option<String>,
    index: u64,
    kind: String,
    version: u16,
    payload_len: u64,
    payload_checksum: u32,
    files: Vec<FileReport>,
    /// `None` when the payload verified, the failure otherwise.
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct FileReport {
    file_id: u64,
    name: String,
    size: Option<u64>,
    metadata: String,
}

fn collect_reports(path: &Path) -> Result<Vec<SnapshotReport>> {
    if path.is_file() {
        return Ok(vec![inspect_data_file(path)?]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }
    if path.join(MANIFEST_FILE).is_file() {
        return Ok(vec![inspect_snapshot_dir(path)?]);
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    let mut reports = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match inspect_snapshot_dir(&dir) {
            Ok(report) => reports.push(report),
            Err(err) => warn!(dir = %dir.display(), error = %err, "Skipping unreadable snapshot"),
        }
    }
    reports.sort_by_key(|r| r.index);
    Ok(reports)
}

fn inspect_snapshot_dir(dir: &Path) -> Result<SnapshotReport> {
    let meta = Snapshotter::load(dir)?;
    debug!(dir = %dir.display(), index = meta.index, "Loaded manifest");

    let mut report = inspect_data_file(&meta.data_path())?;
    report.group = Some(meta.group_id.to_string());
    report.replica = Some(meta.replica_id.to_string());
    if report.error.is_none() {
        report.error = manifest_mismatch(&meta, &report);
    }
    report.files = meta
        .files
        .iter()
        .map(|f| FileReport {
            file_id: f.file_id,
            name: f.name.clone(),
            size: fs::metadata(dir.join(&f.name)).ok().map(|m| m.len()),
            metadata: pretty::format_bytes(&f.metadata, 24),
        })
        .collect();
    Ok(report)
}

fn manifest_mismatch(meta: &SnapshotMeta, report: &SnapshotReport) -> Option<String> {
    if meta.index != report.index {
        Some(format!("manifest index {} differs from header", meta.index))
    } else if meta.payload_checksum != report.payload_checksum {
        Some("manifest checksum differs from header".into())
    } else if meta.kind.to_string() != report.kind {
        Some(format!("manifest kind {} differs from header", meta.kind))
    } else {
        None
    }
}

/// Decode the header, then verify the payload against it.
fn inspect_data_file(path: &Path) -> Result<SnapshotReport> {
    let header: SnapshotHeader = SnapshotFileReader::read_header(path)
        .with_context(|| format!("unreadable snapshot header in {}", path.display()))?;
    let error = SnapshotFileReader::open(path).err().map(|e| e.to_string());
    debug!(path = %path.display(), index = header.index, verified = error.is_none(), "Inspected data file");

    Ok(SnapshotReport {
        path: path.to_path_buf(),
        group: None,
        replica: None,
        index: header.index,
        kind: header.kind.to_string(),
        version: header.version,
        payload_len: header.payload_len,
        payload_checksum: header.payload_checksum,
        files: Vec::new(),
        error,
    })
}

const SNAPSHOT_HEADERS: [&str; 8] = [
    "Index", "Group", "Replica", "Kind", "Version", "Payload", "Checksum", "Status",
];

const FILE_HEADERS: [&str; 4] = ["Id", "Name", "Size", "Metadata"];

fn render_reports(reports: &[SnapshotReport], style: TableStyleKind) -> String {
    let rows = reports.iter().map(report_to_cells).collect();
    pretty::render_string_table(&SNAPSHOT_HEADERS, rows, style)
}

fn report_to_cells(report: &SnapshotReport) -> Vec<String> {
    vec![
        report.index.to_string(),
        report.group.clone().unwrap_or_else(|| "-".into()),
        report.replica.clone().unwrap_or_else(|| "-".into()),
        report.kind.clone(),
        report.version.to_string(),
        pretty::format_size(report.payload_len),
        format!("{:#010x}", report.payload_checksum),
        match &report.error {
            None => "ok".into(),
            Some(err) => format!("INVALID: {err}"),
        },
    ]
}

fn render_files(files: &[FileReport], style: TableStyleKind) -> String {
    let rows = files
        .iter()
        .map(|f| {
            vec![
                f.file_id.to_string(),
                f.name.clone(),
                f.size
                    .map(pretty::format_size)
                    .unwrap_or_else(|| "missing".into()),
                f.metadata.clone(),
            ]
        })
        .collect();
    pretty::render_string_table(&FILE_HEADERS, rows, style)
}
