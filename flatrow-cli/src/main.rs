//! CLI for the flatrow metric row encoder.
//!
//! Provides commands for encoding rows described in JSON, inspecting encoded
//! rows, and benchmarking the build path.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use flatrow::row::{CompoundFieldSpec, SimpleFieldSpec};
use flatrow::{PoolConfig, RowBuilder, RowBuilderPool, RowSpec, RowView, SimpleFieldType};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// flatrow: deterministic metric row encoder CLI.
#[derive(Parser)]
#[command(name = "flatrow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Encode a row described in JSON.
    Encode {
        /// Path to the JSON row description ("-" for stdin).
        input: PathBuf,

        /// Output encoding.
        #[arg(long, default_value = "hex")]
        format: OutputFormat,

        /// Write the encoded row to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Decode an encoded row and print it as JSON.
    Inspect {
        /// Path to the encoded row ("-" for stdin).
        input: PathBuf,

        /// Input encoding.
        #[arg(long, default_value = "auto")]
        format: InputFormat,
    },

    /// Run a build-path microbenchmark.
    Bench {
        /// Number of rows to build.
        #[arg(long, default_value = "1000000")]
        rows: u64,

        /// Number of tags per row.
        #[arg(long, default_value = "8")]
        tags: usize,

        /// Number of simple fields per row.
        #[arg(long, default_value = "4")]
        fields: usize,

        /// Pool configuration file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Output encoding for `encode`.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Lowercase hexadecimal, newline terminated.
    Hex,
    /// Raw bytes.
    Raw,
}

/// Input encoding for `inspect`.
#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Hex if the input is only hex digits and whitespace, raw otherwise.
    Auto,
    /// Hexadecimal text.
    Hex,
    /// Raw bytes.
    Raw,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            input,
            format,
            output,
        } => cmd_encode(&input, format, output.as_deref()),
        Commands::Inspect { input, format } => cmd_inspect(&input, format),
        Commands::Bench {
            rows,
            tags,
            fields,
            config,
        } => cmd_bench(rows, tags, fields, config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `flatrow encode <input>`.
fn cmd_encode(
    input: &Path,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec: RowSpec = serde_json::from_slice(&read_input(input)?)?;
    let encoded = encode(&spec, format)?;

    match output {
        Some(path) => std::fs::write(path, &encoded)?,
        None => io::stdout().lock().write_all(&encoded)?,
    }
    info!(bytes = encoded.len(), "encoded row");
    Ok(())
}

/// Encodes `spec` with a builder from the process-wide pool.
fn encode(spec: &RowSpec, format: OutputFormat) -> flatrow::Result<Vec<u8>> {
    let mut builder = flatrow::acquire();
    spec.apply(&mut builder)?;
    let bytes = builder.build()?;

    Ok(match format {
        OutputFormat::Hex => {
            let mut text = hex::encode(bytes).into_bytes();
            text.push(b'\n');
            text
        }
        OutputFormat::Raw => bytes.to_vec(),
    })
}

/// Implements `flatrow inspect <input>`.
fn cmd_inspect(input: &Path, format: InputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = decode_input(&read_input(input)?, format)?;
    debug!(bytes = bytes.len(), "decoding row");

    let description = describe(&RowView::new(&bytes)?)?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

/// Reads a file, or stdin when `path` is `-`.
fn read_input(path: &Path) -> io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().lock().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(path)
    }
}

/// Turns `inspect` input into encoded row bytes.
fn decode_input(raw: &[u8], format: InputFormat) -> Result<Vec<u8>, hex::FromHexError> {
    let text = raw.trim_ascii();
    let is_hex = !text.is_empty() && text.iter().all(u8::is_ascii_hexdigit);
    match format {
        InputFormat::Hex => hex::decode(text),
        InputFormat::Auto if is_hex => hex::decode(text),
        InputFormat::Auto | InputFormat::Raw => Ok(raw.to_vec()),
    }
}

/// Renders a decoded row as JSON.
///
/// The output is a valid `encode` input: the row description plus the two
/// derived hashes, which `encode` ignores.
fn describe(view: &RowView<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();

    let spec = RowSpec {
        namespace: text(view.namespace()?),
        name: text(view.name()?),
        timestamp: view.timestamp()?,
        tags: view
            .key_values()?
            .into_iter()
            .map(|(key, value)| (text(key), text(value)))
            .collect(),
        simple_fields: view
            .simple_fields()?
            .into_iter()
            .map(|field| SimpleFieldSpec {
                name: text(field.name),
                field_type: field.field_type,
                value: field.value,
            })
            .collect(),
        compound: view.compound_field()?.map(|compound| CompoundFieldSpec {
            min: compound.min,
            max: compound.max,
            sum: compound.sum,
            count: compound.count,
            bounds: compound.explicit_bounds,
            values: compound.values,
        }),
    };

    let mut description = serde_json::to_value(&spec)?;
    if let Some(object) = description.as_object_mut() {
        object.insert(
            "name_hash".to_string(),
            format!("{:016x}", view.name_hash()?).into(),
        );
        object.insert(
            "kvs_hash".to_string(),
            format!("{:016x}", view.kvs_hash()?).into(),
        );
    }
    Ok(description)
}

/// Implements `flatrow bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    rows: u64,
    tag_count: usize,
    field_count: usize,
    config: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };

    println!("flatrow build-path benchmark");
    println!("  Rows: {rows}");
    println!("  Tags per row: {tag_count}");
    println!("  Fields per row: {field_count}");
    println!("  Pool: max_idle={}, writer_capacity={}", config.max_idle, config.writer_capacity);
    println!();

    let pool = RowBuilderPool::new(config)?;
    let tags: Vec<(String, String)> = (0..tag_count)
        .rev()
        .map(|i| (format!("tag_{i}"), format!("value_{i}")))
        .collect();
    let fields: Vec<String> = (0..field_count).map(|i| format!("field_{i}")).collect();

    println!("Building {rows} rows...");

    let start = Instant::now();
    let mut total_bytes = 0u64;
    for row in 0..rows {
        let mut builder = pool.acquire();
        fill_bench_row(&mut builder, &tags, &fields, row)?;
        total_bytes += builder.build()?.len() as u64;
    }

    let elapsed = start.elapsed();
    let ns_per_row = elapsed.as_nanos() as f64 / rows.max(1) as f64;
    let rows_per_sec = rows as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Total rows: {rows}");
    println!("  Total bytes: {total_bytes}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_row:.1} ns/row");
    println!("  Throughput: {rows_per_sec:.0} rows/sec");
    println!();

    Ok(())
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)] // Synthetic values
fn fill_bench_row(
    builder: &mut RowBuilder,
    tags: &[(String, String)],
    fields: &[String],
    row: u64,
) -> flatrow::Result<()> {
    builder.add_namespace("bench");
    builder.add_metric_name("cpu.usage");
    builder.add_timestamp(1_700_000_000_000 + row as i64);
    for (key, value) in tags {
        builder.add_tag(key, value)?;
    }
    for (i, name) in fields.iter().enumerate() {
        builder.add_simple_field(name, SimpleFieldType::Last, (row + i as u64) as f64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = r#"{
        "namespace": "vm",
        "name": "disk|io",
        "timestamp": 42,
        "tags": [["host", "web1"], ["dev", "sda"]],
        "simple_fields": [{ "name": "reads", "type": "delta_sum", "value": 7.0 }],
        "compound": {
            "min": 1.0, "max": 8.0, "sum": 20.0, "count": 5.0,
            "bounds": [2.0, 4.0, "+Inf"],
            "values": [1.0, 3.0, 1.0]
        }
    }"#;

    #[test]
    fn test_hex_and_raw_agree() {
        let spec: RowSpec = serde_json::from_str(ROW).unwrap();
        let raw = encode(&spec, OutputFormat::Raw).unwrap();
        let hex_text = encode(&spec, OutputFormat::Hex).unwrap();

        assert_eq!(hex_text.last(), Some(&b'\n'));
        assert_eq!(decode_input(&hex_text, InputFormat::Auto).unwrap(), raw);
        assert_eq!(decode_input(&hex_text, InputFormat::Hex).unwrap(), raw);
        assert_eq!(decode_input(&raw, InputFormat::Raw).unwrap(), raw);
    }

    #[test]
    fn test_auto_detects_raw_input() {
        let spec: RowSpec = serde_json::from_str(ROW).unwrap();
        let raw = encode(&spec, OutputFormat::Raw).unwrap();
        assert_eq!(decode_input(&raw, InputFormat::Auto).unwrap(), raw);
        assert!(decode_input(b"zz", InputFormat::Hex).is_err());
    }

    #[test]
    fn test_inspect_output_re_encodes_identically() {
        let spec: RowSpec = serde_json::from_str(ROW).unwrap();
        let raw = encode(&spec, OutputFormat::Raw).unwrap();

        let description = describe(&RowView::new(&raw).unwrap()).unwrap();
        assert_eq!(description["name"], "disk_io");
        assert_eq!(description["tags"][0][0], "dev");
        assert_eq!(description["compound"]["bounds"][2], "+Inf");
        assert!(description["kvs_hash"].is_string());

        let replayed: RowSpec = serde_json::from_value(description).unwrap();
        assert_eq!(encode(&replayed, OutputFormat::Raw).unwrap(), raw);
    }

    #[test]
    fn test_encode_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("row.json");
        let output = dir.path().join("row.bin");
        std::fs::write(&input, ROW).unwrap();

        cmd_encode(&input, OutputFormat::Raw, Some(&output)).unwrap();
        let bytes = std::fs::read(&output).unwrap();
        let view = RowView::new(&bytes).unwrap();
        assert_eq!(view.namespace().unwrap(), b"vm");
        assert_eq!(view.simple_fields().unwrap()[0].value, 7.0);
    }
}
