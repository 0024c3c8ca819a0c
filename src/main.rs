use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, Level};

use seglog::{Config, Log, Record};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and maintain a segmented log directory", long_about = None)]
struct Args {
    /// Log directory
    #[arg(short, long, default_value = "/tmp/seglog")]
    dir: PathBuf,

    /// Optional config file (toml, json or yaml); SEGLOG_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append each value as a record and print its offset
    Append { values: Vec<String> },
    /// Print the record at an offset
    Read {
        offset: u64,
        #[arg(long)]
        hex: bool,
    },
    /// Print offset bounds and the segment table
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Print every record in offset order
    Dump {
        #[arg(long)]
        hex: bool,
    },
    /// Delete segments whose records all sit below an offset
    Truncate { lowest: u64 },
    /// Copy the raw store bytes of every segment into a file
    Export { out: PathBuf },
}

fn format_value(value: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(value)
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

fn print_record(out: &mut impl Write, record: &Record, hex: bool) -> io::Result<()> {
    writeln!(out, "{}\t{}", record.offset, format_value(&record.value, hex))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let log = Log::new(args.dir.clone(), config)
        .with_context(|| format!("failed to open log at {}", args.dir.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Append { values } => {
            for value in values {
                let offset = log.append(value.as_bytes())?;
                writeln!(out, "{}", offset)?;
            }
        }
        Command::Read { offset, hex } => {
            let record = log.read(offset)?;
            print_record(&mut out, &record, hex)?;
        }
        Command::Info { json } => {
            let lowest = log.lowest_offset()?;
            let highest = log.highest_offset()?;
            let segments = log.segments()?;
            if json {
                let info = serde_json::json!({
                    "dir": log.dir().display().to_string(),
                    "lowest_offset": lowest,
                    "highest_offset": highest,
                    "segments": segments,
                });
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "dir:            {}", log.dir().display())?;
                writeln!(out, "lowest offset:  {}", lowest)?;
                writeln!(out, "highest offset: {}", highest)?;
                writeln!(out, "{:>20} {:>20} {:>12} {:>12}", "base", "next", "store", "index")?;
                for s in segments {
                    writeln!(
                        out,
                        "{:>20} {:>20} {:>12} {:>12}",
                        s.base_offset, s.next_offset, s.store_bytes, s.index_bytes
                    )?;
                }
            }
        }
        Command::Dump { hex } => {
            for offset in log.lowest_offset()?..log.highest_offset()? {
                print_record(&mut out, &log.read(offset)?, hex)?;
            }
        }
        Command::Truncate { lowest } => {
            log.truncate(lowest)?;
            writeln!(out, "lowest offset is now {}", log.lowest_offset()?)?;
        }
        Command::Export { out: path } => {
            let mut reader = log.reader()?;
            let mut file = BufWriter::new(
                File::create(&path).with_context(|| format!("failed to create {}", path.display()))?,
            );
            let bytes = io::copy(&mut reader, &mut file)?;
            file.flush()?;
            info!(bytes, path = %path.display(), "exported log");
        }
    }

    log.close()?;
    Ok(())
}
