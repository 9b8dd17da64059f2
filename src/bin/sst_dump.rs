//! regionstore SST dump
//!
//! Prints every entry of a block-based SST file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use regionstore::storage::sstable::SstFileIterator;

/// Dump the entries of a block-based SST file
#[derive(Parser, Debug)]
#[command(name = "regionstore-sst-dump")]
#[command(about = "Print the internal keys and values of an SST file")]
struct Args {
    /// SST file to read
    path: PathBuf,

    /// Print values as hex instead of lossy UTF-8
    #[arg(long)]
    hex: bool,

    /// Stop after this many entries
    #[arg(short, long)]
    limit: Option<usize>,

    /// Only print the entry count
    #[arg(short, long)]
    count: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut iter = match SstFileIterator::open(&args.path) {
        Ok(iter) => iter,
        Err(e) => {
            tracing::error!(path = %args.path.display(), error = %e, "cannot open SST file");
            return ExitCode::FAILURE;
        }
    };

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut count = 0usize;
    for entry in iter.entries().take(limit) {
        match entry {
            Ok((key, value)) => {
                count += 1;
                if !args.count {
                    println!(
                        "{} seq={} type={:?} => {}",
                        render(&key.user_key, args.hex),
                        key.sequence,
                        key.value_type,
                        render(&value, args.hex)
                    );
                }
            }
            Err(e) => {
                tracing::error!(entries = count, error = %e, "SST file is damaged");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.count {
        println!("{}", count);
    }
    ExitCode::SUCCESS
}

fn render(bytes: &[u8], hex: bool) -> String {
    if hex {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
