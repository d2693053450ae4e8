//! `cache-inspect`: exercise the cache strategies from the command line.
//!
//! ```bash
//! cache-inspect simulate --strategy lfu --capacity 100 --ops 10000
//! RUST_LOG=adaptive_cache=debug cache-inspect health
//! cache-inspect snapshot ./cache/file.cache
//! ```

use clap::Parser;
use tracing_subscriber::EnvFilter;

use adaptive_cache::cli::{self, Cli};

fn main() {
    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    match cli::run(args.command) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
