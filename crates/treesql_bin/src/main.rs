use std::error::Error;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use treesql::{Driver, DriverConfig, RowValue};
use treestore::json::FileOpener;

#[derive(Parser)]
#[clap(name = "treesql")]
struct Arguments {
    /// Path to the dataset file to query.
    dataset: String,

    /// Queries to execute, in order.
    #[clap(trailing_var_arg = true, required = true)]
    queries: Vec<String>,

    /// JSON file holding the driver configuration.
    #[clap(long, env = "TREESQL_CONFIG")]
    config: Option<PathBuf>,

    /// SQL dialect to parse queries with. Overrides the config file.
    #[clap(long)]
    dialect: Option<String>,

    #[clap(long, default_value = "error")]
    log_level: String,

    /// Log output format, "human" or "json".
    #[clap(long, default_value = "human")]
    log_format: String,
}

/// Run queries against a dataset file and print the results.
fn main() {
    let args = Arguments::parse();

    let level = logutil::parse_level(&args.log_level).unwrap_or(tracing::Level::ERROR);
    let format = logutil::LogFormat::from_name(&args.log_format).unwrap_or_default();
    logutil::configure_global_logger(level, format);

    if let Err(e) = inner(args) {
        println!("ERROR: {e}");
        std::process::exit(1);
    }
}

fn inner(args: Arguments) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => DriverConfig::default(),
    };
    if let Some(dialect) = args.dialect {
        config = config.with_dialect(dialect);
    }

    let driver = Driver::try_new(Arc::new(FileOpener), config)?;
    let mut conn = driver.open(&args.dataset)?;
    let mut stdout = BufWriter::new(std::io::stdout());

    for query in &args.queries {
        let mut rows = conn.query(query, &[])?;
        writeln!(stdout, "{}", rows.columns().join("\t"))?;

        let mut dest = vec![RowValue::default(); rows.columns().len()];
        loop {
            match rows.next(&mut dest) {
                Ok(()) => {
                    let line: Vec<String> = dest.iter().map(|v| v.to_string()).collect();
                    writeln!(stdout, "{}", line.join("\t"))?;
                }
                Err(e) if e.is_end_of_rows() => break,
                Err(e) => return Err(e.into()),
            }
        }
        rows.close()?;
        stdout.flush()?;
    }

    conn.close()?;
    Ok(())
}
