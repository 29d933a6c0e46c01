use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tcat_core::GroupBy;
use tracing_subscriber::EnvFilter;

mod commands;
mod settings;

use commands::{FilterArgs, ImportArgs, SortArgs};
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "tcat",
    version,
    about = "Categorize bank transaction exports with regex rules"
)]
struct Cli {
    /// Config file (defaults to tcat.toml in the platform config directory)
    #[arg(short, long, global = true, env = "TCAT_CONFIG")]
    config: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Categorize records and print them with a match summary
    Categorize {
        #[command(flatten)]
        import: ImportArgs,
    },
    /// Print the records matching the given constraints
    Filter {
        #[command(flatten)]
        import: ImportArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Summarize records per group
    Group {
        #[command(flatten)]
        import: ImportArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// account, bank, bank-account, date, date-{daily,weekly,monthly,yearly},
        /// name, tags, amount:WIDTH or balance:WIDTH
        #[arg(short, long)]
        by: GroupBy,
    },
    /// Print amount, balance and frequency statistics
    Stats {
        #[command(flatten)]
        import: ImportArgs,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Save filtered, categorized records as JSON for later runs
    Export {
        #[command(flatten)]
        import: ImportArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the records no rule matched
    Uncategorized {
        #[command(flatten)]
        import: ImportArgs,
        /// Only the distinct descriptions
        #[arg(long)]
        descs: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    if let Some(source) = settings.source() {
        tracing::debug!("Using config {}", source.display());
    }

    match cli.command {
        Commands::Categorize { import } => {
            let (records, summary) = commands::load_records(&settings, &import)?;
            commands::categorize(&records, summary)
        }
        Commands::Filter {
            import,
            filter,
            sort,
        } => {
            let (records, _) = commands::load_records(&settings, &import)?;
            commands::filter(&records, &filter, &sort)
        }
        Commands::Group { import, filter, by } => {
            let (records, _) = commands::load_records(&settings, &import)?;
            commands::group(&records, &filter, by)
        }
        Commands::Stats { import, filter } => {
            let (records, _) = commands::load_records(&settings, &import)?;
            commands::stats(&records, &filter)
        }
        Commands::Export {
            import,
            filter,
            output,
        } => {
            let (records, _) = commands::load_records(&settings, &import)?;
            commands::export(&records, &filter, &output)
        }
        Commands::Uncategorized { import, descs } => {
            let (records, _) = commands::load_records(&settings, &import)?;
            commands::uncategorized(&records, descs)
        }
    }
}
