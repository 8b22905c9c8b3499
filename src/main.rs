//! `replcheck` command line.
//!
//! Each subcommand runs one scenario against MySQL-protocol endpoints and
//! exits non-zero on the first failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use replcheck::coordinator::ParamScope;
use replcheck::fixture::AutoIncrementParams;
use replcheck::mysql::MySqlConnector;
use replcheck::scenario::{self, DdlConfig, DmlConfig, OffsetConfig};
use replcheck::settings::{AppConfig, EndpointConfig, LogFormat, Timing};
use replcheck::trace;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "replcheck")]
#[command(about = "Check that replicated MySQL-protocol databases converge")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file with timing overrides
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable structured JSON logging
    #[arg(long, global = true)]
    structured_logging: bool,

    /// Database (schema) holding the fixture table
    #[arg(long, default_value = "test", global = true)]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct PrimaryArgs {
    /// User of db
    #[arg(long, default_value = "root")]
    user: String,
    /// Password of db
    #[arg(long = "psw", default_value = "")]
    password: String,
    /// Host of db
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port of db
    #[arg(long, default_value_t = 4000)]
    port: u16,
}

#[derive(Args, Debug, Clone)]
struct SecondaryArgs {
    /// User of the second db
    #[arg(id = "user2", long = "user2", default_value = "root")]
    user: String,
    /// Password of the second db
    #[arg(id = "psw2", long = "psw2", default_value = "")]
    password: String,
    /// Host of the second db
    #[arg(id = "host2", long = "host2", default_value = "127.0.0.1")]
    host: String,
    /// Port of the second db
    #[arg(id = "port2", long = "port2", default_value_t = 5000)]
    port: u16,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate auto_increment_increment & auto_increment_offset.
    ///
    /// Creates `auto1`, inserts n rows with the given increment and offset
    /// applied per session or globally, then checks that
    /// `select count(*) from auto1 where (id - offset) % increment = 0` equals n.
    Offset {
        #[command(flatten)]
        db: PrimaryArgs,
        /// How many rows to fill the table with
        #[arg(long, default_value_t = 10000)]
        n: i64,
        /// Max open connections inserting concurrently
        #[arg(long, default_value_t = 16)]
        p: usize,
        /// Value of auto_increment_increment
        #[arg(long, default_value_t = 2)]
        increment: i64,
        /// Value of auto_increment_offset
        #[arg(long, default_value_t = 1)]
        offset: i64,
        /// Set the variables per session (true) or globally (false)
        #[arg(
            long,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true",
            action = clap::ArgAction::Set
        )]
        session: bool,
    },
    /// Check db1 <-> db2 DML replication.
    ///
    /// All DDL runs on db1 and replicates to db2. Fills n rows on both sides,
    /// checks equality, runs op-number random insert/update/delete on each
    /// side, and checks equality again.
    Dml {
        #[command(flatten)]
        db: PrimaryArgs,
        #[command(flatten)]
        db2: SecondaryArgs,
        /// How many rows fill up the table
        #[arg(long, default_value_t = 10000)]
        n: i64,
        /// Max open connections to each db
        #[arg(long, default_value_t = 16)]
        p: usize,
        /// Set the variables per session (true) or globally (false)
        #[arg(
            long,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true",
            action = clap::ArgAction::Set
        )]
        session: bool,
        /// Random insert/update/delete operations per db after the fill
        #[arg(long = "op-number", default_value_t = 10000)]
        op_number: i64,
        /// Run again and again until an error occurs
        #[arg(long = "loop")]
        loop_forever: bool,
        /// Seed for the random operations
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Race add/change(int -> bigint)/drop column against concurrent inserts
    /// and check the data still converges.
    Ddl {
        #[command(flatten)]
        db: PrimaryArgs,
        #[command(flatten)]
        db2: SecondaryArgs,
        /// Max open connections to each db
        #[arg(long, default_value_t = 16)]
        p: usize,
        /// Set the variables per session (true) or globally (false)
        #[arg(
            long,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true",
            action = clap::ArgAction::Set
        )]
        session: bool,
    },
}

fn endpoint_config(
    label: &str,
    user: &str,
    password: &str,
    host: &str,
    port: u16,
    database: &str,
    timing: &Timing,
) -> EndpointConfig {
    EndpointConfig {
        user: user.to_string(),
        password: password.to_string(),
        database: database.to_string(),
        read_timeout: timing.read_timeout(),
        ..EndpointConfig::new(label, host, port)
    }
}

impl PrimaryArgs {
    fn to_config(&self, database: &str, timing: &Timing) -> EndpointConfig {
        endpoint_config("db1", &self.user, &self.password, &self.host, self.port, database, timing)
    }
}

impl SecondaryArgs {
    fn to_config(&self, database: &str, timing: &Timing) -> EndpointConfig {
        endpoint_config("db2", &self.user, &self.password, &self.host, self.port, database, timing)
    }
}

async fn run(cli: Cli, cfg: AppConfig) -> anyhow::Result<()> {
    let connector = MySqlConnector;
    let timing = cfg.timing;

    match cli.command {
        Command::Offset {
            db,
            n,
            p,
            increment,
            offset,
            session,
        } => {
            let cfg = OffsetConfig {
                endpoint: db.to_config(&cli.database, &timing),
                rows: n,
                concurrency: p,
                params: AutoIncrementParams::new(increment, offset),
                scope: ParamScope::from_session_flag(session),
                timing,
            };
            scenario::run_offset(&connector, &cfg).await?;
        }
        Command::Dml {
            db,
            db2,
            n,
            p,
            session,
            op_number,
            loop_forever,
            seed,
        } => {
            let cfg = DmlConfig {
                primary: db.to_config(&cli.database, &timing),
                secondary: db2.to_config(&cli.database, &timing),
                rows: n,
                concurrency: p,
                scope: ParamScope::from_session_flag(session),
                op_budget: op_number,
                loop_forever,
                seed,
                timing,
            };
            scenario::run_dml(&connector, &cfg).await?;
        }
        Command::Ddl {
            db,
            db2,
            p,
            session,
        } => {
            let cfg = DdlConfig {
                primary: db.to_config(&cli.database, &timing),
                secondary: db2.to_config(&cli.database, &timing),
                concurrency: p,
                scope: ParamScope::from_session_flag(session),
                column_types: scenario::default_column_types(),
                timing,
            };
            scenario::run_ddl(&connector, &cfg).await?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match AppConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: failed to load config: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let log_format = if cli.structured_logging {
        LogFormat::Json
    } else {
        cfg.logging.format
    };
    if let Err(e) = trace::init(log_format) {
        eprintln!("Error: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli, cfg).await {
        Ok(()) => {
            info!("all checks passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "fail test");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
