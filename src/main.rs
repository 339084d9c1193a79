//! `conform` - run the reference server or the conformance matrix.
//!
//! `conform matrix` spawns `conform serve` once per scenario and mode, so
//! the same binary is both the harness and the server-under-test.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use conform_core::{BodyEncoding, ServerConfig};
use conform_test::{HarnessConfig, MatrixRunner, apps, scenario};

/// Conformance harness for WSGI-style HTTP servers
#[derive(Parser)]
#[command(name = "conform")]
#[command(version, about, long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a registered application and print `READY <addr>` once bound
    Serve {
        /// Registered application name
        #[arg(long)]
        app: String,

        /// Host to bind (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for ephemeral (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Accept text body chunks as UTF-8
        #[arg(long)]
        legacy_body_encoding: bool,

        /// Server configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the conformance matrix
    Matrix {
        /// Scenario to run (repeatable, default all)
        #[arg(long = "scenario", value_name = "NAME")]
        scenarios: Vec<String>,

        /// Body encoding modes to run
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Run the whole matrix this many times
        #[arg(long)]
        repeat: Option<u32>,

        /// Startup deadline per server, e.g. `500ms`
        #[arg(long, value_parser = humantime::parse_duration)]
        startup_timeout: Option<Duration>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Harness configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Server executable (default: this binary)
        #[arg(long)]
        server_bin: Option<PathBuf>,

        /// Pass server stderr through
        #[arg(long)]
        show_server_logs: bool,
    },

    /// List scenarios
    List {
        /// List applications instead
        #[arg(long)]
        apps: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Strict,
    Legacy,
    Both,
}

impl ModeArg {
    fn modes(self) -> Vec<BodyEncoding> {
        match self {
            Self::Strict => vec![BodyEncoding::Strict],
            Self::Legacy => vec![BodyEncoding::Legacy],
            Self::Both => vec![BodyEncoding::Strict, BodyEncoding::Legacy],
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // stdout carries the READY line and reports; logs go to stderr.
    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            app,
            host,
            port,
            legacy_body_encoding,
            config,
        } => {
            let entry = apps::lookup(&app)
                .with_context(|| format!("unknown application: {app}"))?;
            let mut config = match config {
                Some(path) => ServerConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ServerConfig::default(),
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if legacy_body_encoding {
                config = config.with_body_encoding(BodyEncoding::Legacy);
            }
            tracing::info!(app = entry.name, addr = %config.bind_addr(), encoding = %config.body_encoding(), "starting server");
            conform_server::run_with_config(entry.application(), config)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Matrix {
            scenarios,
            mode,
            repeat,
            startup_timeout,
            json,
            config,
            server_bin,
            show_server_logs,
        } => {
            let mut config = match config {
                Some(path) => HarnessConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => HarnessConfig::default(),
            };
            if let Some(mode) = mode {
                config.modes = mode.modes();
            }
            if let Some(repeat) = repeat {
                config.repeat = repeat;
            }
            if let Some(timeout) = startup_timeout {
                config.startup_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            }
            if show_server_logs {
                config.show_server_logs = true;
            }
            config.validate()?;

            let server_bin = match server_bin.or_else(|| config.server_bin.clone()) {
                Some(path) => path,
                None => std::env::current_exe().context("locating the conform binary")?,
            };
            let selected = scenario::select(scenarios.as_slice())?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building the tokio runtime")?;
            let runner = MatrixRunner::new(server_bin, config);
            let report = runtime.block_on(runner.run(&selected));

            if json {
                println!("{}", report.to_json()?);
            } else {
                println!("{report}");
            }
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::List { apps: list_apps } => {
            if list_apps {
                for entry in apps::all() {
                    println!("{:<40} {}", entry.name, entry.description);
                }
            } else {
                for s in scenario::all() {
                    let description = apps::lookup(s.application).map_or("", |e| e.description);
                    println!("{:<40} {description}", s.name);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
