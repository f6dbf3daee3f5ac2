//! Typedefs CLI
//!
//! Feed records through a target's typedef, inspect targets and run the admin
//! server.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use event_typedefs::{parse_record, AdminServer, TypedefsConfig, TypedefError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "typedefs")]
#[command(about = "Per-target field registry for schema-less events")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest JSON-lines records into a target and print resolved fieldsets
    Guess {
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
        /// Target to ingest into
        #[arg(short, long, default_value = "events")]
        target: String,
        /// Only keep known or awaited fields
        #[arg(long)]
        strict: bool,
    },

    /// Print the field dump of configured targets
    Dump {
        /// Only this target
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Run the admin server until interrupted
    Serve,

    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output as TOML
        #[arg(long)]
        toml: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file
    Init {
        #[arg(short, long, default_value = "typedefs.toml")]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = TypedefsConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Guess { input, target, strict } => {
            let manager = cfg.build_manager()?;
            if manager.get(&target).is_err() {
                manager.add_lazy_target(&target)?;
            }
            let strict = strict || cfg.ingest.strict;

            let reader: Box<dyn BufRead> = match &input {
                Some(path) => Box::new(BufReader::new(
                    File::open(path).with_context(|| format!("opening {:?}", path))?,
                )),
                None => Box::new(BufReader::new(io::stdin())),
            };

            let (mut accepted, mut rejected) = (0usize, 0usize);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record = parse_record(&line)
                    .with_context(|| format!("line {}: invalid record", lineno + 1))?;
                match manager.ingest(&target, &record, strict) {
                    Ok(fieldset) => {
                        accepted += 1;
                        println!(
                            "{}\t{}",
                            fieldset.event_type_name().unwrap_or("-"),
                            fieldset.summary()
                        );
                    }
                    Err(e @ TypedefError::DefinitionMismatch) => {
                        rejected += 1;
                        eprintln!("line {}: rejected: {}", lineno + 1, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            eprintln!("{} accepted, {} rejected", accepted, rejected);
            println!("{}", serde_json::to_string_pretty(&manager.dump(&target)?)?);
        }

        Commands::Dump { target } => {
            let manager = cfg.build_manager()?;
            let json = match target {
                Some(name) => serde_json::to_string_pretty(&manager.dump(&name)?)?,
                None => serde_json::to_string_pretty(&manager.dump_all())?,
            };
            println!("{}", json);
        }

        Commands::Serve => {
            let manager = Arc::new(cfg.build_manager()?);
            let mut server = AdminServer::new(manager, cfg.admin.clone());
            let addr = server.start().context("starting admin server")?;
            println!("Serving on http://{}", addr);

            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(tokio::signal::ctrl_c())?;
            server.stop();
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show { toml, json } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&cfg)?);
                } else if toml {
                    println!("{}", ::toml::to_string_pretty(&cfg)?);
                } else {
                    println!("Admin:");
                    println!("  Listen: {}", cfg.admin.bind_addr());
                    println!("  Threads: {}", cfg.admin.threads);
                    println!("\nIngest:");
                    println!("  Strict: {}", cfg.ingest.strict);
                    println!("\nTargets:");
                    for t in &cfg.targets {
                        if t.fields.is_empty() {
                            println!("  - {} (lazy)", t.name);
                        } else {
                            println!("  - {} ({} fields)", t.name, t.fields.len());
                        }
                    }
                }
            }
            ConfigCommands::Init { output } => {
                TypedefsConfig::default().save(&output)?;
                println!("Created config file: {:?}", output);
            }
        },
    }

    Ok(())
}
