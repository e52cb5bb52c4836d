use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use fnstack::config::Config;
use fnstack::core::error::SynthResult;
use fnstack::logging::init_logger;
use fnstack::orchestration::{plan, synthesize_with, SynthesisOptions};
use fnstack::synth::{Manifest, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "fnstack", version, about = "Function registry and deployment unit generator")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "conf/fnstack.yaml")]
    config: PathBuf,

    /// Override settings.tier
    #[arg(long)]
    tier: Option<String>,

    /// Override settings.num_partitions
    #[arg(long)]
    partitions: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and function registry
    Validate,
    /// Print deployment units and function names without creating anything
    Plan,
    /// Generate the manifest
    Synth {
        /// Output file; stdout when absent
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Build only these units; functions elsewhere are imported for routing
        #[arg(long = "unit")]
        units: Vec<usize>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logger(&config.log) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> SynthResult<Config> {
    let mut config = Config::load_from_yaml(&cli.config)?;
    config.merge_with_overrides(cli.tier.as_deref(), cli.partitions);
    Ok(config)
}

fn run(command: Command, config: &Config) -> SynthResult<()> {
    match command {
        Command::Validate => {
            log::info!("Validating {} functions...", config.functions.len());
            plan(config)?;
            println!("OK: {} functions", config.functions.len());
        }
        Command::Plan => {
            for unit in plan(config)? {
                println!("{} ({} functions)", unit.unit_name, unit.functions.len());
                for function in &unit.functions {
                    match &function.route {
                        Some(route) => println!("  {}  [{}]", function.function_name, route),
                        None => println!("  {}", function.function_name),
                    }
                }
            }
        }
        Command::Synth {
            out,
            format,
            units,
        } => {
            let options = SynthesisOptions {
                units: (!units.is_empty()).then(|| units.into_iter().collect::<BTreeSet<_>>()),
            };
            let mut manifest = Manifest::new(&config.settings);
            let output = synthesize_with(config, &mut manifest, &options)?;
            log::info!(
                "Synthesized {} functions and {} routes (run {})",
                output.registry.len(),
                output.routes.len(),
                manifest.run_id
            );

            match out {
                Some(path) => manifest.write_to(&path, format.into())?,
                None => println!("{}", manifest.render(format.into())?),
            }
        }
    }
    Ok(())
}
