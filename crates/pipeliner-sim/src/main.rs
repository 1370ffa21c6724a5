//! Command-line entry point of the pipeliner simulator

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use pipeliner_sim::{LogFormat, SimConfig};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("pipeliner-sim")
        .version(pipeliner_sim::VERSION)
        .about("OF-DPA group pipeliner simulator")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Install and remove a seeded workload against a simulated switch")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("objectives")
                        .long("objectives")
                        .value_parser(value_parser!(u64))
                        .help("Number of next objectives to install"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("loss")
                        .long("loss")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a group event is dropped"),
                )
                .arg(
                    Arg::new("reject")
                        .long("reject")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a group add is rejected"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .value_parser(value_parser!(u64))
                        .help("Base device latency in milliseconds"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report and logs as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let mut config = match args.get_one::<PathBuf>("config") {
                Some(path) => SimConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SimConfig::default(),
            };
            if let Some(objectives) = args.get_one::<u64>("objectives") {
                config.workload.objectives = *objectives;
            }
            if let Some(seed) = args.get_one::<u64>("seed") {
                config.workload.seed = *seed;
            }
            if let Some(loss) = args.get_one::<f64>("loss") {
                config.device.event_loss = *loss;
            }
            if let Some(reject) = args.get_one::<f64>("reject") {
                config.device.reject_rate = *reject;
            }
            if let Some(latency) = args.get_one::<u64>("latency-ms") {
                config.device.latency_ms = *latency;
            }
            let json = args.get_flag("json");
            if json {
                config.logging.format = LogFormat::Json;
            }
            config.validate().context("invalid simulation settings")?;
            config.logging.init()?;

            let report = pipeliner_sim::run(&config).await?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.generate_text());
            }
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Some(("config", _)) => {
            print!("{}", SimConfig::default().to_toml_string()?);
        }
        _ => {}
    }
    Ok(())
}
