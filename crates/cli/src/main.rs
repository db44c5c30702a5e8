use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::Path;
use tracing_subscriber::fmt::SubscriberBuilder;

mod scenarios;

#[derive(Parser)]
#[command(name = "cli")]
#[command(about = "Loop-nest optimizer experiment runner")]
struct Cmd {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Optimize a named scenario and write the chosen schedule/transforms.
    Run {
        /// gemm | trisolve | fusedpair
        #[arg(long)]
        scenario: String,
        /// Loop extent for square nests.
        #[arg(long, default_value_t = 8192)]
        size: i64,
        /// Output JSON path; stdout when omitted.
        #[arg(long)]
        out: Option<String>,
    },
    /// Print a small provenance JSON block.
    Report,
}

fn main() -> Result<()> {
    SubscriberBuilder::default().with_target(false).init();
    let cmd = Cmd::parse();
    match cmd.action {
        Action::Run {
            scenario,
            size,
            out,
        } => run(&scenario, size, out.as_deref()),
        Action::Report => report(),
    }
}

fn run(scenario: &str, size: i64, out: Option<&str>) -> Result<()> {
    tracing::info!(scenario, size, "run");
    let result = match scenario {
        "gemm" => scenarios::gemm(size),
        "trisolve" => scenarios::trisolve(size),
        "fusedpair" => scenarios::fused_pair(size),
        other => bail!("unknown scenario: {other}"),
    }?;
    let doc = serde_json::to_string_pretty(&result)?;
    match out {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, doc)?;
            tracing::info!(path, "wrote results");
        }
        None => println!("{doc}"),
    }
    Ok(())
}

fn report() -> Result<()> {
    let block = json!({
        "polyloop_version": polyloop::VERSION,
        "cli_version": env!("CARGO_PKG_VERSION"),
        "scenarios": ["gemm", "trisolve", "fusedpair"],
    });
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(())
}
