//! Binary entry point: parse arguments, initialize logging, run phases

use clap::Parser;
use tracing_subscriber::EnvFilter;
use volmerge::cli::Args;
use volmerge::config::install_cancel_handler;
use volmerge::phases::{self, PhaseRunner};

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.self_test {
        phases::self_test()?;
        println!("self-test passed");
        return Ok(());
    }

    args.validate()?;
    install_cancel_handler();

    let cfg = args.to_config();
    let mut runner = PhaseRunner::new(cfg)?;
    runner.run(&args.run.phase.phases())?;
    Ok(())
}
