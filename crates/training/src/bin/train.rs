use clap::Parser;
use training::util::{init_logging, run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = TrainArgs::parse();
    run_train(args)?;
    Ok(())
}
