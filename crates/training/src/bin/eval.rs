use clap::Parser;
use training::util::{init_logging, run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = EvalArgs::parse();
    run_eval(args)?;
    Ok(())
}
