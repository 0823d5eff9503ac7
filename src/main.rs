use std::env;

use fm_lbfgs::{config::RunConfig, runner};
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("Usage: fm-lbfgs name=value [name=value ...]");
        return Ok(());
    }

    let config = RunConfig::from_args(&args)?;
    runner::launch(&config)?;

    info!("task {} finished", config.task);
    Ok(())
}
