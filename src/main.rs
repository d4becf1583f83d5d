use anyhow::Context;
use clap::Parser;
use precipcache::cli::Cli;
use precipcache::generate_cache_with_layout;
use precipcache::log::{config_echo, show_farewell_with_timing, show_greeting, show_size_report};
use std::time::Instant;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    if let Err(e) = run(&cli) {
        log::error!("Fatal: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let interactive = !cli.quiet;

    if interactive {
        show_greeting();
    }

    let config = cli.resolve_config().context("invalid configuration")?;
    let layout = config.layout().context("cannot locate the data root")?;

    if interactive {
        config_echo(&config, &layout);
    }

    let report = generate_cache_with_layout(&config, &layout, interactive)?;

    if interactive {
        if let Some(size) = &report.size {
            show_size_report(size);
        }
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}
