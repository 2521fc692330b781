use eyre::Context;
use heddle::{config::Options, heddle_default_zenoh_prefix, nmap::ZenohNameMapper, vt};
use std::sync::Arc;
use zenoh::prelude::ZFuture;

fn main() -> eyre::Result<()> {
    if let Err(err) = set_up_logger() {
        eprintln!(
            "{:?}",
            eyre::Error::new(err).wrap_err("failed to set up logger")
        );
    }

    let options: Options = argh::from_env();
    options.validate()?;

    ctrlc::set_handler(|| {
        log::info!("shutting down");
        std::process::exit(0);
    })
    .context("failed to install signal handler")?;

    let zenoh = zenoh::open(zenoh::config::Config::default())
        .wait()
        .map_err(|e| eyre::eyre!(e))?;
    let zenoh = Arc::new(zenoh);
    let zenoh_prefix = heddle_default_zenoh_prefix().to_owned();

    let nmap = Arc::new(ZenohNameMapper::new(zenoh.clone(), zenoh_prefix.clone()));

    vt::run(&options, zenoh, zenoh_prefix, nmap)
}

fn set_up_logger() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(fern::log_file("vt.log")?)
        .apply()?;
    Ok(())
}
