use log::{error, info};
use vpnstat::configuration::config::Config;
use vpnstat::controller::controller_handler::Controller;

fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let config = Config::from_args().unwrap_or_else(|e| {
        error!("Unable to load configuration: {}", e);
        std::process::exit(1);
    });
    info!("Configuration loaded");

    let controller = Controller::new(config);
    if let Err(e) = controller.run() {
        error!("{}, exiting...", e);
        std::process::exit(1);
    }
}
