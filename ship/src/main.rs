use clap::{App, Arg};
use psokit::logging;
use ship::config::ShipConfig;
use ship::ship::Ship;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

pub fn main() {
    let matches = App::new("PSO Ship Server")
        .version("0.1.0")
        .about("Runs a multi-version PSO block/lobby server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the ship config file")
                .required(true),
        )
        .get_matches();

    let config_path = matches.value_of("CONFIG_FILE").unwrap();

    let log = logging::init();

    let cfg = match ShipConfig::load(Path::new(config_path)) {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::error!(log, "ship config failed to parse";
                            "context" => "startup",
                            "path" => config_path,
                            "error" => %err);
            std::process::exit(1);
        }
    };

    let ship = match Ship::start(cfg, log.clone()) {
        Ok(ship) => ship,
        Err(err) => {
            logging::error!(log, "ship failed to start";
                            "context" => "startup",
                            "error" => %err);
            std::process::exit(1);
        }
    };

    // Park here until a GM shutdown drops the run flag.
    while ship.shared.run.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));
    }

    ship.shutdown();
}
