//! Logger bootstrap. Binaries call `init()` once and hand child loggers
//! (with `o!()` context) down to the components they start.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Error parsing embedded logger config");

    config.build_logger().expect("Error building logger")
}
