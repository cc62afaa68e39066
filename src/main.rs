use tracing::error;

use flowprotect::config::Config;
use flowprotect::{app, trace};

fn main() {
    trace::init("info");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(message = "Invalid configuration.", %error);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(message = "Failed to build async runtime.", %error);
            std::process::exit(exitcode::SOFTWARE);
        }
    };

    let code = runtime.block_on(app::run(config));
    std::process::exit(code);
}
