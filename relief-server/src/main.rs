use std::process::ExitCode;

use relief_server::config::Config;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    relief_server::init_tracing();

    match relief_server::start_server(Config::load()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "relief-server failed");
            ExitCode::FAILURE
        }
    }
}
