//! Shell-bridge binary entry point.

use shell_bridge::cli::{self, parse_args};
use shell_bridge::config::Config;
use shell_bridge::gateway::{serve, GatewayState};
use shell_bridge::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-bridge --help' for more information.");
            std::process::exit(2);
        }
    };

    if args.help {
        cli::print_help();
        return Ok(());
    }

    if args.version {
        cli::print_version();
        return Ok(());
    }

    let config = Config::load(&args)?;
    logging::init_with_level(Some(config.log_filter()));

    info!("shell-bridge v{}", env!("CARGO_PKG_VERSION"));

    let server = config.to_server_config()?;
    let session = config.session_config();
    info!(
        shell = %session.shell.program,
        interpreter = %session.dispatcher.interpreter,
        "sessions configured"
    );

    serve(server, GatewayState::new(session)).await?;
    Ok(())
}
