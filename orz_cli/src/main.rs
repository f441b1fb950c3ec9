mod ui;

use clap::Parser;
use crate::ui::cli;
use orz_core::utils::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    init_logging(args.verbose);
    let code = match cli::run_cli(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // tokio's stdin reader may still be parked in a blocking read
    std::process::exit(code);
}
