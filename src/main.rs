// Serial2Net - Serial port to TCP bridge
use clap::Parser;
use serial2net::cli::{execute_command, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = execute_command(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
