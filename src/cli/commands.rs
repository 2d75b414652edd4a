use crate::cli::args::Args;
use crate::cli::output::ConsoleWriter;
use crate::core::relay::RelayOptions;
use crate::core::shutdown::{shutdown_channel, ShutdownHandle};
use crate::core::supervisor::{ConnectionSupervisor, SupervisorReport};
use crate::domain::config::{BridgeConfig, RuntimeConfig};
use crate::domain::error::BridgeResult;
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging;
use crate::infrastructure::serial::{list_ports, SerialEndpoint};
use crate::infrastructure::tcp::NetworkListener;
use tracing::{debug, info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let mut writer = ConsoleWriter::stdout();

    if args.list_ports {
        let ports = list_ports()?;
        writer.write_ports(&ports)?;
        return Ok(());
    }

    let config = load_config(&args)?;

    if args.dump_config {
        writer.write_message(&ConfigManager::render_config(&config)?)?;
        return Ok(());
    }

    if let Err(e) = logging::init_logging(&config.log_level, args.verbose, args.quiet) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    // Nothing touches the serial device until the whole configuration is valid.
    let runtime = config.validate()?;
    let report = run_bridge(runtime).await?;
    debug!("Final report: {:?}", report);
    Ok(())
}

/// Configuration file (explicit or discovered) with command line flags on top.
pub fn load_config(args: &Args) -> BridgeResult<BridgeConfig> {
    let config_manager = ConfigManager::new();
    let mut config = match &args.config {
        Some(path) => config_manager.load_config_from_path(path)?,
        None => {
            if let Some(path) = config_manager.get_project_config_path() {
                debug!("Using project configuration {}", path.display());
            }
            config_manager.load_config()?
        }
    };

    args.apply_to(&mut config);
    Ok(config)
}

/// Open the device, bind the listener and serve clients until done or Ctrl-C.
pub async fn run_bridge(runtime: RuntimeConfig) -> BridgeResult<SupervisorReport> {
    // Startup failures are reported once, by the caller.
    let serial = SerialEndpoint::open(&runtime.serial)?;
    let listener = NetworkListener::listen(&runtime.listen_addr, runtime.no_delay).await?;

    info!(
        "Bridging {} ({}) to {} [policy: {}]",
        serial.port_name(),
        runtime.serial.line_summary(),
        listener.local_addr(),
        runtime.policy
    );

    let supervisor = ConnectionSupervisor::new(
        serial,
        listener,
        runtime.policy,
        RelayOptions::from(&runtime),
    );

    let (handle, signal) = shutdown_channel();
    tokio::spawn(shutdown_on_ctrl_c(handle));

    supervisor.run(signal).await
}

async fn shutdown_on_ctrl_c(handle: ShutdownHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl-C, shutting down");
            handle.trigger();
        }
        Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
    }
}
