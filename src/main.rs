use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use ble_gatt_bridge::bus::LoopbackBus;
use ble_gatt_bridge::commands::{self, Command};
use ble_gatt_bridge::config::AppConfig;
use ble_gatt_bridge::core::PeripheralSimulator;
use ble_gatt_bridge::logging;
use ble_gatt_bridge::state::AppState;

#[derive(Parser)]
#[command(name = "ble-gatt-bridge")]
#[command(about = "BLE GATT central console and simulated peripheral")]
struct Cli {
    /// Config file, defaults to the platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive central console on the system adapter
    Central,
    /// Advertise and serve the simulated peripheral on the system adapter
    Peripheral {
        /// Adapter name, e.g. hci0
        #[arg(short, long)]
        adapter: Option<String>,
    },
    /// Central console talking to the simulated peripheral in-process
    Demo,
    /// Write the default config file
    InitConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::verbosity_to_level(cli.verbose));

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_config(&config_path).await?;

    match cli.command {
        Commands::Central => central(config).await,
        Commands::Peripheral { adapter } => peripheral(config, adapter).await,
        Commands::Demo => demo(config).await,
        Commands::InitConfig => {
            AppConfig::default().save_config(&config_path).await?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
    }
}

async fn demo(config: AppConfig) -> Result<()> {
    let bus = LoopbackBus::new(config.central.adapter_path.clone());
    let peripheral = bus.peripheral(&config.peripheral.loopback_address);
    let simulator = PeripheralSimulator::new(&config.peripheral);
    simulator.start(&peripheral).await?;
    info!(
        "Simulated peripheral {} at {}",
        config.peripheral.local_name,
        peripheral.device_path()
    );

    let app_state = AppState::new(bus, config.central);
    console(&app_state).await;
    simulator.shutdown();
    Ok(())
}

#[cfg(feature = "bluez")]
async fn central(config: AppConfig) -> Result<()> {
    use ble_gatt_bridge::backend::BluestBus;

    let bus = BluestBus::new(&config.central.adapter_path).await?;
    let app_state = AppState::new(bus, config.central);
    if let Err(e) = app_state.bluetooth_manager.lock().await.load_known_devices().await {
        error!("Failed to load known devices: {}", e);
    }
    console(&app_state).await;
    Ok(())
}

#[cfg(not(feature = "bluez"))]
async fn central(_config: AppConfig) -> Result<()> {
    anyhow::bail!("built without the `bluez` feature, try `demo`")
}

#[cfg(feature = "bluez")]
async fn peripheral(config: AppConfig, adapter: Option<String>) -> Result<()> {
    use ble_gatt_bridge::backend::BluerRegistrar;

    let registrar = BluerRegistrar::new(adapter.as_deref()).await?;
    let simulator = PeripheralSimulator::new(&config.peripheral);
    simulator.start(&registrar).await?;
    info!("Peripheral {} is up, press Ctrl-C to stop", config.peripheral.local_name);

    tokio::signal::ctrl_c().await?;
    simulator.shutdown();
    info!("Peripheral stopped");
    Ok(())
}

#[cfg(not(feature = "bluez"))]
async fn peripheral(_config: AppConfig, _adapter: Option<String>) -> Result<()> {
    anyhow::bail!("built without the `bluez` feature, try `demo`")
}

/// Reads console commands until `quit`, end of input or Ctrl-C.
async fn console(app_state: &AppState) {
    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if !commands::execute(app_state, command).await {
                            break;
                        }
                    }
                    Err(e) => println!("{}, type `help`", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let manager = app_state.get_bluetooth_manager_arc();
    manager.lock().await.shutdown().await;
}
