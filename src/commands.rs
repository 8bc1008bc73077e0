//! Console commands
//! This module parses the line-oriented commands of the interactive console
//! and runs them against the application state. Reads, writes and connects
//! are spawned so the console loop never waits on the remote side.

use std::fmt;
use std::str::FromStr;

use log::{error, info};
use thiserror::Error;

use crate::core::bluetooth::GattError;
use crate::core::gatt::{LedState, decode_temperature};
use crate::state::AppState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command} takes at most one device address")]
    TooManyArguments { command: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start discovery
    Scan,
    /// Stop discovery and list what was found
    StopScan,
    /// List known addresses
    Show,
    /// Connect to one address, or to every known one
    Connect(Option<String>),
    /// Disconnect one address, or every known one
    Disconnect(Option<String>),
    Temperature,
    ReadLed,
    WriteLed(LedState),
    /// Print temperature notifications as they arrive
    Watch,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let address = |command: &'static str| match &words[1..] {
            [] => Ok(None),
            [address] => Ok(Some(address.to_uppercase())),
            _ => Err(CommandError::TooManyArguments { command }),
        };
        match words.as_slice() {
            ["hello"] | ["scan"] => Ok(Self::Scan),
            ["stop", "disc"] | ["stop"] => Ok(Self::StopScan),
            ["show"] => Ok(Self::Show),
            ["connect", ..] => Ok(Self::Connect(address("connect")?)),
            ["disconnect", ..] => Ok(Self::Disconnect(address("disconnect")?)),
            ["temp"] => Ok(Self::Temperature),
            ["LED"] | ["led"] => Ok(Self::ReadLed),
            ["ON"] | ["on"] => Ok(Self::WriteLed(LedState::On)),
            ["OFF"] | ["off"] => Ok(Self::WriteLed(LedState::Off)),
            ["watch"] => Ok(Self::Watch),
            ["help"] => Ok(Self::Help),
            ["quit"] | ["exit"] => Ok(Self::Quit),
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::StopScan => write!(f, "stop"),
            Self::Show => write!(f, "show"),
            Self::Connect(Some(address)) => write!(f, "connect {}", address),
            Self::Connect(None) => write!(f, "connect"),
            Self::Disconnect(Some(address)) => write!(f, "disconnect {}", address),
            Self::Disconnect(None) => write!(f, "disconnect"),
            Self::Temperature => write!(f, "temp"),
            Self::ReadLed => write!(f, "LED"),
            Self::WriteLed(state) => write!(f, "{}", state),
            Self::Watch => write!(f, "watch"),
            Self::Help => write!(f, "help"),
            Self::Quit => write!(f, "quit"),
        }
    }
}

pub const HELP: &str = "\
commands:
  scan | hello           start discovery
  stop | stop disc       stop discovery and list discovered devices
  show                   list known device addresses
  connect [ADDRESS]      connect to one or all known devices
  disconnect [ADDRESS]   disconnect one or all known devices
  temp                   read the temperature
  LED                    read the LED state
  ON | OFF               switch the LED
  watch                  print temperature notifications
  quit                   leave";

/// Runs `command`. Returns false when the console should exit.
pub async fn execute(app_state: &AppState, command: Command) -> bool {
    info!("Executing command: {}", command);
    match command {
        Command::Scan => {
            if let Err(e) = start_scan(app_state).await {
                error!("{}", e);
            }
        }
        Command::StopScan => match stop_scan(app_state).await {
            Ok(addresses) => {
                println!("====> Discovered devices: <====");
                for address in addresses {
                    println!("{}", address);
                }
                println!("================================");
            }
            Err(e) => error!("{}", e),
        },
        Command::Show => {
            let manager = app_state.bluetooth_manager.lock().await;
            for record in manager.devices() {
                println!(
                    "{} {} ({:?})",
                    record.address.as_deref().unwrap_or("<unknown>"),
                    record.display_name(),
                    record.state
                );
            }
        }
        Command::Connect(address) => spawn_connect(app_state, address).await,
        Command::Disconnect(address) => spawn_disconnect(app_state, address).await,
        Command::Temperature => {
            let access = app_state.bluetooth_manager.lock().await.access();
            tokio::spawn(async move {
                match access.read_temperature().await {
                    Ok(celsius) => println!("Temperature: {:.1} °C", celsius),
                    Err(e) => report(e),
                }
            });
        }
        Command::ReadLed => {
            let access = app_state.bluetooth_manager.lock().await.access();
            tokio::spawn(async move {
                match access.read_led().await {
                    Ok(state) => println!("LED is {}", state),
                    Err(e) => report(e),
                }
            });
        }
        Command::WriteLed(state) => {
            let access = app_state.bluetooth_manager.lock().await.access();
            tokio::spawn(async move {
                match access.write_led(state).await {
                    Ok(()) => println!("LED switched {}", state),
                    Err(e) => report(e),
                }
            });
        }
        Command::Watch => {
            let subscription = app_state.bluetooth_manager.lock().await.subscribe_temperature().await;
            match subscription {
                Ok(mut values) => {
                    tokio::spawn(async move {
                        while let Some(value) = values.recv().await {
                            match decode_temperature(&value) {
                                Some(celsius) => println!("Temperature: {:.1} °C", celsius),
                                None => error!("Malformed temperature notification: {:02x?}", value),
                            }
                        }
                    });
                }
                Err(e) => report(e),
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return false,
    }
    true
}

fn report(e: GattError) {
    match e {
        GattError::NotResolved(_) => {
            error!("{}; connect to a device exposing it first", e)
        }
        other => error!("{}", other),
    }
}

pub async fn start_scan(app_state: &AppState) -> Result<(), String> {
    let mut bluetooth_manager_guard = app_state.bluetooth_manager.lock().await;
    bluetooth_manager_guard.start_scan().await.map_err(|e| e.to_string())
}

pub async fn stop_scan(app_state: &AppState) -> Result<Vec<String>, String> {
    let mut bluetooth_manager_guard = app_state.bluetooth_manager.lock().await;
    bluetooth_manager_guard.stop_scan().await.map_err(|e| e.to_string())
}

async fn spawn_connect(app_state: &AppState, address: Option<String>) {
    let connection_manager = app_state.bluetooth_manager.lock().await.connection_manager();
    tokio::spawn(async move {
        match address {
            Some(address) => {
                if let Err(e) = connection_manager.connect(&address).await {
                    report(e);
                } else {
                    println!("{} connected", address);
                }
            }
            None => {
                for (address, result) in connection_manager.connect_all().await {
                    match result {
                        Ok(_) => println!("{} connected", address),
                        Err(e) => report(e),
                    }
                }
            }
        }
    });
}

async fn spawn_disconnect(app_state: &AppState, address: Option<String>) {
    let connection_manager = app_state.bluetooth_manager.lock().await.connection_manager();
    tokio::spawn(async move {
        match address {
            Some(address) => match connection_manager.disconnect(&address).await {
                Ok(()) => println!("{} disconnected", address),
                Err(e) => report(e),
            },
            None => {
                for (address, result) in connection_manager.disconnect_all().await {
                    match result {
                        Ok(()) => println!("{} disconnected", address),
                        Err(e) => report(e),
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_console_words() {
        assert_eq!("hello".parse(), Ok(Command::Scan));
        assert_eq!("stop disc".parse(), Ok(Command::StopScan));
        assert_eq!("  temp ".parse(), Ok(Command::Temperature));
        assert_eq!("LED".parse(), Ok(Command::ReadLed));
        assert_eq!("ON".parse(), Ok(Command::WriteLed(LedState::On)));
        assert_eq!("OFF".parse(), Ok(Command::WriteLed(LedState::Off)));
        assert_eq!("connect".parse(), Ok(Command::Connect(None)));
        assert_eq!(
            "connect b8:27:eb:00:00:01".parse(),
            Ok(Command::Connect(Some("B8:27:EB:00:00:01".to_string())))
        );
    }

    #[test]
    fn test_rejects_unknown_and_extra_arguments() {
        assert_eq!(
            "write".parse::<Command>(),
            Err(CommandError::Unknown("write".to_string()))
        );
        assert_eq!(
            "disconnect a b".parse::<Command>(),
            Err(CommandError::TooManyArguments { command: "disconnect" })
        );
    }
}
