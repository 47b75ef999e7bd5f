use log::{error, info};

pub mod bridge;
pub mod config;
pub mod error;
pub mod fathom;
pub mod host;
pub mod logger;
pub mod query;
pub mod tray;
pub mod view;

#[cfg(not(feature = "desktop"))]
mod headless;
#[cfg(feature = "desktop")]
mod shell;

pub use bridge::{BridgeEvent, EventSink, HostBridge, LocalBridge, Subscription};
pub use config::{AppConfig, ConfigManager};
pub use error::{BridgeError, FetchError, TrayError};
pub use fathom::{FathomClient, Site};
pub use host::Host;
pub use query::SiteCache;
pub use view::{Action, View, ViewOptions, ViewState};

#[cfg_attr(all(feature = "desktop", mobile), tauri::mobile_entry_point)]
pub fn run() {
    let config_manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("[BACKEND] Failed to initialize configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // The desktop shell logs through tauri-plugin-log; only one global
    // logger can be installed per process.
    #[cfg(not(feature = "desktop"))]
    {
        let logging_config = &config_manager.get_config().logging;
        if let Err(e) = logger::Logger::setup_logging(logging_config) {
            eprintln!("[BACKEND] Failed to setup file logging: {:#}", e);
            env_logger::init();
            error!("[BACKEND] Falling back to basic logging due to setup error: {:#}", e);
        }
    }

    info!("[BACKEND] Starting {}", config_manager.get_config().application.name);
    info!("[BACKEND] Using config directory {:?}", config_manager.get_config_dir());

    #[cfg(feature = "desktop")]
    let result = shell::run(config_manager);
    #[cfg(not(feature = "desktop"))]
    let result = headless::run(config_manager);

    if let Err(e) = result {
        error!("[BACKEND] Application exited with error: {:#}", e);
        std::process::exit(1);
    }
}
