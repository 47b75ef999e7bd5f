//! Tauri shell: a tray-only desktop app.
//!
//! The host commands are exposed to webviews as Tauri commands, and the
//! view runs in-process against a [`LocalBridge`] bound to the same host.
//! Its buttons and read-only panels live in the tray menu.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{debug, error, info};
use serde_json::Value;
use tauri::image::Image;
use tauri::menu::{Menu, MenuItem, PredefinedMenuItem};
use tauri::tray::TrayIconBuilder;
use tauri::{AppHandle, Emitter, Manager, State};

use crate::bridge::{EventSink, HostBridge, LocalBridge};
use crate::config::ConfigManager;
use crate::error::{BridgeError, TrayError};
use crate::host::{spawn_emitter, EmitterHandle, Host};
use crate::query::SiteCache;
use crate::tray::{TrayBackend, TrayIconKind, TrayModel, QUIT_ITEM_ID};
use crate::view::{Action, View, ViewOptions, ViewState};

const TRAY_ID: &str = "main";
const ACTION_ID_PREFIX: &str = "action:";

struct ShellState {
    host: Arc<Host>,
    view: View,
    _emitter: EmitterHandle,
}

struct AppEmitter(AppHandle);

impl EventSink for AppEmitter {
    fn emit_event(&self, event: &str, payload: Value) -> Result<(), BridgeError> {
        self.0
            .emit(event, payload)
            .map_err(|e| BridgeError::handler(event, e.to_string()))
    }
}

/// Tray icon and menu drawn from a [`TrayModel`] plus the view's panels.
struct TauriTray {
    app: AppHandle,
    model: Mutex<TrayModel>,
    status: Mutex<Vec<String>>,
}

fn backend_error(e: tauri::Error) -> TrayError {
    TrayError::Backend(e.to_string())
}

fn tray_icon(kind: TrayIconKind) -> tauri::Result<Image<'static>> {
    match kind {
        TrayIconKind::Default => Image::from_bytes(include_bytes!("../icons/tray.png")),
        TrayIconKind::Notification => Image::from_bytes(include_bytes!("../icons/tray-notification.png")),
    }
}

fn build_menu(app: &AppHandle, model: &TrayModel, status: &[String]) -> tauri::Result<Menu<tauri::Wry>> {
    let menu = Menu::new(app)?;

    for item in &model.items {
        menu.append(&MenuItem::with_id(app, item.id.as_str(), &item.title, true, None::<&str>)?)?;
    }
    menu.append(&PredefinedMenuItem::separator(app)?)?;

    for (i, action) in Action::buttons().iter().enumerate() {
        let id = format!("{}{}", ACTION_ID_PREFIX, i);
        menu.append(&MenuItem::with_id(app, id, action.label(), true, None::<&str>)?)?;
    }

    if !status.is_empty() {
        menu.append(&PredefinedMenuItem::separator(app)?)?;
        for (i, line) in status.iter().enumerate() {
            menu.append(&MenuItem::with_id(app, format!("status:{}", i), line, false, None::<&str>)?)?;
        }
    }

    menu.append(&PredefinedMenuItem::separator(app)?)?;
    menu.append(&MenuItem::with_id(app, QUIT_ITEM_ID, "Quit", true, None::<&str>)?)?;
    Ok(menu)
}

impl TauriTray {
    fn new(app: AppHandle) -> Self {
        TauriTray {
            app,
            model: Mutex::new(TrayModel::default()),
            status: Mutex::new(Vec::new()),
        }
    }

    fn with_model<R>(&self, f: impl FnOnce(&mut TrayModel) -> R) -> R {
        let mut model = match self.model.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut model)
    }

    fn status_lines(&self) -> Vec<String> {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_status(&self, lines: Vec<String>) -> Result<(), TrayError> {
        match self.status.lock() {
            Ok(mut status) => *status = lines,
            Err(poisoned) => *poisoned.into_inner() = lines,
        }
        self.redraw()
    }

    fn redraw(&self) -> Result<(), TrayError> {
        // Nothing to draw onto until setup has built the icon
        let Some(tray) = self.app.tray_by_id(TRAY_ID) else {
            return Ok(());
        };
        let model = self.snapshot();

        let menu = build_menu(&self.app, &model, &self.status_lines()).map_err(backend_error)?;
        tray.set_menu(Some(menu)).map_err(backend_error)?;
        tray.set_icon(Some(tray_icon(model.icon).map_err(backend_error)?))
            .map_err(backend_error)
    }
}

impl TrayBackend for TauriTray {
    fn set_primary_title(&self, title: &str) -> Result<(), TrayError> {
        self.with_model(|model| model.set_primary_title(title));
        self.redraw()
    }

    fn add_item(&self, id: &str, title: &str) -> Result<(), TrayError> {
        self.with_model(|model| model.add_item(id, title));
        self.redraw()
    }

    fn set_icon(&self, icon: TrayIconKind) -> Result<(), TrayError> {
        self.with_model(|model| model.icon = icon);
        self.redraw()
    }

    fn snapshot(&self) -> TrayModel {
        self.with_model(|model| model.clone())
    }
}

fn status_for(state: &ViewState) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(message) = &state.interval_message {
        lines.push(format!("js -> rs: {}", message));
    }
    if let Some(event) = &state.latest_event {
        lines.push(format!("rs -> js: {}", event.payload));
    }
    lines
}

// Tauri commands, same names and arguments as the LocalBridge routes

#[tauri::command]
async fn interval_action(state: State<'_, ShellState>, msg: String) -> Result<String, String> {
    Ok(state.host.interval_action(&msg))
}

#[tauri::command]
async fn set_menu_item(state: State<'_, ShellState>, title: String) -> Result<(), String> {
    state.host.set_menu_item(&title).map_err(|e| {
        error!("set_menu_item failed: {}", e);
        e.to_string()
    })
}

#[tauri::command]
async fn add_menu_item(state: State<'_, ShellState>, id: String, title: String) -> Result<(), String> {
    state.host.add_menu_item(&id, &title).map_err(|e| {
        error!("add_menu_item failed: {}", e);
        e.to_string()
    })
}

#[tauri::command]
async fn set_icon(state: State<'_, ShellState>, name: String) -> Result<(), String> {
    state.host.set_icon(&name).map_err(|e| {
        error!("set_icon failed: {}", e);
        e.to_string()
    })
}

#[tauri::command]
async fn api_request(state: State<'_, ShellState>, msg: String) -> Result<Value, String> {
    state.host.api_request(&msg).await.map_err(|e| e.to_string())
}

fn on_menu_event(app: &AppHandle, id: &str) {
    if id == QUIT_ITEM_ID {
        info!("Quit requested from tray");
        app.exit(0);
        return;
    }

    let Some(index) = id.strip_prefix(ACTION_ID_PREFIX).and_then(|i| i.parse::<usize>().ok()) else {
        debug!("Tray menu item {} clicked", id);
        return;
    };
    let Some(action) = Action::buttons().into_iter().nth(index) else {
        return;
    };

    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        let state = app.state::<ShellState>();
        let _ = state.view.press(action);
    });
}

pub fn run(config_manager: ConfigManager) -> Result<()> {
    let config = config_manager.get_config().clone();
    let emit_period = config_manager.emit_period();

    tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(if cfg!(debug_assertions) {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                })
                .targets([
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
                    tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::LogDir { file_name: None }),
                ])
                .build(),
        )
        .invoke_handler(tauri::generate_handler![
            interval_action,
            set_menu_item,
            add_menu_item,
            set_icon,
            api_request,
        ])
        .setup(move |app| {
            info!("[BACKEND] Setting up tray");
            let handle = app.handle().clone();

            // Without the icon the model still tracks commands; redraw finds no tray
            let tray = Arc::new(TauriTray::new(handle.clone()));
            if config.application.system_tray.enabled {
                let menu = build_menu(&handle, &tray.snapshot(), &[])?;
                TrayIconBuilder::with_id(TRAY_ID)
                    .icon(tray_icon(TrayIconKind::Default)?)
                    .tooltip(&config.application.system_tray.tooltip)
                    .menu(&menu)
                    .show_menu_on_left_click(true)
                    .on_menu_event(|app, event| on_menu_event(app, event.id.as_ref()))
                    .build(app)?;
            } else {
                info!("[BACKEND] System tray disabled in configuration, skipping tray icon");
            }

            let sites = Arc::new(SiteCache::from_config(&config.fathom)?);
            let host = Arc::new(Host::new(tray.clone(), Arc::clone(&sites)));
            let bridge = LocalBridge::new();
            host.register(&bridge);

            // Both the view and the emitter spawn tokio tasks
            let state = tauri::async_runtime::block_on(async {
                let sinks: Vec<Arc<dyn EventSink>> =
                    vec![Arc::new(AppEmitter(handle.clone())), Arc::new(bridge.clone())];
                let emitter = spawn_emitter(
                    Arc::new(FanOut(sinks)),
                    emit_period,
                    config.host.emit_message.clone(),
                );

                let bridge: Arc<dyn HostBridge> = Arc::new(bridge);
                let view = View::mount(bridge, Some(sites), ViewOptions::from(&config.view));

                let status_tray = Arc::clone(&tray);
                let view_handle = view.handle();
                let mut revisions = view_handle.watch();
                tokio::spawn(async move {
                    while revisions.changed().await.is_ok() {
                        if let Err(e) = status_tray.set_status(status_for(&view_handle.snapshot())) {
                            error!("Failed to refresh tray status: {}", e);
                        }
                    }
                });

                ShellState {
                    host,
                    view,
                    _emitter: emitter,
                }
            });

            app.manage(state);
            info!("[BACKEND] Application setup completed");
            Ok(())
        })
        .run(tauri::generate_context!())?;

    Ok(())
}

/// Emits to the webview and to the in-process view alike.
struct FanOut(Vec<Arc<dyn EventSink>>);

impl EventSink for FanOut {
    fn emit_event(&self, event: &str, payload: Value) -> Result<(), BridgeError> {
        let mut result = Ok(());
        for sink in &self.0 {
            if let Err(e) = sink.emit_event(event, payload.clone()) {
                result = Err(e);
            }
        }
        result
    }
}
