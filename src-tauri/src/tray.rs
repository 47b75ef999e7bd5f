// System tray model
// Menu entries and icon state that the host commands mutate

use std::sync::Mutex;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::TrayError;

pub const PRIMARY_ITEM_ID: &str = "js-count";
pub const QUIT_ITEM_ID: &str = "quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrayIconKind {
    #[default]
    Default,
    Notification,
}

impl TrayIconKind {
    /// Maps the `set_icon` argument onto an icon. An empty name clears the
    /// notification badge.
    pub fn from_name(name: &str) -> Result<Self, TrayError> {
        match name {
            "" | "default" => Ok(TrayIconKind::Default),
            "notification" => Ok(TrayIconKind::Notification),
            other => Err(TrayError::UnknownIcon(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrayModel {
    pub items: Vec<MenuEntry>,
    pub icon: TrayIconKind,
}

impl Default for TrayModel {
    fn default() -> Self {
        TrayModel {
            items: vec![MenuEntry {
                id: PRIMARY_ITEM_ID.to_string(),
                title: "JS count: 0".to_string(),
            }],
            icon: TrayIconKind::Default,
        }
    }
}

impl TrayModel {
    pub fn set_primary_title(&mut self, title: &str) {
        match self.items.iter_mut().find(|item| item.id == PRIMARY_ITEM_ID) {
            Some(item) => item.title = title.to_string(),
            None => self.items.insert(
                0,
                MenuEntry {
                    id: PRIMARY_ITEM_ID.to_string(),
                    title: title.to_string(),
                },
            ),
        }
    }

    /// Appends an entry, or retitles the existing entry with the same id.
    pub fn add_item(&mut self, id: &str, title: &str) {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                debug!("Menu item {} already present, updating title", id);
                item.title = title.to_string();
            }
            None => self.items.push(MenuEntry {
                id: id.to_string(),
                title: title.to_string(),
            }),
        }
    }

    pub fn item(&self, id: &str) -> Option<&MenuEntry> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Something the host can draw the tray onto.
pub trait TrayBackend: Send + Sync + 'static {
    fn set_primary_title(&self, title: &str) -> Result<(), TrayError>;
    fn add_item(&self, id: &str, title: &str) -> Result<(), TrayError>;
    fn set_icon(&self, icon: TrayIconKind) -> Result<(), TrayError>;
    fn snapshot(&self) -> TrayModel;
}

/// Tray kept purely in memory, for the headless runner and tests.
#[derive(Debug, Default)]
pub struct MemoryTray {
    model: Mutex<TrayModel>,
}

impl MemoryTray {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_model<R>(&self, f: impl FnOnce(&mut TrayModel) -> R) -> R {
        let mut model = match self.model.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut model)
    }
}

impl TrayBackend for MemoryTray {
    fn set_primary_title(&self, title: &str) -> Result<(), TrayError> {
        info!("Tray title set to {:?}", title);
        self.with_model(|model| model.set_primary_title(title));
        Ok(())
    }

    fn add_item(&self, id: &str, title: &str) -> Result<(), TrayError> {
        info!("Tray item {} added as {:?}", id, title);
        self.with_model(|model| model.add_item(id, title));
        Ok(())
    }

    fn set_icon(&self, icon: TrayIconKind) -> Result<(), TrayError> {
        info!("Tray icon set to {:?}", icon);
        self.with_model(|model| model.icon = icon);
        Ok(())
    }

    fn snapshot(&self) -> TrayModel {
        self.with_model(|model| model.clone())
    }
}
