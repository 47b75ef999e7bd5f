//! Command/event bridge between the view and the host.
//!
//! The view only sees [`HostBridge`]: `invoke` a named command with a JSON
//! argument object, or `listen` to a named event stream. [`LocalBridge`] is
//! the in-process implementation used by the headless runner and the tests;
//! the desktop shell exposes the same command names to the webview.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// Command names understood by the host.
pub mod commands {
    pub const INTERVAL_ACTION: &str = "interval_action";
    pub const SET_MENU_ITEM: &str = "set_menu_item";
    pub const ADD_MENU_ITEM: &str = "add_menu_item";
    pub const SET_ICON: &str = "set_icon";
    pub const API_REQUEST: &str = "api_request";
}

/// Event names pushed by the host.
pub mod events {
    pub const RS_JS_EMIT: &str = "rs_js_emit";
}

pub type BridgeFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
pub type EventHandler = Arc<dyn Fn(&BridgeEvent) + Send + Sync + 'static>;
type CommandHandler = Arc<dyn Fn(Map<String, Value>) -> BridgeFuture<Result<Value, BridgeError>> + Send + Sync>;

/// A host-pushed notification as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub event: String,
    pub id: u64,
    pub payload: Value,
}

// Argument objects, one per command

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalActionArgs {
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMenuItemArgs {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMenuItemArgs {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetIconArgs {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestArgs {
    pub msg: String,
}

/// The view's side of the bridge.
///
/// Calls are independent: there is no ordering guarantee between concurrent
/// `invoke`s and no way to cancel one in flight.
pub trait HostBridge: Send + Sync + 'static {
    fn invoke(&self, command: &str, args: Map<String, Value>) -> BridgeFuture<Result<Value, BridgeError>>;

    /// Registers `handler` for every event named `event` until the returned
    /// [`Subscription`] is dropped.
    fn listen(&self, event: &str, handler: EventHandler) -> Subscription;
}

/// The host's side of the event channel.
pub trait EventSink: Send + Sync + 'static {
    fn emit_event(&self, event: &str, payload: Value) -> Result<(), BridgeError>;
}

/// Registration handle returned by [`HostBridge::listen`].
///
/// Releases the registration when dropped.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    event: String,
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(event: &str, id: u64, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription {
            event: event.to_string(),
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            trace!("Releasing listener {} for {}", self.id, self.event);
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Serializes `args` into the JSON object a command expects.
pub fn to_argument_map<A: Serialize + ?Sized>(command: &str, args: &A) -> Result<Map<String, Value>, BridgeError> {
    match serde_json::to_value(args)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(BridgeError::invalid_arguments(
            command,
            format!("expected an object, got {other}"),
        )),
    }
}

/// `invoke` with a typed argument struct and a typed result.
pub async fn invoke_typed<B, A, T>(bridge: &B, command: &str, args: &A) -> Result<T, BridgeError>
where
    B: HostBridge + ?Sized,
    A: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let args = to_argument_map(command, args)?;
    let value = bridge.invoke(command, args).await?;
    Ok(serde_json::from_value(value)?)
}

#[derive(Default)]
struct LocalInner {
    commands: RwLock<HashMap<String, CommandHandler>>,
    listeners: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_listener: AtomicU64,
    next_event: AtomicU64,
}

/// In-process bridge: a command router plus an event hub.
#[derive(Clone, Default)]
pub struct LocalBridge {
    inner: Arc<LocalInner>,
}

impl LocalBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw handler receiving the argument object as-is.
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F, Fut>(&self, command: &str, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BridgeError>> + Send + 'static,
    {
        let handler: CommandHandler =
            Arc::new(move |args| -> BridgeFuture<Result<Value, BridgeError>> { Box::pin(handler(args)) });
        let mut commands = match self.inner.commands.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if commands.insert(command.to_string(), handler).is_some() {
            warn!("Replacing handler for command {}", command);
        }
        debug!("Registered command {}", command);
    }

    /// Registers a handler with typed arguments and result.
    pub fn register_typed<A, T, F, Fut>(&self, command: &str, handler: F)
    where
        A: DeserializeOwned + Send + 'static,
        T: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BridgeError>> + Send + 'static,
    {
        let name = command.to_string();
        let handler = Arc::new(handler);
        self.register(command, move |args| {
            let name = name.clone();
            let handler = Arc::clone(&handler);
            async move {
                let args: A = serde_json::from_value(Value::Object(args))
                    .map_err(|e| BridgeError::invalid_arguments(&name, e.to_string()))?;
                let result = handler(args).await?;
                Ok(serde_json::to_value(result)?)
            }
        });
    }

    pub fn has_command(&self, command: &str) -> bool {
        match self.inner.commands.read() {
            Ok(commands) => commands.contains_key(command),
            Err(poisoned) => poisoned.into_inner().contains_key(command),
        }
    }

    /// Delivers an event to every listener registered for `event`.
    /// Returns how many listeners were reached.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        let handlers: Vec<EventHandler> = {
            let listeners = self.lock_listeners();
            listeners
                .get(event)
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        let delivered = BridgeEvent {
            event: event.to_string(),
            id: self.inner.next_event.fetch_add(1, Ordering::Relaxed),
            payload,
        };

        trace!("Emitting {} (id {}) to {} listener(s)", event, delivered.id, handlers.len());
        for handler in &handlers {
            handler(&delivered);
        }
        handlers.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.lock_listeners().get(event).map_or(0, Vec::len)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(u64, EventHandler)>>> {
        match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl HostBridge for LocalBridge {
    fn invoke(&self, command: &str, args: Map<String, Value>) -> BridgeFuture<Result<Value, BridgeError>> {
        let handler = match self.inner.commands.read() {
            Ok(commands) => commands.get(command).cloned(),
            Err(poisoned) => poisoned.into_inner().get(command).cloned(),
        };

        match handler {
            Some(handler) => {
                debug!("Invoking {}", command);
                handler(args)
            }
            None => {
                warn!("Invoke of unknown command {}", command);
                let command = command.to_string();
                Box::pin(async move { Err(BridgeError::UnknownCommand(command)) })
            }
        }
    }

    fn listen(&self, event: &str, handler: EventHandler) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        debug!("Listener {} registered for {}", id, event);

        let weak: Weak<LocalInner> = Arc::downgrade(&self.inner);
        let name = event.to_string();
        Subscription::new(event, id, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut listeners = match inner.listeners.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entries) = listeners.get_mut(&name) {
                entries.retain(|(listener_id, _)| *listener_id != id);
                if entries.is_empty() {
                    listeners.remove(&name);
                }
            }
        })
    }
}

impl EventSink for LocalBridge {
    fn emit_event(&self, event: &str, payload: Value) -> Result<(), BridgeError> {
        self.emit(event, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let bridge = LocalBridge::new();
        let result = bridge.invoke("nope", Map::new()).await;
        assert!(matches!(result, Err(BridgeError::UnknownCommand(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn test_typed_handler_round_trip() {
        let bridge = LocalBridge::new();
        bridge.register_typed(commands::INTERVAL_ACTION, |args: IntervalActionArgs| async move {
            Ok(format!("got {}", args.msg))
        });

        let reply: String = invoke_typed(
            &bridge,
            commands::INTERVAL_ACTION,
            &IntervalActionArgs { msg: "hi".to_string() },
        )
        .await
        .unwrap();
        assert_eq!(reply, "got hi");
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_missing_fields() {
        let bridge = LocalBridge::new();
        bridge.register_typed(commands::ADD_MENU_ITEM, |_args: AddMenuItemArgs| async move { Ok(()) });

        let mut args = Map::new();
        args.insert("id".to_string(), json!("custom-1"));
        let result = bridge.invoke(commands::ADD_MENU_ITEM, args).await;
        assert!(matches!(result, Err(BridgeError::InvalidArguments { .. })));
    }

    #[test]
    fn test_non_object_arguments_are_rejected() {
        let result = to_argument_map("set_icon", &"notification");
        assert!(matches!(result, Err(BridgeError::InvalidArguments { .. })));
        assert!(to_argument_map("set_icon", &()).unwrap().is_empty());
    }

    #[test]
    fn test_emit_reaches_only_matching_listeners() {
        let bridge = LocalBridge::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = bridge.listen(
            events::RS_JS_EMIT,
            Arc::new(move |event: &BridgeEvent| sink.lock().unwrap().push(event.payload.clone())),
        );

        assert_eq!(bridge.emit("other", json!(0)), 0);
        assert_eq!(bridge.emit(events::RS_JS_EMIT, json!(1)), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let bridge = LocalBridge::new();
        let sub = bridge.listen(events::RS_JS_EMIT, Arc::new(|_: &BridgeEvent| {}));
        let other = bridge.listen(events::RS_JS_EMIT, Arc::new(|_: &BridgeEvent| {}));
        assert_eq!(bridge.listener_count(events::RS_JS_EMIT), 2);

        drop(sub);
        assert_eq!(bridge.listener_count(events::RS_JS_EMIT), 1);

        other.unsubscribe();
        assert_eq!(bridge.listener_count(events::RS_JS_EMIT), 0);
        assert_eq!(bridge.emit(events::RS_JS_EMIT, json!(null)), 0);
    }

    #[test]
    fn test_subscription_outliving_bridge_is_harmless() {
        let bridge = LocalBridge::new();
        let sub = bridge.listen(events::RS_JS_EMIT, Arc::new(|_: &BridgeEvent| {}));
        drop(bridge);
        drop(sub);
    }

    #[test]
    fn test_event_ids_increase() {
        let bridge = LocalBridge::new();
        let ids = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ids);
        let _sub = bridge.listen("tick", Arc::new(move |e: &BridgeEvent| sink.lock().unwrap().push(e.id)));

        bridge.emit("tick", json!(1));
        bridge.emit("tick", json!(2));
        let ids = ids.lock().unwrap();
        assert!(ids[0] < ids[1]);
    }
}
