//! Host-side command handlers and the periodic event emitter.
//!
//! [`Host`] is what answers the view's `invoke` calls. The same methods back
//! both the in-process [`LocalBridge`] and the Tauri commands of the desktop
//! shell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::bridge::{
    commands, events, AddMenuItemArgs, ApiRequestArgs, EventSink, IntervalActionArgs, LocalBridge,
    SetIconArgs, SetMenuItemArgs,
};
use crate::error::BridgeError;
use crate::query::SiteCache;
use crate::tray::{TrayBackend, TrayIconKind};

pub struct Host {
    tray: Arc<dyn TrayBackend>,
    sites: Arc<SiteCache>,
    interval_calls: AtomicU64,
}

impl Host {
    pub fn new(tray: Arc<dyn TrayBackend>, sites: Arc<SiteCache>) -> Self {
        Host {
            tray,
            sites,
            interval_calls: AtomicU64::new(0),
        }
    }

    /// Echoes `msg` with a 1-based call counter.
    pub fn interval_action(&self, msg: &str) -> String {
        let n = self.interval_calls.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("interval_action #{}: {}", n, msg);
        format!("{} #{}", msg, n)
    }

    pub fn set_menu_item(&self, title: &str) -> Result<(), BridgeError> {
        self.tray
            .set_primary_title(title)
            .map_err(|e| BridgeError::handler(commands::SET_MENU_ITEM, e.to_string()))
    }

    pub fn add_menu_item(&self, id: &str, title: &str) -> Result<(), BridgeError> {
        self.tray
            .add_item(id, title)
            .map_err(|e| BridgeError::handler(commands::ADD_MENU_ITEM, e.to_string()))
    }

    pub fn set_icon(&self, name: &str) -> Result<(), BridgeError> {
        let icon = TrayIconKind::from_name(name)
            .map_err(|e| BridgeError::invalid_arguments(commands::SET_ICON, e.to_string()))?;
        self.tray
            .set_icon(icon)
            .map_err(|e| BridgeError::handler(commands::SET_ICON, e.to_string()))
    }

    /// Lists sites through the host's Fathom client.
    pub async fn api_request(&self, msg: &str) -> Result<Value, BridgeError> {
        info!("api_request: {}", msg);
        let sites = self.sites.get().await.map_err(|e| {
            error!("api_request failed: {}", e);
            BridgeError::handler(commands::API_REQUEST, e.to_string())
        })?;

        Ok(json!({
            "msg": msg,
            "count": sites.len(),
            "sites": sites.as_ref(),
        }))
    }

    /// Wires every command onto `bridge`.
    pub fn register(self: &Arc<Self>, bridge: &LocalBridge) {
        let host = Arc::clone(self);
        bridge.register_typed(commands::INTERVAL_ACTION, move |args: IntervalActionArgs| {
            let reply = host.interval_action(&args.msg);
            async move { Ok(reply) }
        });

        let host = Arc::clone(self);
        bridge.register_typed(commands::SET_MENU_ITEM, move |args: SetMenuItemArgs| {
            let result = host.set_menu_item(&args.title);
            async move { result }
        });

        let host = Arc::clone(self);
        bridge.register_typed(commands::ADD_MENU_ITEM, move |args: AddMenuItemArgs| {
            let result = host.add_menu_item(&args.id, &args.title);
            async move { result }
        });

        let host = Arc::clone(self);
        bridge.register_typed(commands::SET_ICON, move |args: SetIconArgs| {
            let result = host.set_icon(&args.name);
            async move { result }
        });

        let host = Arc::clone(self);
        bridge.register_typed(commands::API_REQUEST, move |args: ApiRequestArgs| {
            let host = Arc::clone(&host);
            async move { host.api_request(&args.msg).await }
        });
    }
}

/// Shortest period a ticker runs at; tokio panics on a zero period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Ticker whose first tick comes one period from now. Missed ticks are skipped.
pub(crate) fn periodic(period: Duration) -> Interval {
    let period = if period < MIN_PERIOD {
        warn!("Period {:?} is below {:?}, clamping", period, MIN_PERIOD);
        MIN_PERIOD
    } else {
        period
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Background task emitting `rs_js_emit`. Stops when dropped.
pub struct EmitterHandle {
    task: JoinHandle<()>,
}

impl EmitterHandle {
    pub fn stop(self) {}
}

impl Drop for EmitterHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Emits `{count, message}` on `rs_js_emit` every `period`, first after one period.
pub fn spawn_emitter(sink: Arc<dyn EventSink>, period: Duration, message: String) -> EmitterHandle {
    let task = tokio::spawn(async move {
        let mut ticker = periodic(period);
        let mut count: u64 = 0;

        loop {
            ticker.tick().await;
            count += 1;
            let payload = json!({ "count": count, "message": message });
            if let Err(e) = sink.emit_event(events::RS_JS_EMIT, payload) {
                error!("Failed to emit {}: {}", events::RS_JS_EMIT, e);
            }
        }
    });

    EmitterHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{invoke_typed, BridgeEvent, HostBridge};
    use crate::fathom::FathomClient;
    use crate::tray::{MemoryTray, PRIMARY_ITEM_ID};
    use std::sync::Mutex;

    fn test_host() -> (Arc<Host>, Arc<MemoryTray>, LocalBridge) {
        let tray = Arc::new(MemoryTray::new());
        // Nothing listens here; api_request is covered by the wiremock tests
        let client = FathomClient::new("http://127.0.0.1:9/v1", "token").unwrap();
        let sites = Arc::new(SiteCache::new(client, Duration::from_secs(60)));
        let host = Arc::new(Host::new(tray.clone(), sites));
        let bridge = LocalBridge::new();
        host.register(&bridge);
        (host, tray, bridge)
    }

    #[test]
    fn test_interval_action_counts_calls() {
        let (host, _, _) = test_host();
        assert_eq!(host.interval_action("interval msg"), "interval msg #1");
        assert_eq!(host.interval_action("interval msg"), "interval msg #2");
    }

    #[tokio::test]
    async fn test_commands_reach_the_tray() {
        let (_, tray, bridge) = test_host();

        let _: () = invoke_typed(&bridge, commands::SET_MENU_ITEM, &SetMenuItemArgs { title: "JS count: 10".into() })
            .await
            .unwrap();
        let _: () = invoke_typed(
            &bridge,
            commands::ADD_MENU_ITEM,
            &AddMenuItemArgs { id: "custom-10".into(), title: "New JS count 10".into() },
        )
        .await
        .unwrap();
        let _: () = invoke_typed(&bridge, commands::SET_ICON, &SetIconArgs { name: "notification".into() })
            .await
            .unwrap();

        let model = tray.snapshot();
        assert_eq!(model.item(PRIMARY_ITEM_ID).unwrap().title, "JS count: 10");
        assert_eq!(model.item("custom-10").unwrap().title, "New JS count 10");
        assert_eq!(model.icon, TrayIconKind::Notification);
    }

    #[tokio::test]
    async fn test_unknown_icon_is_invalid_arguments() {
        let (_, tray, bridge) = test_host();
        let result: Result<(), _> =
            invoke_typed(&bridge, commands::SET_ICON, &SetIconArgs { name: "rocket".into() }).await;

        assert!(matches!(result, Err(BridgeError::InvalidArguments { .. })));
        assert_eq!(tray.snapshot().icon, TrayIconKind::Default);
    }

    #[tokio::test]
    async fn test_api_request_failure_is_a_handler_error() {
        let (_, _, bridge) = test_host();
        let result = bridge
            .invoke(commands::API_REQUEST, crate::bridge::to_argument_map("api_request", &ApiRequestArgs { msg: "api msg".into() }).unwrap())
            .await;
        assert!(matches!(result, Err(BridgeError::Handler { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitter_ticks_until_dropped() {
        let bridge = LocalBridge::new();
        let seen: Arc<Mutex<Vec<BridgeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = bridge.listen(
            events::RS_JS_EMIT,
            Arc::new(move |event: &BridgeEvent| sink.lock().unwrap().push(event.clone())),
        );

        let emitter = spawn_emitter(Arc::new(bridge.clone()), Duration::from_secs(5), "hello".into());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(5_200)).await;
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].payload, json!({ "count": 2, "message": "hello" }));
        }

        emitter.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_emitter_still_ticks() {
        let bridge = LocalBridge::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let _sub = bridge.listen(
            events::RS_JS_EMIT,
            Arc::new(move |_: &BridgeEvent| *sink.lock().unwrap() += 1),
        );

        let _emitter = spawn_emitter(Arc::new(bridge.clone()), Duration::ZERO, "hello".into());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(*seen.lock().unwrap() >= 5);
    }
}
