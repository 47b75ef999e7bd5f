//! The settings view.
//!
//! [`ViewState`] is the whole of what the screen shows, changed only through
//! its transition methods so it can be tested without a renderer. [`View`]
//! is a mounted instance: it owns the interval timer, the `rs_js_emit`
//! subscription and the site query, and releases all three on unmount.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::{
    commands, events, invoke_typed, to_argument_map, AddMenuItemArgs, ApiRequestArgs, BridgeEvent, HostBridge,
    IntervalActionArgs, SetIconArgs, SetMenuItemArgs, Subscription,
};
use crate::config::ViewConfig;
use crate::error::BridgeError;
use crate::fathom::Site;
use crate::host::periodic;
use crate::query::SiteCache;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryState<T> {
    #[default]
    Idle,
    Loading,
    Loaded(T),
    Failed(String),
}

impl<T> QueryState<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            QueryState::Loaded(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    pub launch_at_login: bool,
    pub active_site: Option<String>,
    pub api_key: String,
}

impl Default for SettingsForm {
    fn default() -> Self {
        SettingsForm {
            launch_at_login: true,
            active_site: None,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub form: SettingsForm,
    pub sites: QueryState<Arc<Vec<Site>>>,
    pub interval_message: Option<String>,
    pub latest_event: Option<BridgeEvent>,
}

impl ViewState {
    pub fn set_launch_at_login(&mut self, enabled: bool) {
        self.form.launch_at_login = enabled;
    }

    /// `None` or an empty id selects the placeholder.
    pub fn select_site(&mut self, id: Option<&str>) {
        self.form.active_site = id.filter(|id| !id.is_empty()).map(str::to_string);
    }

    pub fn set_api_key(&mut self, key: &str) {
        self.form.api_key = key.to_string();
    }

    pub fn sites_loading(&mut self) {
        self.sites = QueryState::Loading;
    }

    pub fn sites_loaded(&mut self, sites: Arc<Vec<Site>>) {
        self.sites = QueryState::Loaded(sites);
    }

    pub fn sites_failed(&mut self, reason: String) {
        self.sites = QueryState::Failed(reason);
    }

    pub fn interval_replied(&mut self, message: String) {
        self.interval_message = Some(message);
    }

    pub fn event_received(&mut self, event: BridgeEvent) {
        self.latest_event = Some(event);
    }

    /// The "Active site" select: a placeholder, then one option per site.
    pub fn select_options(&self) -> Vec<SelectOption> {
        let active = self.form.active_site.as_deref();
        let mut options = vec![SelectOption {
            value: String::new(),
            label: "Select".to_string(),
            selected: active.is_none(),
        }];

        if let Some(sites) = self.sites.data() {
            options.extend(sites.iter().map(|site| SelectOption {
                value: site.id.clone(),
                label: site.name.clone(),
                selected: active == Some(site.id.as_str()),
            }));
        }
        options
    }

    pub fn latest_event_json(&self) -> Option<String> {
        self.latest_event
            .as_ref()
            .and_then(|event| serde_json::to_string_pretty(event).ok())
    }

    pub fn render(&self, interval: Duration) -> String {
        let mut out = String::new();
        let check = |on: bool| if on { "[x]" } else { "[ ]" };

        let _ = writeln!(out, "General");
        let _ = writeln!(out, "  {} Launch at login", check(self.form.launch_at_login));
        let _ = writeln!(out, "  Active site");
        for option in self.select_options() {
            let marker = if option.selected { "(*)" } else { "( )" };
            let _ = writeln!(out, "    {} {}", marker, option.label);
        }

        let _ = writeln!(out, "Fathom");
        let _ = writeln!(out, "  API Key");
        let _ = writeln!(out, "  Enter a Fathom API Key to access your account");
        let _ = writeln!(out, "  [{}]", "*".repeat(self.form.api_key.chars().count()));

        for action in Action::buttons() {
            let _ = writeln!(out, "<{}>", action.label());
        }

        let every = interval.as_secs_f64();
        let _ = writeln!(out, "js -> rs (every {}s)", every);
        if let Some(message) = &self.interval_message {
            let _ = writeln!(out, "  {}", message);
        }

        let _ = writeln!(out, "rs -> js (every {}s)", every);
        if let Some(json) = self.latest_event_json() {
            for line in json.lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        out
    }
}

/// A button on the view. Each click issues exactly one bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MakeRequest,
    SetMenuItem,
    AddMenuItem,
    SetIcon(String),
}

impl Action {
    pub fn buttons() -> Vec<Action> {
        vec![
            Action::MakeRequest,
            Action::SetMenuItem,
            Action::AddMenuItem,
            Action::SetIcon("notification".to_string()),
            Action::SetIcon(String::new()),
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::MakeRequest => "make request",
            Action::SetMenuItem => "Set menu item",
            Action::AddMenuItem => "Add menu item",
            Action::SetIcon(name) if name.is_empty() => "Clear tray icon notifications",
            Action::SetIcon(_) => "Set tray icon notifications",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Action::MakeRequest => commands::API_REQUEST,
            Action::SetMenuItem => commands::SET_MENU_ITEM,
            Action::AddMenuItem => commands::ADD_MENU_ITEM,
            Action::SetIcon(_) => commands::SET_ICON,
        }
    }

    pub fn arguments(&self) -> Result<Map<String, Value>, BridgeError> {
        let command = self.command();
        match self {
            Action::MakeRequest => to_argument_map(command, &ApiRequestArgs { msg: "api msg".to_string() }),
            Action::SetMenuItem => to_argument_map(command, &SetMenuItemArgs { title: "JS count: 10".to_string() }),
            Action::AddMenuItem => to_argument_map(
                command,
                &AddMenuItemArgs {
                    id: "custom-10".to_string(),
                    title: "New JS count 10".to_string(),
                },
            ),
            Action::SetIcon(name) => to_argument_map(command, &SetIconArgs { name: name.clone() }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub interval: Duration,
    pub interval_message: String,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions {
            interval: Duration::from_secs(5),
            interval_message: "interval msg".to_string(),
        }
    }
}

impl From<&ViewConfig> for ViewOptions {
    fn from(config: &ViewConfig) -> Self {
        ViewOptions {
            interval: Duration::from_millis(config.interval_ms),
            interval_message: config.interval_message.clone(),
        }
    }
}

/// Shared handle on a view's state. Every update bumps a revision that
/// [`ViewHandle::watch`] receivers can wait on.
#[derive(Clone)]
pub struct ViewHandle {
    state: Arc<Mutex<ViewState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ViewHandle {
    fn new() -> Self {
        let (revision, _) = watch::channel(0);
        ViewHandle {
            state: Arc::new(Mutex::new(ViewState::default())),
            revision: Arc::new(revision),
        }
    }

    pub fn snapshot(&self) -> ViewState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        let result = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut state)
        };
        self.revision.send_modify(|revision| *revision += 1);
        result
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

/// A mounted view. Dropping it has the same effect as [`View::unmount`].
pub struct View {
    bridge: Arc<dyn HostBridge>,
    handle: ViewHandle,
    options: ViewOptions,
    timer: Option<JoinHandle<()>>,
    sites_task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl View {
    /// Starts the interval timer, subscribes to `rs_js_emit` and, given a
    /// site cache, loads the site list. Must be called inside a tokio runtime.
    pub fn mount(bridge: Arc<dyn HostBridge>, sites: Option<Arc<SiteCache>>, options: ViewOptions) -> View {
        let handle = ViewHandle::new();

        let listener = handle.clone();
        let subscription = bridge.listen(
            events::RS_JS_EMIT,
            Arc::new(move |event: &BridgeEvent| {
                listener.update(|state| state.event_received(event.clone()));
            }),
        );

        debug!("View listening on {} (listener {})", subscription.event(), subscription.id());

        let timer = tokio::spawn(run_interval(Arc::clone(&bridge), handle.clone(), options.clone()));

        let sites_task = sites.map(|cache| {
            handle.update(ViewState::sites_loading);
            let handle = handle.clone();
            tokio::spawn(async move {
                match cache.get().await {
                    Ok(sites) => {
                        debug!("View received {} site(s)", sites.len());
                        handle.update(|state| state.sites_loaded(sites));
                    }
                    Err(e) => {
                        warn!("Failed to load sites for view: {}", e);
                        handle.update(|state| state.sites_failed(e.to_string()));
                    }
                }
            })
        });

        info!("View mounted (interval {:?})", options.interval);
        View {
            bridge,
            handle,
            options,
            timer: Some(timer),
            sites_task,
            subscription: Some(subscription),
        }
    }

    pub fn handle(&self) -> ViewHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> ViewState {
        self.handle.snapshot()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        self.handle.update(f)
    }

    pub fn render(&self) -> String {
        self.snapshot().render(self.options.interval)
    }

    /// Issues the action's command and waits for the host's answer.
    pub async fn click(&self, action: &Action) -> Result<Value, BridgeError> {
        let args = action.arguments()?;
        self.bridge.invoke(action.command(), args).await
    }

    /// Fire-and-forget click. The request's answer is logged, the others are
    /// ignored.
    pub fn press(&self, action: Action) -> JoinHandle<()> {
        let bridge = Arc::clone(&self.bridge);
        tokio::spawn(async move {
            let outcome = match action.arguments() {
                Ok(args) => bridge.invoke(action.command(), args).await,
                Err(e) => Err(e),
            };

            match (&action, outcome) {
                (Action::MakeRequest, Ok(response)) => info!("{} -> {}", action.command(), response),
                (Action::MakeRequest, Err(e)) => warn!("{} failed: {}", action.command(), e),
                (_, result) => debug!("{} settled (ok: {})", action.command(), result.is_ok()),
            }
        })
    }

    /// Cancels the timer, releases the subscription and returns the final state.
    pub fn unmount(mut self) -> ViewState {
        self.teardown();
        info!("View unmounted");
        self.handle.snapshot()
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(task) = self.sites_task.take() {
            task.abort();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.teardown();
    }
}

// Ticks are serialized: the next call goes out only once the previous one has
// settled. Ticks that came due meanwhile collapse into one.
async fn run_interval(bridge: Arc<dyn HostBridge>, handle: ViewHandle, options: ViewOptions) {
    let mut ticker = periodic(options.interval);
    let args = IntervalActionArgs {
        msg: options.interval_message,
    };

    loop {
        ticker.tick().await;
        match invoke_typed::<_, _, String>(bridge.as_ref(), commands::INTERVAL_ACTION, &args).await {
            Ok(reply) => handle.update(|state| state.interval_replied(reply)),
            Err(e) => warn!("{} failed: {}", commands::INTERVAL_ACTION, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn site(id: &str, name: &str) -> Site {
        Site {
            id: id.to_string(),
            object: "site".to_string(),
            name: name.to_string(),
            sharing: "none".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_initial_state_is_unset() {
        let state = ViewState::default();
        assert!(state.form.launch_at_login);
        assert_eq!(state.interval_message, None);
        assert_eq!(state.latest_event, None);
        assert_eq!(state.sites, QueryState::Idle);
    }

    #[test]
    fn test_select_options_follow_loaded_sites() {
        let mut state = ViewState::default();
        assert_eq!(state.select_options().len(), 1);

        state.sites_loaded(Arc::new(vec![site("A", "Alpha"), site("B", "Beta")]));
        state.select_site(Some("B"));

        let options = state.select_options();
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].label, "Select");
        assert!(!options[0].selected);
        assert_eq!(options[2].value, "B");
        assert!(options[2].selected);

        state.select_site(Some(""));
        assert!(state.select_options()[0].selected);
    }

    #[test]
    fn test_failed_sites_render_no_options() {
        let mut state = ViewState::default();
        state.sites_failed("boom".to_string());
        assert_eq!(state.select_options().len(), 1);
        assert!(!state.render(Duration::from_secs(5)).contains("boom"));
    }

    #[test]
    fn test_latest_event_overwrites() {
        let mut state = ViewState::default();
        for (id, payload) in [(0, 1), (1, 2)] {
            state.event_received(BridgeEvent {
                event: events::RS_JS_EMIT.to_string(),
                id,
                payload: json!({ "payload": payload }),
            });
        }

        let shown = state.latest_event_json().unwrap();
        assert!(shown.contains("\"payload\": 2"));
        assert!(!shown.contains("\"payload\": 1"));
    }

    #[test]
    fn test_render_lists_panels_and_buttons() {
        let mut state = ViewState::default();
        state.set_api_key("abc");
        state.interval_replied("interval msg #3".to_string());

        let rendered = state.render(Duration::from_secs(5));
        assert!(rendered.contains("[x] Launch at login"));
        assert!(rendered.contains("[***]"));
        assert!(rendered.contains("<Clear tray icon notifications>"));
        assert!(rendered.contains("js -> rs (every 5s)"));
        assert!(rendered.contains("  interval msg #3"));
    }

    #[test]
    fn test_launch_at_login_toggle() {
        let mut state = ViewState::default();
        state.set_launch_at_login(false);

        assert!(!state.form.launch_at_login);
        assert!(state.render(Duration::from_secs(5)).contains("[ ] Launch at login"));

        state.set_launch_at_login(true);
        assert!(state.form.launch_at_login);
    }

    #[test]
    fn test_action_arguments_are_literal() {
        assert_eq!(Value::Object(Action::MakeRequest.arguments().unwrap()), json!({ "msg": "api msg" }));
        assert_eq!(Value::Object(Action::SetMenuItem.arguments().unwrap()), json!({ "title": "JS count: 10" }));
        assert_eq!(
            Value::Object(Action::AddMenuItem.arguments().unwrap()),
            json!({ "id": "custom-10", "title": "New JS count 10" })
        );
        assert_eq!(
            Value::Object(Action::SetIcon("notification".into()).arguments().unwrap()),
            json!({ "name": "notification" })
        );
        assert_eq!(Action::buttons().len(), 5);
    }
}
