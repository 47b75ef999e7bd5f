// Terminal runner: host, tray and view in one process over a LocalBridge.
// Prints the view whenever it changes; typing a button number presses it.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::bridge::{HostBridge, LocalBridge};
use crate::config::ConfigManager;
use crate::host::{spawn_emitter, Host};
use crate::query::SiteCache;
use crate::tray::{MemoryTray, TrayBackend};
use crate::view::{Action, View, ViewOptions};

pub fn run(config_manager: ConfigManager) -> Result<()> {
    // One event loop, like the webview the view was written for
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run_async(config_manager))
}

async fn run_async(config_manager: ConfigManager) -> Result<()> {
    let config = config_manager.get_config();

    let sites = Arc::new(SiteCache::from_config(&config.fathom).context("Invalid Fathom configuration")?);
    let tray = Arc::new(MemoryTray::new());
    let host = Arc::new(Host::new(tray.clone(), Arc::clone(&sites)));

    let bridge = LocalBridge::new();
    host.register(&bridge);
    let _emitter = spawn_emitter(
        Arc::new(bridge.clone()),
        config_manager.emit_period(),
        config.host.emit_message.clone(),
    );

    let bridge: Arc<dyn HostBridge> = Arc::new(bridge);
    let view = View::mount(bridge, Some(sites), ViewOptions::from(&config.view));
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C, shutting down: {}", e),
        }
    };
    drive(&view, BufReader::new(tokio::io::stdin()), shutdown).await;

    view.unmount();
    info!("Final tray state: {:?}", tray.snapshot());
    Ok(())
}

/// Redraws on every view change and presses numbered buttons read from
/// `input` until `shutdown` resolves. Input ending does not stop the loop.
async fn drive<R, S>(view: &View, input: R, shutdown: S)
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut revisions = view.handle().watch();

    print_view(view);
    print_buttons();

    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(view);
            }
            line = lines.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => press_numbered(view, line.trim()),
                    Ok(None) => input_open = false,
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        input_open = false;
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

fn press_numbered(view: &View, input: &str) {
    let buttons = Action::buttons();
    match input.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| buttons.get(i)) {
        Some(action) => {
            info!("Pressing {:?}", action.label());
            let _ = view.press(action.clone());
        }
        None if input.is_empty() => {}
        None => {
            println!("Unknown button {:?}", input);
            print_buttons();
        }
    }
}

fn print_view(view: &View) {
    println!("\n{}", view.render());
}

fn print_buttons() {
    for (i, action) in Action::buttons().iter().enumerate() {
        println!("  {}) {}", i + 1, action.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::oneshot;

    use crate::bridge::commands;

    #[tokio::test(start_paused = true)]
    async fn test_drive_presses_buttons_until_shutdown() {
        let bridge = LocalBridge::new();
        let presses = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&presses);
        bridge.register(commands::SET_MENU_ITEM, move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::Null) }
        });
        let view = View::mount(Arc::new(bridge), None, ViewOptions::default());

        let (tx, rx) = oneshot::channel::<()>();
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(()).unwrap();
        };
        let shutdown = async move {
            let _ = rx.await;
        };

        // "2" is "Set menu item"; the unknown entry is ignored
        tokio::join!(drive(&view, &b"2\nnine\n"[..], shutdown), trigger);

        assert_eq!(presses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_stops_on_shutdown_signalled_before_start() {
        let view = View::mount(Arc::new(LocalBridge::new()), None, ViewOptions::default());
        let input = BufReader::new(tokio::io::empty());

        tokio::time::timeout(Duration::from_secs(1), drive(&view, input, async {}))
            .await
            .unwrap();
    }
}
