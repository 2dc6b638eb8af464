use anyhow::Result;
use handlink::domain::hand::{joint_index, HAND_JOINTS};
use handlink::domain::settings::SettingsService;
use handlink::domain::state::LiveStateStore;
use handlink::infrastructure::bluetooth::btle::BtleTransport;
use handlink::infrastructure::bluetooth::registry::DeviceRegistry;
use handlink::infrastructure::bluetooth::transport::{PermissionsGranted, Transport};
use handlink::infrastructure::bluetooth::{ConnectionManager, SyncLoop};
use handlink::infrastructure::logging;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = SettingsService::new()?;
    let _log_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting HandLink");

    let registry = DeviceRegistry::from_settings(settings.get())?;
    let store = LiveStateStore::new();
    let transport: Arc<dyn Transport> = Arc::new(BtleTransport::new().await?);
    let manager = Arc::new(ConnectionManager::new(
        transport,
        Arc::new(PermissionsGranted),
        registry,
        store.clone(),
        Duration::from_secs(settings.get().scan_timeout_secs),
    ));
    let sync = SyncLoop::spawn(
        manager.clone(),
        store.clone(),
        Duration::from_millis(settings.get().sync_interval_ms),
    );

    run_console(&manager, &store).await?;

    sync.stop().await;
    manager.shutdown().await;
    Ok(())
}

/// Minimal stand-in for the mobile UI: drives the hand from stdin.
async fn run_console(manager: &Arc<ConnectionManager>, store: &LiveStateStore) -> Result<()> {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("connect") => match manager.connect_all().await {
                Ok(()) => println!("Connected: {}", manager.connected_ids().await.join(", ")),
                Err(e) => println!("Connection failed: {e}"),
            },
            Some("disconnect") => {
                manager.disconnect_all().await;
                println!("Disconnected");
            }
            Some("set") => match (parts.next(), parts.next().and_then(|v| v.parse::<f32>().ok())) {
                (Some(finger), Some(value)) => match joint_index(finger) {
                    Some(index) => store.set_control(index, value),
                    None => println!("Unknown finger '{finger}'"),
                },
                _ => println!("Usage: set <finger> <degrees>"),
            },
            Some("grip") => match parts.next().and_then(|v| v.parse::<f32>().ok()) {
                Some(value) => store.set_controls(&vec![value; store.joint_count()]),
                None => println!("Usage: grip <degrees>"),
            },
            Some("status") => {
                println!(
                    "Connected peripherals: {:?}",
                    manager.connected_ids().await
                );
                for (joint, value) in HAND_JOINTS.iter().zip(store.controls()) {
                    println!("  {:8} {:>5.0}", joint.name, value);
                }
                for (id, value) in store.telemetry_snapshot() {
                    println!("  telemetry[{id}] = {value}");
                }
            }
            Some("quit") | Some("exit") => break,
            Some("help") => print_help(),
            Some(other) => println!("Unknown command '{other}' (try 'help')"),
            None => {}
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  connect              scan and connect all peripherals");
    println!("  disconnect           close all links");
    println!("  set <finger> <deg>   set one joint target (pinky..thumb, 0-180)");
    println!("  grip <deg>           set every joint target");
    println!("  status               show links, controls and telemetry");
    println!("  quit                 exit");
}
