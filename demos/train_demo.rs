use poweredup::{HubConfig, HubControl, Result};
use std::{thread, time::Duration};
use tracing::{error, info, warn};

const RUN_SPEED: i32 = 50;
const RUN_TIME: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚂 Powered Up Train Demo");
    info!("Scanning for hubs...");

    let hubs = match HubControl::start(HubConfig::default()) {
        Ok(hubs) => hubs,
        Err(e) => {
            error!("❌ Bluetooth unavailable: {}", e);
            return Err(e);
        }
    };

    let connected = hubs.connect()?;
    if connected == 0 {
        warn!("No hubs found. Press the green button on the hub and try again.");
        return Ok(());
    }
    info!("✅ {} hub(s) connected", connected);

    for hub in hubs.status()? {
        info!("  {} ({})", hub.name, hub.identity);
    }

    info!("▶️ Forward at {}%", RUN_SPEED);
    hubs.set_speed_all(RUN_SPEED)?;
    thread::sleep(RUN_TIME);

    info!("◀️ Reverse at {}%", RUN_SPEED);
    hubs.set_speed_all(-RUN_SPEED)?;
    thread::sleep(RUN_TIME);

    info!("⏹️ Stopping");
    hubs.stop_all()?;

    info!("📊 Hub diagnostics:");
    for hub in hubs.status()? {
        match hubs.debug(&hub.identity) {
            Ok(diag) => {
                info!("  {} [{}]", diag.name, diag.address);
                info!("    Connected: {}", diag.connected);
                info!("    Speed: {}", diag.speed);
                info!(
                    "    Last command: {}",
                    diag.last_command_hex.as_deref().unwrap_or("-")
                );
                info!("    Battery: {}", diag.battery_label());
            }
            Err(e) => error!("❌ Could not read {}: {}", hub.name, e),
        }
    }

    info!("🎉 Demo completed!");
    Ok(())
}
