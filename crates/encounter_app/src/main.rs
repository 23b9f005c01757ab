mod greeting;
mod logging;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use encounter_engine::EncounterEngine;
use encounter_radio::{MemoryTransport, RadioConfig, RadioMedium};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::greeting::GreetingSink;
use crate::settings::AppSettings;

#[tokio::main]
async fn main() -> Result<()> {
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => AppSettings::settings_path()?,
    };
    let settings = AppSettings::load_from_path(&path)?;

    let _guard = logging::init_logging(&settings.logging)?;
    info!("Settings from {}", path.display());

    run(settings).await
}

/// Bring up the simulated nodes, let them meet for `run_for`, then stop.
async fn run(settings: AppSettings) -> Result<()> {
    let medium = RadioMedium::new();
    let count = settings.simulated_peers;
    let mut engines = Vec::with_capacity(count);

    for index in 0..count {
        let address = node_address(index);
        let name = format!("node-{index}");
        let radio_config = staggered(&settings.radio, index, count);
        let radio = MemoryTransport::new(&medium, address.clone(), Some(name.clone()), radio_config)
            .with_context(|| format!("Failed to place {name} on the medium"))?;
        let sink = GreetingSink::new(format!("{} from {name}", settings.greeting));

        let mut engine = EncounterEngine::new(settings.engine.clone(), Arc::new(radio), Arc::new(sink));
        print_activity(&name, &engine);
        engine
            .start()
            .with_context(|| format!("Failed to start {name} ({address})"))?;
        engines.push(engine);
    }
    info!("{count} node(s) on the air for {:?}", settings.run_for);

    tokio::select! {
        _ = tokio::time::sleep(settings.run_for) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    for engine in &mut engines {
        engine.stop();
    }
    Ok(())
}

/// Locally administered MAC-style address for the `index`th node.
fn node_address(index: usize) -> String {
    format!("02:00:00:00:{:02X}:{:02X}", (index >> 8) & 0xFF, index & 0xFF)
}

/// Spread the nodes' first scans across one scan interval so they do not
/// all dial each other at the same instant.
fn staggered(radio: &RadioConfig, index: usize, count: usize) -> RadioConfig {
    let index = u32::try_from(index).unwrap_or(u32::MAX);
    let count = u32::try_from(count.max(1)).unwrap_or(u32::MAX);
    let slot = radio.scan_interval.checked_mul(index).unwrap_or(Duration::MAX) / count;
    RadioConfig {
        scan_delay: radio.scan_delay.saturating_add(slot),
        ..radio.clone()
    }
}

fn print_activity(name: &str, engine: &EncounterEngine) {
    let mut feed = engine.handle().subscribe();
    let name = name.to_string();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(record) => println!("{name} {record}"),
                Err(RecvError::Lagged(missed)) => warn!("{name}: activity feed lagged, {missed} record(s) lost"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_addresses_are_unique() {
        assert_eq!(node_address(0), "02:00:00:00:00:00");
        assert_eq!(node_address(11), "02:00:00:00:00:0B");
        assert_eq!(node_address(300), "02:00:00:00:01:2C");
    }

    #[test]
    fn test_stagger_spreads_first_scan() {
        let radio = RadioConfig {
            scan_interval: Duration::from_millis(900),
            ..Default::default()
        };
        assert_eq!(staggered(&radio, 0, 3).scan_delay, Duration::ZERO);
        assert_eq!(staggered(&radio, 1, 3).scan_delay, Duration::from_millis(300));
        assert_eq!(staggered(&radio, 2, 3).scan_delay, Duration::from_millis(600));
    }

    #[test]
    fn test_stagger_survives_huge_counts() {
        let radio = RadioConfig {
            scan_interval: Duration::from_millis(1000),
            ..Default::default()
        };
        let last = usize::MAX - 1;
        let delay = staggered(&radio, last, usize::MAX).scan_delay;
        assert!(delay <= radio.scan_interval, "delay {delay:?} beyond one interval");
        assert_eq!(staggered(&radio, 5, 0).scan_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_run_completes() {
        let settings = AppSettings {
            simulated_peers: 2,
            run_for: Duration::from_secs(3),
            ..Default::default()
        };
        run(settings).await.unwrap();
    }
}
