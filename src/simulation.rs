use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use futures::stream::StreamExt;
use lifeops_store::{document_from_json, Document};
use lifeops_sync::{
    fingerprint, quick, ErrorCode, MemoryRemoteStore, RemoteError, SyncConfig, SyncEvent, UserId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::info;

const SECTIONS: &[&str] = &["upcomingItems", "tasksByDate", "weeklyByWeekKey"];

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub num_devices: usize,
    pub edits: usize,
    pub write_calls: usize,
    pub committed_writes: usize,
    pub skipped_writes: usize,
    pub cooldowns: usize,
    pub echoes_suppressed: usize,
    pub remote_changes_applied: usize,
    pub converged: bool,
    pub total_time: Duration,
}

impl SimulationStats {
    /// Edits per network write; higher means better coalescing.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.write_calls == 0 {
            return 0.0;
        }
        self.edits as f64 / self.write_calls as f64
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  {:<58}║", self.name);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Started:                   {:>30} ║", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        println!("║  Devices:                   {:>30} ║", self.num_devices);
        println!("║  Local Edits:               {:>30} ║", self.edits);
        println!("║  Remote Write Calls:        {:>30} ║", self.write_calls);
        println!("║  Committed Writes:          {:>30} ║", self.committed_writes);
        println!("║  Skipped Writes:            {:>30} ║", self.skipped_writes);
        println!("║  Cooldowns:                 {:>30} ║", self.cooldowns);
        println!("║  Echoes Suppressed:         {:>30} ║", self.echoes_suppressed);
        println!("║  Remote Changes Applied:    {:>30} ║", self.remote_changes_applied);
        println!("║  Edits per Write:           {:>30.2} ║", self.coalescing_ratio());
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One generated local edit.
#[derive(Clone, Debug)]
struct Edit {
    device: usize,
    patch: Document,
    pause: Duration,
}

/// Generator that yields random edits spread across devices
fn edit_generator(num_devices: usize, num_edits: usize, max_pause_ms: u64) -> impl Stream<Item = Edit> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for i in 0..num_edits {
            let device = rng.gen_range(0..num_devices);
            let section = SECTIONS[rng.gen_range(0..SECTIONS.len())];
            let key = format!("k{}", rng.gen_range(0..8));
            let patch = document_from_json(json!({ section: { key: { "rev": i, "by": device } } }));
            let pause = Duration::from_millis(rng.gen_range(0..=max_pause_ms));
            yield Edit { device, patch, pause };
        }
    }
}

#[derive(Default)]
struct EventCounts {
    committed: usize,
    skipped: usize,
    cooldowns: usize,
    echoes: usize,
    applied: usize,
}

fn drain_events(receivers: &mut [broadcast::Receiver<SyncEvent>]) -> EventCounts {
    let mut counts = EventCounts::default();
    for rx in receivers {
        while let Ok(event) = rx.try_recv() {
            match event {
                SyncEvent::WriteCommitted { .. } => counts.committed += 1,
                SyncEvent::WriteSkipped { .. } => counts.skipped += 1,
                SyncEvent::CooldownStarted { .. } => counts.cooldowns += 1,
                SyncEvent::EchoSuppressed { .. } => counts.echoes += 1,
                SyncEvent::RemoteChangeApplied { .. } => counts.applied += 1,
                _ => {}
            }
        }
    }
    counts
}

/// Randomized multi-device edit storm against one shared remote document.
///
/// When `failure_rate` is above zero, that share of edits queues a
/// recoverable remote failure (quota or network) before it is saved.
pub async fn run_edit_storm(
    name: &str,
    num_devices: usize,
    num_edits: usize,
    failure_rate: f64,
    config: SyncConfig,
) -> SimulationStats {
    println!("\n[{}] {} devices, {} edits", name, num_devices, num_edits);
    info!(%name, num_devices, num_edits, failure_rate, "edit storm started");

    let started_at = Utc::now();
    let start = Instant::now();
    let user = UserId::new("simulated-user");
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_latency(Duration::from_millis(5));

    let clients: Vec<_> = (0..num_devices)
        .map(|i| quick::memory_client_with(remote.clone(), &format!("device-{i}"), config.clone()))
        .collect();
    let mut receivers: Vec<_> = clients.iter().map(|c| c.subscribe_events()).collect();

    for client in &clients {
        if let Err(err) = client.sign_in(user.clone(), Arc::new(|_| {})).await {
            println!("  sign-in failed on {}: {}", client.device_name(), err);
        }
    }

    let mut rng = StdRng::from_entropy();
    let mut edits = 0;
    let mut stream = Box::pin(edit_generator(num_devices, num_edits, config.debounce_ms));
    while let Some(edit) = stream.next().await {
        if rng.gen_bool(failure_rate.clamp(0.0, 1.0)) {
            let code = if rng.gen_bool(0.5) {
                ErrorCode::ResourceExhausted
            } else {
                ErrorCode::Unavailable
            };
            remote.fail_next_write(RemoteError::new(code, "injected"));
        }
        if let Err(err) = clients[edit.device].save(edit.patch) {
            println!("  save failed: {}", err);
        }
        edits += 1;
        tokio::time::sleep(edit.pause).await;

        if edits % 50 == 0 {
            println!("  Edits applied: {}/{}", edits, num_edits);
        }
    }

    // let debouncers and cooldowns run out, then flush every device in turn
    remote.clear_failures();
    let quiet = config.debounce() + config.quota_cooldown().max(config.transient_cooldown());
    tokio::time::sleep(quiet + Duration::from_millis(50)).await;
    for client in &clients {
        if let Err(err) = client.flush().await {
            println!("  final flush failed on {}: {}", client.device_name(), err);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let server = remote.document(&user).map(|doc| fingerprint(&doc));
    let converged = clients
        .iter()
        .all(|c| Some(fingerprint(&c.load())) == server);

    let counts = drain_events(&mut receivers);
    for client in &clients {
        client.sign_out();
    }

    SimulationStats {
        name: name.to_string(),
        started_at,
        num_devices,
        edits,
        write_calls: remote.write_calls(),
        committed_writes: counts.committed,
        skipped_writes: counts.skipped,
        cooldowns: counts.cooldowns,
        echoes_suppressed: counts.echoes,
        remote_changes_applied: counts.applied,
        converged,
        total_time: start.elapsed(),
    }
}

/// Run the same storm with a growing number of devices.
pub async fn run_scaling(max_devices: usize, step: usize, config: SyncConfig) {
    println!("\n{:>8} {:>8} {:>12} {:>12} {:>10}", "devices", "edits", "write calls", "edits/write", "converged");
    let mut devices = step.max(1);
    while devices <= max_devices {
        let stats = run_edit_storm("scaling", devices, devices * 20, 0.0, config.clone()).await;
        println!(
            "{:>8} {:>8} {:>12} {:>12.2} {:>10}",
            stats.num_devices,
            stats.edits,
            stats.write_calls,
            stats.coalescing_ratio(),
            stats.converged
        );
        devices += step.max(1);
    }
}
