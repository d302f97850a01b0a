use lifeops_sync::SyncConfigBuilder;
use simulation::{run_edit_storm, run_scaling};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    rt.block_on(async_main());
}

async fn async_main() {
    // Short timings so the storms finish quickly
    let config = SyncConfigBuilder::new()
        .debounce(40)
        .quota_cooldown(400)
        .transient_cooldown(100)
        .event_capacity(100_000)
        .build();

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            MULTI-DEVICE SYNC SIMULATION                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: two devices, healthy network
    let stats = run_edit_storm("Two devices", 2, 100, 0.0, config.clone()).await;
    stats.print();

    // Test 2: five devices, healthy network
    let stats = run_edit_storm("Five devices", 5, 300, 0.0, config.clone()).await;
    stats.print();

    // Test 3: five devices, flaky network
    let stats = run_edit_storm("Five devices, flaky remote", 5, 300, 0.05, config.clone()).await;
    stats.print();

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    run_scaling(10, 2, config).await;

    println!("\n✓ All simulations completed!");
}
