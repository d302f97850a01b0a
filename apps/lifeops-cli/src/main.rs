//! # LifeOps CLI
//!
//! A standalone tool over the LifeOps local store and sync core.
//!
//! Local commands (`set`, `export`, `import`, `history`, `log-day`,
//! `support`) work on
//! a JSON data file given with `--data`. The `demo` and `migrate` commands
//! run sync scenarios against an in-memory remote store.
//!
//! ```text
//! lifeops --data me.json set upcomingItems '[{"title":"dentist"}]'
//! lifeops --data me.json migrate --user alice
//! lifeops --data me.json export backup.json
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use colored::*;
use lifeops_store::{
    daily_history, document_from_json, document_to_json, export_snapshot, get_support_profile,
    import_snapshot, log_today_snapshot, read_snapshot_file, set_support_profile,
    write_snapshot_file, DaySnapshot, Document, FileBackend, ImportMode, LocalStore,
    TrustedPerson, Value,
};
use lifeops_sync::{
    fingerprint, quick, ClientConfigBuilder, ErrorCode, GatePhase, MemoryRemoteStore, RemoteError,
    SyncClient, SyncConfig, SyncConfigBuilder, UserId, WriteOutcome,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "lifeops")]
#[command(about = "LifeOps local store, backups and sync scenarios")]
#[command(version)]
struct Cli {
    /// Local data file
    #[arg(long, global = true, default_value = "lifeops-data.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two devices edit, sync through an in-memory remote, and converge
    Demo,
    /// Sign in with the local data file and migrate it to an empty remote
    Migrate {
        /// User to sign in as
        #[arg(long, default_value = "demo-user")]
        user: String,
    },
    /// Set one top-level section of the local document from JSON
    Set { section: String, json: String },
    /// Export every LifeOps key to a backup file
    Export { file: PathBuf },
    /// Restore a backup file
    Import {
        file: PathBuf,
        /// Keep existing keys instead of clearing them first
        #[arg(long)]
        merge: bool,
    },
    /// Show the daily history log
    History,
    /// Record today's entry in the daily history log
    LogDay {
        #[arg(long)]
        traffic_light: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        coping: Option<String>,
        #[arg(long)]
        question: Option<String>,
        #[arg(long)]
        prep: Option<String>,
        #[arg(long)]
        focus: Option<String>,
    },
    /// Show or update the support profile
    Support {
        /// Add a trusted person as NAME[:METHOD]
        #[arg(long)]
        add_person: Option<String>,
        #[arg(long)]
        warning_signs: Option<String>,
        #[arg(long)]
        what_helps: Option<String>,
        #[arg(long)]
        grounding: Option<String>,
    },
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn show_document(label: &str, doc: &Document) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!("  │ {:^42} │", label.bright_yellow().to_string());
    println!("  ├{}┤", border);
    if doc.is_empty() {
        println!("  │ {:^42} │", "(empty)".dimmed().to_string());
    }
    for (key, value) in doc {
        let summary = match value {
            Value::Array(items) => format!("{} item(s)", items.len()),
            Value::Object(map) => format!("{} key(s)", map.len()),
            Value::Timestamp(ts) => ts
                .to_datetime()
                .map(|dt| dt.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
            other => other.to_json().to_string(),
        };
        let line = format!("{:<20} {}", key, summary);
        println!("  │ {:<42} │", line);
    }
    println!("  └{}┘", border);
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL DEVICES CONVERGED: documents are identical".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: devices differ".bright_red().bold()
        );
    }
}

fn fast_sync_config() -> SyncConfig {
    SyncConfigBuilder::new()
        .debounce(100)
        .quota_cooldown(1_000)
        .transient_cooldown(300)
        .build()
}

async fn pause(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn open_backend(data: &Path) -> Arc<FileBackend> {
    Arc::new(FileBackend::open(data))
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> CliResult {
    header("DEMO: Two Devices, One Remote Document");
    let user = UserId::new("demo-user");
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_latency(Duration::from_millis(20));
    let laptop = quick::memory_client_with(remote.clone(), "laptop", fast_sync_config());
    let phone = quick::memory_client_with(remote.clone(), "phone", fast_sync_config());

    section("Phase 1: Laptop has offline data and signs in");
    laptop.save(document_from_json(json!({
        "upcomingItems": [{"title": "dentist", "date": "2024-03-04"}],
        "tasksByDate": {"2024-03-01": [{"title": "run", "done": false}]}
    })))?;
    let report = laptop.sign_in(user.clone(), Arc::new(|_| {})).await?;
    step(&format!("migrated local data: {}", report.migrated));
    step(&format!("remote writes so far: {}", remote.write_count()));

    section("Phase 2: Phone signs in and hydrates from the remote copy");
    let report = phone.sign_in(user.clone(), Arc::new(|_| {})).await?;
    step(&format!("hydrated from: {:?}", report.source));
    show_document("phone", &phone.load());

    section("Phase 3: Burst of laptop edits, debounced into one write");
    for n in 1..=3 {
        laptop.save(document_from_json(
            json!({"weeklyByWeekKey": {"2024-W10": {"focus": format!("draft {n}")}}}),
        ))?;
        step(&format!("laptop edit {}", n));
        pause(30).await;
    }
    pause(250).await;
    step(&format!("remote writes so far: {}", remote.write_count()));
    show_document("phone after sync", &phone.load());

    section("Phase 4: Quota exhausted");
    remote.fail_next_write(RemoteError::new(ErrorCode::ResourceExhausted, "quota"));
    phone.save(document_from_json(json!({"tasksByDate": {"2024-03-02": [{"title": "read"}]}})))?;
    let outcome = phone.flush().await?;
    step(&format!("write outcome: {:?}", outcome));
    if let Some(status) = phone.status() {
        if let GatePhase::CoolingDown { until } = status.phase {
            let left = until.saturating_duration_since(tokio::time::Instant::now());
            step(&format!("cooling down for {} ms", left.as_millis()));
        }
    }
    pause(1_100).await;
    let outcome = phone.flush().await?;
    step(&format!("after cooldown: {:?}", outcome));
    pause(100).await;

    section("Convergence");
    let laptop_fp = fingerprint(&laptop.load());
    let phone_fp = fingerprint(&phone.load());
    step(&format!("laptop {}", laptop_fp.short()));
    step(&format!("phone  {}", phone_fp.short()));
    convergence_result(laptop_fp == phone_fp && matches!(outcome, WriteOutcome::Written(_)));

    laptop.sign_out();
    phone.sign_out();
    Ok(())
}

// ─── Migrate ───────────────────────────────────────────────────────────────

async fn run_migrate(data: &Path, user: String) -> CliResult {
    header("MIGRATE: Upload Local Data on First Sign-In");
    let user = UserId::new(user);
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(LocalStore::new(open_backend(data)));
    let config = ClientConfigBuilder::new()
        .device_name("this-device")
        .sync(fast_sync_config())
        .build();
    let client = SyncClient::new(remote.clone(), local, config);

    section("Local state");
    show_document(&data.display().to_string(), &client.load());

    section("Sign in");
    let report = client.sign_in(user.clone(), Arc::new(|_| {})).await?;
    step(&format!("source: {:?}", report.source));
    step(&format!("migrated: {}", report.migrated));
    if let Some(outcome) = &report.migration {
        step(&format!("migration write: {:?}", outcome));
    }
    if !report.migrated {
        step("nothing meaningful to migrate");
    }

    if let Some(doc) = remote.document(&user) {
        show_document("remote copy", &doc);
    }

    section("A second device signs in");
    let other = quick::memory_client_with(remote.clone(), "other-device", fast_sync_config());
    let report = other.sign_in(user, Arc::new(|_| {})).await?;
    step(&format!("hydrated from: {:?}", report.source));
    convergence_result(fingerprint(&other.load()) == fingerprint(&client.load()));

    client.sign_out();
    other.sign_out();
    Ok(())
}

// ─── Local commands ────────────────────────────────────────────────────────

fn run_set(data: &Path, section_name: String, raw: &str) -> CliResult {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let local = LocalStore::new(open_backend(data));
    let mut patch = Document::new();
    patch.insert(section_name.clone(), Value::from(value));
    let merged = local.save(patch)?;
    step(&format!("saved {} ({} sections)", section_name.bright_cyan(), merged.len()));
    println!("{}", serde_json::to_string_pretty(&document_to_json(&merged))?);
    Ok(())
}

fn run_export(data: &Path, file: &Path) -> CliResult {
    let backend = open_backend(data);
    let snapshot = export_snapshot(backend.as_ref());
    write_snapshot_file(file, &snapshot)?;
    step(&format!(
        "exported {} key(s) to {}",
        snapshot.local.keys.len(),
        file.display().to_string().bright_cyan()
    ));
    Ok(())
}

fn run_import(data: &Path, file: &Path, merge: bool) -> CliResult {
    let backend = open_backend(data);
    let snapshot = read_snapshot_file(file)?;
    let mode = if merge {
        ImportMode::Merge
    } else {
        ImportMode::Replace
    };
    let written = import_snapshot(backend.as_ref(), &snapshot, mode)?;
    step(&format!(
        "imported {} key(s) ({:?}), exported at {}",
        written,
        mode,
        snapshot.meta.exported_at.format("%Y-%m-%d %H:%M")
    ));
    Ok(())
}

fn run_history(data: &Path) -> CliResult {
    header("DAILY HISTORY");
    let backend = open_backend(data);
    let items = daily_history(backend.as_ref());
    if items.is_empty() {
        step(&"(no entries)".dimmed().to_string());
    }
    for entry in items {
        let light = match entry.traffic_light.as_deref() {
            Some("green") => "●".bright_green(),
            Some("yellow") => "●".bright_yellow(),
            Some("red") => "●".bright_red(),
            _ => "○".dimmed(),
        };
        println!(
            "  {} {}  {:<10} todo:{:<3} upcoming:{:<3} {}",
            light,
            entry.day.bold(),
            entry.status.unwrap_or_default(),
            entry.todo_today_count.map_or("-".to_string(), |n| n.to_string()),
            entry.upcoming_count.map_or("-".to_string(), |n| n.to_string()),
            entry.weekly_focus.dimmed()
        );
    }
    Ok(())
}

struct DayFields {
    traffic_light: Option<String>,
    status: Option<String>,
    coping: Option<String>,
    question: Option<String>,
    prep: Option<String>,
    focus: Option<String>,
}

fn run_log_day(data: &Path, fields: DayFields) -> CliResult {
    let backend = open_backend(data);
    let doc = LocalStore::new(backend.clone()).load();
    let today = Local::now().format("%Y-%m-%d").to_string();

    let todo_today = doc
        .get("tasksByDate")
        .and_then(Value::as_object)
        .and_then(|days| days.get(&today))
        .and_then(Value::as_array)
        .cloned();
    let upcoming = doc.get("upcomingItems").and_then(Value::as_array).cloned();

    let snapshot = DaySnapshot {
        traffic_light: fields.traffic_light,
        status: fields.status,
        coping_method: fields.coping,
        one_question: fields.question,
        gentle_prep: fields.prep,
        weekly_focus: fields.focus,
        todo_today,
        upcoming,
        ..Default::default()
    };
    let items = log_today_snapshot(backend.as_ref(), snapshot)?;
    step(&format!(
        "logged {} ({} day(s) in history)",
        today.bright_cyan(),
        items.len()
    ));
    Ok(())
}

struct SupportEdits {
    add_person: Option<String>,
    warning_signs: Option<String>,
    what_helps: Option<String>,
    grounding: Option<String>,
}

fn run_support(data: &Path, edits: SupportEdits) -> CliResult {
    let backend = open_backend(data);
    let mut profile = get_support_profile(backend.as_ref());
    let mut changed = false;

    if let Some(raw) = edits.add_person {
        let (name, method) = raw.split_once(':').unwrap_or((raw.as_str(), ""));
        profile.trusted_people.push(TrustedPerson {
            name: name.to_string(),
            method: method.to_string(),
            notes: String::new(),
        });
        changed = true;
    }
    for (field, value) in [
        (&mut profile.early_warning_signs, edits.warning_signs),
        (&mut profile.what_helps, edits.what_helps),
        (&mut profile.grounding_kit, edits.grounding),
    ] {
        if let Some(value) = value {
            *field = value;
            changed = true;
        }
    }
    if changed {
        set_support_profile(backend.as_ref(), &profile)?;
    }

    header("SUPPORT PROFILE");
    section("Trusted people");
    if profile.trusted_people.is_empty() {
        step(&"(none yet)".dimmed().to_string());
    }
    for person in &profile.trusted_people {
        step(&format!("{} {}", person.name.bold(), person.method.dimmed()));
    }
    section("Early warning signs");
    step(&profile.early_warning_signs);
    section("What helps");
    step(&profile.what_helps);
    section("Grounding kit");
    step(&profile.grounding_kit);
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

async fn run(cli: Cli) -> CliResult {
    match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Migrate { user } => run_migrate(&cli.data, user).await,
        Commands::Set { section, json } => run_set(&cli.data, section, &json),
        Commands::Export { file } => run_export(&cli.data, &file),
        Commands::Import { file, merge } => run_import(&cli.data, &file, merge),
        Commands::History => run_history(&cli.data),
        Commands::LogDay {
            traffic_light,
            status,
            coping,
            question,
            prep,
            focus,
        } => run_log_day(
            &cli.data,
            DayFields {
                traffic_light,
                status,
                coping,
                question,
                prep,
                focus,
            },
        ),
        Commands::Support {
            add_person,
            warning_signs,
            what_helps,
            grounding,
        } => run_support(
            &cli.data,
            SupportEdits {
                add_person,
                warning_signs,
                what_helps,
                grounding,
            },
        ),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("  {} {}", "✗".bright_red().bold(), err);
        std::process::exit(1);
    }
}
