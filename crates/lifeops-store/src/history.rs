//! Daily history log.
//!
//! One entry per calendar day, newest first, pruned to the last
//! [`KEEP_DAYS`] days. Stored under its own key next to the state document.

use crate::backend::StorageBackend;
use crate::document::Value;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const HISTORY_KEY: &str = "lifeops:history:daily";

/// How many days of history are retained.
pub const KEEP_DAYS: i64 = 120;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// A summary of one day.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEntry {
    /// `YYYY-MM-DD` in local time.
    pub day: String,
    #[serde(default)]
    pub traffic_light: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub coping_method: String,
    #[serde(default)]
    pub one_question: String,
    #[serde(default)]
    pub gentle_prep: String,
    #[serde(default)]
    pub weekly_focus: String,
    #[serde(default)]
    pub weekly_priorities: Vec<Value>,
    #[serde(default)]
    pub weekly_checklist: Vec<Value>,
    #[serde(default)]
    pub todo_today_count: Option<usize>,
    #[serde(default)]
    pub upcoming_count: Option<usize>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The fields of today's state that go into a history entry.
#[derive(Clone, Debug, Default)]
pub struct DaySnapshot {
    pub traffic_light: Option<String>,
    pub status: Option<String>,
    pub coping_method: Option<String>,
    pub one_question: Option<String>,
    pub gentle_prep: Option<String>,
    pub weekly_focus: Option<String>,
    pub weekly_priorities: Option<Vec<Value>>,
    pub weekly_checklist: Option<Vec<Value>>,
    pub todo_today: Option<Vec<Value>>,
    pub upcoming: Option<Vec<Value>>,
}

impl DaySnapshot {
    /// Turn the snapshot into an entry for `day`.
    pub fn into_entry(self, day: NaiveDate) -> DailyEntry {
        DailyEntry {
            day: day.format(DAY_FORMAT).to_string(),
            traffic_light: self.traffic_light,
            status: self.status,
            coping_method: self.coping_method.unwrap_or_default(),
            one_question: self.one_question.unwrap_or_default(),
            gentle_prep: self.gentle_prep.unwrap_or_default(),
            weekly_focus: self.weekly_focus.unwrap_or_default(),
            weekly_priorities: self.weekly_priorities.unwrap_or_default(),
            weekly_checklist: self.weekly_checklist.unwrap_or_default(),
            todo_today_count: self.todo_today.map(|items| items.len()),
            upcoming_count: self.upcoming.map(|items| items.len()),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Read the history list. A missing or corrupt value reads as empty.
pub fn daily_history<B: StorageBackend + ?Sized>(backend: &B) -> Vec<DailyEntry> {
    let Some(raw) = backend.get_item(HISTORY_KEY) else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(%err, "daily history is corrupt, reading as empty");
        Vec::new()
    })
}

/// Overwrite the history list.
pub fn set_daily_history<B: StorageBackend + ?Sized>(
    backend: &B,
    items: &[DailyEntry],
) -> Result<()> {
    backend.set_item(HISTORY_KEY, &serde_json::to_string(items)?)
}

/// Insert or update the entry for `entry.day`, using the current time.
pub fn upsert_daily_entry<B: StorageBackend + ?Sized>(
    backend: &B,
    entry: DailyEntry,
) -> Result<Vec<DailyEntry>> {
    upsert_daily_entry_at(backend, entry, Utc::now(), Local::now().date_naive())
}

/// Insert or update the entry for `entry.day` as of `now`, pruning anything
/// older than [`KEEP_DAYS`] before `today`.
///
/// An update keeps the original `created_at`; every other field comes from
/// `entry`.
pub fn upsert_daily_entry_at<B: StorageBackend + ?Sized>(
    backend: &B,
    mut entry: DailyEntry,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<Vec<DailyEntry>> {
    if entry.day.is_empty() {
        return Err(StoreError::MissingDay);
    }
    if NaiveDate::parse_from_str(&entry.day, DAY_FORMAT).is_err() {
        return Err(StoreError::InvalidDay(entry.day));
    }

    let mut items = daily_history(backend);
    entry.updated_at = Some(now);

    match items.iter_mut().find(|x| x.day == entry.day) {
        Some(existing) => {
            entry.created_at = existing.created_at.or(Some(now));
            *existing = entry;
        }
        None => {
            entry.created_at = Some(now);
            items.push(entry);
        }
    }

    items.sort_by(|a, b| b.day.cmp(&a.day));

    let cutoff = (today - Duration::days(KEEP_DAYS))
        .format(DAY_FORMAT)
        .to_string();
    items.retain(|x| x.day >= cutoff);

    set_daily_history(backend, &items)?;
    Ok(items)
}

/// Record today's snapshot in the history log.
pub fn log_today_snapshot<B: StorageBackend + ?Sized>(
    backend: &B,
    snapshot: DaySnapshot,
) -> Result<Vec<DailyEntry>> {
    let today = Local::now().date_naive();
    upsert_daily_entry_at(backend, snapshot.into_entry(today), Utc::now(), today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use chrono::TimeZone;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DAY_FORMAT).unwrap()
    }

    fn entry(d: &str) -> DailyEntry {
        DailyEntry {
            day: d.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_inserts_and_sorts_newest_first() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let today = day("2024-03-10");

        upsert_daily_entry_at(&backend, entry("2024-03-08"), now, today).unwrap();
        upsert_daily_entry_at(&backend, entry("2024-03-10"), now, today).unwrap();
        let items = upsert_daily_entry_at(&backend, entry("2024-03-09"), now, today).unwrap();

        let days: Vec<_> = items.iter().map(|e| e.day.as_str()).collect();
        assert_eq!(days, vec!["2024-03-10", "2024-03-09", "2024-03-08"]);
        assert_eq!(daily_history(&backend), items);
    }

    #[test]
    fn test_upsert_updates_in_place_and_keeps_created_at() {
        let backend = MemoryBackend::new();
        let today = day("2024-03-10");
        let first = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap();

        upsert_daily_entry_at(&backend, entry("2024-03-10"), first, today).unwrap();

        let mut updated = entry("2024-03-10");
        updated.status = Some("amber".into());
        let items = upsert_daily_entry_at(&backend, updated, later, today).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status.as_deref(), Some("amber"));
        assert_eq!(items[0].created_at, Some(first));
        assert_eq!(items[0].updated_at, Some(later));
    }

    #[test]
    fn test_upsert_prunes_old_entries() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let today = day("2024-06-01");

        upsert_daily_entry_at(&backend, entry("2023-12-01"), now, today).unwrap();
        let items = upsert_daily_entry_at(&backend, entry("2024-05-30"), now, today).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].day, "2024-05-30");
    }

    #[test]
    fn test_upsert_rejects_missing_or_bad_day() {
        let backend = MemoryBackend::new();
        let today = day("2024-03-10");

        assert_eq!(
            upsert_daily_entry_at(&backend, entry(""), Utc::now(), today),
            Err(StoreError::MissingDay)
        );
        assert!(matches!(
            upsert_daily_entry_at(&backend, entry("10/03/2024"), Utc::now(), today),
            Err(StoreError::InvalidDay(_))
        ));
    }

    #[test]
    fn test_corrupt_history_reads_empty() {
        let backend = MemoryBackend::new();
        backend.set_item(HISTORY_KEY, "not json").unwrap();
        assert!(daily_history(&backend).is_empty());
    }

    #[test]
    fn test_snapshot_counts() {
        let snapshot = DaySnapshot {
            status: Some("green".into()),
            todo_today: Some(vec!["a".into(), "b".into()]),
            upcoming: None,
            ..Default::default()
        };

        let entry = snapshot.into_entry(day("2024-03-10"));
        assert_eq!(entry.day, "2024-03-10");
        assert_eq!(entry.todo_today_count, Some(2));
        assert_eq!(entry.upcoming_count, None);
        assert_eq!(entry.coping_method, "");
    }

    #[test]
    fn test_log_today_snapshot_writes_today() {
        let backend = MemoryBackend::new();
        let items = log_today_snapshot(&backend, DaySnapshot::default()).unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].day,
            Local::now().date_naive().format(DAY_FORMAT).to_string()
        );
    }
}
