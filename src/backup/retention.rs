use crate::backup::result_error::error::Error;
use crate::backup::token::TimestampToken;
use chrono::{Datelike, Duration, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_RECENT_WINDOW: std::time::Duration = std::time::Duration::from_secs(30 * 24 * 3600);

/// An archive at the destination whose file name parses as a [`TimestampToken`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub date_time: NaiveDateTime,
}

impl BackupRecord {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Option<Self> {
        let path = path.into();
        let token = TimestampToken::from_archive_path(&path)?;
        Some(Self {
            path,
            date_time: token.date_time(),
        })
    }
}

/// Keeps everything inside the recent window, then the newest record of every
/// `(year, month)` bucket older than that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(with = "humantime_serde")]
    pub recent_window: std::time::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<BackupRecord>,
    pub delete: Vec<BackupRecord>,
    /// Records kept because they are inside the recent window
    pub recent: usize,
    /// Records kept as the newest of their month
    pub monthly: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl RetentionPolicy {
    pub fn new(recent_window: std::time::Duration) -> Self {
        Self { recent_window }
    }

    /// Splits `records` into what to keep and what to delete. Pure, touches no files.
    pub fn plan<I: IntoIterator<Item = BackupRecord>>(
        &self,
        records: I,
        now: NaiveDateTime,
    ) -> RetentionPlan {
        let window = Duration::from_std(self.recent_window).unwrap_or(Duration::MAX);
        let boundary = now.checked_sub_signed(window).unwrap_or(NaiveDateTime::MIN);

        let (recent, old): (Vec<_>, Vec<_>) = records
            .into_iter()
            .sorted_unstable_by_key(|r| Reverse(r.date_time))
            .partition(|r| r.date_time >= boundary);

        let mut monthly_keepers: HashMap<(i32, u32), BackupRecord> = HashMap::new();
        let mut delete = Vec::new();
        // newest first, so the first record seen in a bucket is its keeper
        for record in old {
            let bucket = (record.date_time.year(), record.date_time.month());
            if monthly_keepers.contains_key(&bucket) {
                delete.push(record);
            } else {
                monthly_keepers.insert(bucket, record);
            }
        }

        let recent_count = recent.len();
        let monthly_count = monthly_keepers.len();
        let keep = recent
            .into_iter()
            .chain(monthly_keepers.into_values())
            .sorted_unstable_by_key(|r| Reverse(r.date_time))
            .collect_vec();

        RetentionPlan {
            keep,
            delete,
            recent: recent_count,
            monthly: monthly_count,
        }
    }

    /// Applies [`Self::plan`] to the archives in `dest_dir`.
    ///
    /// Files that do not follow the naming convention are never touched. A failed delete
    /// is logged and counted; the remaining files are still processed.
    pub fn prune(&self, dest_dir: &Path, now: NaiveDateTime) -> PruneReport {
        let records = match scan_records(dest_dir) {
            Ok(records) => records,
            Err(e) => {
                warn!("Backup rotation skipped, cannot read {:?}: {e}", dest_dir);
                return PruneReport::default();
            }
        };
        self.prune_records(records, now)
    }

    /// Deletes what [`Self::plan`] rejects among `records`, continuing past failed deletes.
    pub fn prune_records(&self, records: Vec<BackupRecord>, now: NaiveDateTime) -> PruneReport {
        if records.is_empty() {
            return PruneReport::default();
        }

        let plan = self.plan(records, now);
        let mut report = PruneReport {
            kept: plan.keep.len(),
            ..PruneReport::default()
        };
        for record in &plan.delete {
            match std::fs::remove_file(&record.path) {
                Ok(_) => {
                    info!("Removed old backup: {:?}", record.path);
                    report.deleted += 1;
                }
                Err(source) => {
                    let err = Error::Rotation {
                        path: record.path.clone(),
                        source,
                    };
                    warn!("{err}");
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 {
            info!("Backup rotation complete: removed {} old backups", report.deleted);
            info!("Keeping {} recent backups", plan.recent);
            info!("Keeping {} monthly backups (latest per month)", plan.monthly);
        } else {
            debug!("Backup rotation found nothing to remove");
        }
        report
    }
}

/// Lists every [`BackupRecord`] directly inside `dest_dir`, an absent directory has none.
pub fn scan_records(dest_dir: &Path) -> std::io::Result<Vec<BackupRecord>> {
    if !dest_dir.exists() {
        return Ok(Vec::new());
    }
    Ok(std::fs::read_dir(dest_dir)?
        .filter_map(|r| r.ok())
        .filter(|de| de.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|de| BackupRecord::from_path(de.path()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn record(dt: NaiveDateTime) -> BackupRecord {
        BackupRecord {
            path: PathBuf::from(TimestampToken::from(dt).archive_file_name()),
            date_time: dt,
        }
    }

    fn touch(dir: &Path, dt: NaiveDateTime) -> PathBuf {
        let path = dir.join(TimestampToken::from(dt).archive_file_name());
        std::fs::write(&path, b"zip").unwrap();
        path
    }

    fn remaining(dir: &Path) -> HashSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|de| de.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_plan_across_400_days() {
        let now = now();
        let records = (0..400)
            .map(|days| record(now - Duration::days(days) - Duration::hours(1)))
            .collect_vec();
        let boundary = now - Duration::days(30);

        let plan = RetentionPolicy::default().plan(records.clone(), now);

        assert_eq!(plan.keep.len() + plan.delete.len(), records.len());
        for r in records.iter().filter(|r| r.date_time >= boundary) {
            assert!(plan.keep.contains(r), "recent {:?} must be kept", r.date_time);
        }

        let old_buckets = records
            .iter()
            .filter(|r| r.date_time < boundary)
            .into_group_map_by(|r| (r.date_time.year(), r.date_time.month()));
        for (bucket, members) in old_buckets {
            let newest = members.iter().max_by_key(|r| r.date_time).unwrap();
            let kept_in_bucket = plan
                .keep
                .iter()
                .filter(|r| r.date_time < boundary)
                .filter(|r| (r.date_time.year(), r.date_time.month()) == bucket)
                .collect_vec();
            assert_eq!(kept_in_bucket, vec![*newest], "bucket {bucket:?}");
        }
        assert_eq!(plan.recent, 30);
    }

    #[test]
    fn test_plan_keeps_everything_inside_window() {
        let now = now();
        let records = (0..5).map(|h| record(now - Duration::hours(h))).collect_vec();
        let plan = RetentionPolicy::default().plan(records, now);
        assert_eq!(plan.keep.len(), 5);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let now = now();
        let on_boundary = record(now - Duration::days(30));
        let same_month_older = record(now - Duration::days(31));
        let plan = RetentionPolicy::default().plan(vec![on_boundary.clone(), same_month_older.clone()], now);
        assert!(plan.keep.contains(&on_boundary));
        // May bucket has a single old member, it is its own keeper
        assert!(plan.keep.contains(&same_month_older));
    }

    #[test]
    fn test_prune_scenario_today_10_45_days_and_same_month() {
        let dir = TempDir::new().unwrap();
        let now = now();
        let today = touch(dir.path(), now - Duration::minutes(5));
        let ten = touch(dir.path(), now - Duration::days(10));
        // 45 days before 2024-06-15 is 2024-05-01
        let forty_five = now - Duration::days(45);
        assert_eq!((forty_five.year(), forty_five.month()), (2024, 5));
        let older_a = touch(dir.path(), forty_five - Duration::hours(2));
        let older_b = touch(dir.path(), forty_five - Duration::hours(5));
        let newest_old = touch(dir.path(), forty_five);

        let report = RetentionPolicy::default().prune(dir.path(), now);

        assert_eq!(report, PruneReport { kept: 3, deleted: 2, failed: 0 });
        assert!(today.exists() && ten.exists() && newest_old.exists());
        assert!(!older_a.exists() && !older_b.exists());
    }

    #[test]
    fn test_prune_ignores_foreign_files_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let now = now();
        for days in [40, 41, 42, 70, 71, 200, 201, 202] {
            touch(dir.path(), now - Duration::days(days));
        }
        std::fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        std::fs::write(dir.path().join("backup.zip"), b"keep me").unwrap();
        std::fs::write(dir.path().join("20200101_000000.zip.tmp"), b"keep me").unwrap();
        std::fs::create_dir(dir.path().join("20200101_000000.zip")).unwrap();

        let policy = RetentionPolicy::default();
        let first = policy.prune(dir.path(), now);
        let after_first = remaining(dir.path());
        let second = policy.prune(dir.path(), now);

        assert!(first.deleted > 0);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.kept, first.kept);
        assert_eq!(after_first, remaining(dir.path()));
        for foreign in ["notes.txt", "backup.zip", "20200101_000000.zip.tmp", "20200101_000000.zip"] {
            assert!(after_first.contains(foreign), "{foreign} must be untouched");
        }
    }

    #[test]
    fn test_failed_delete_does_not_stop_pruning() {
        let dir = TempDir::new().unwrap();
        let now = now();
        let keeper = touch(dir.path(), now - Duration::days(60));
        let stuck = touch(dir.path(), now - Duration::days(61));
        let removable = touch(dir.path(), now - Duration::days(62));
        let records = scan_records(dir.path()).unwrap();
        // a directory in place of the archive makes remove_file fail
        std::fs::remove_file(&stuck).unwrap();
        std::fs::create_dir(&stuck).unwrap();

        let report = RetentionPolicy::default().prune_records(records, now);

        assert_eq!(report, PruneReport { kept: 1, deleted: 1, failed: 1 });
        assert!(keeper.exists());
        assert!(stuck.is_dir());
        assert!(!removable.exists());
    }

    #[test]
    fn test_prune_missing_destination() {
        let dir = TempDir::new().unwrap();
        let report = RetentionPolicy::default().prune(&dir.path().join("nope"), now());
        assert_eq!(report, PruneReport::default());
    }

    #[test]
    fn test_policy_serde_humantime() {
        let policy: RetentionPolicy = serde_json::from_str(r#"{"recent_window":"7days"}"#).unwrap();
        assert_eq!(policy.recent_window, std::time::Duration::from_secs(7 * 24 * 3600));
    }
}
