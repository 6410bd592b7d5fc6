//! Propagating settings between liveries of the same vehicle.
//!
//! Given the identity of the vehicle the player last drove, the synchronizer
//! finds its record, collects every *similar* record (same model, any
//! version or livery) and copies the [`SYNCED_FIELDS`] lines onto them.
//! Records that end up byte-identical to what they were are not counted as
//! changed, so an unchanged database is never rewritten.

use std::fmt;

use similar::TextDiff;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::identity::VehicleFileIdentity;
use crate::record::VehicleRecord;

/// Fields copied from the source record to its siblings.
pub const SYNCED_FIELDS: &[&str] = &[
    "FOV",
    "Seat",
    "SeatPitch",
    "RearViewSize",
    "Mirror",
    "MirrorPhysical",
    "MirrorLeft",
    "MirrorCenter",
    "MirrorRight",
    "FFBSteeringTorqueMult",
];

/// Number of ids shown in summary log lines.
const LOG_LIST_LIMIT: usize = 20;

/// Errors that can occur during synchronization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No record has exactly the requested identity.
    #[error("no vehicle matches {0}")]
    SourceNotFound(VehicleFileIdentity),
}

/// A record before and after synchronization.
#[derive(Debug, Clone)]
pub struct RecordChange {
    /// The record as loaded.
    pub before: VehicleRecord,
    /// The record with synced fields applied.
    pub after: VehicleRecord,
}

impl RecordChange {
    /// Renders the change as a unified diff of the record's lines.
    #[must_use]
    pub fn unified_diff(&self) -> String {
        let old = join_lines(self.before.raw());
        let new = join_lines(self.after.raw());
        let before_label = format!("{} {}", self.before, self.before.identity());
        let after_label = format!("{} {}", self.after, self.after.identity());

        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .context_radius(2)
            .header(&before_label, &after_label)
            .to_string()
    }
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().fold(String::new(), |mut acc, line| {
        acc.push_str(line);
        acc.push('\n');
        acc
    })
}

/// Result of synchronizing one source vehicle.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Id of the source record.
    pub source_id: u32,
    /// Ids of every similar record, changed or not.
    pub similar_ids: Vec<u32>,
    /// Records that actually changed, already written back.
    pub changes: Vec<RecordChange>,
}

impl SyncOutcome {
    /// Number of records that changed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.changes.len()
    }
}

/// Formats a list for logs: at most `limit` items, then the total count.
///
/// ```
/// use liverysync_monitor::sync::format_list;
///
/// assert_eq!(format_list(&[1, 2, 3], 2), "[1, 2, ... (3 items)]");
/// assert_eq!(format_list::<u32>(&[], 2), "[]");
/// ```
pub fn format_list<T: fmt::Display>(items: &[T], limit: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let shown: Vec<String> = items.iter().take(limit).map(ToString::to_string).collect();
    let more = if items.len() > limit { ", ..." } else { "" };
    format!("[{}{} ({} items)]", shown.join(", "), more, items.len())
}

/// Copies [`SYNCED_FIELDS`] from the record matching `source` onto every
/// similar record in `records`, in place.
///
/// When several records share the source identity the first one wins and
/// the others are left as they are.
///
/// # Errors
///
/// Returns [`SyncError::SourceNotFound`] when no record matches `source`
/// exactly. `records` is left untouched in that case.
pub fn synchronize(
    source: &VehicleFileIdentity,
    records: &mut [VehicleRecord],
) -> Result<SyncOutcome, SyncError> {
    let Some(origin) = records
        .iter()
        .find(|r| r.identity().matches_exact(source))
        .cloned()
    else {
        error!(vehicle = %source, "Unable to locate vehicle");
        return Err(SyncError::SourceNotFound(source.clone()));
    };

    let similar: Vec<&VehicleRecord> = records
        .iter()
        .filter(|r| r.id() != origin.id())
        .filter(|r| !r.identity().matches_exact(origin.identity()))
        .filter(|r| origin.identity().is_similar(r.identity()))
        .collect();
    let similar_ids: Vec<u32> = similar.iter().map(|r| r.id()).collect();

    let mut changes = Vec::new();
    for candidate in similar {
        match candidate.with_fields_from(&origin, SYNCED_FIELDS) {
            Ok(updated) if updated != *candidate => changes.push(RecordChange {
                before: candidate.clone(),
                after: updated,
            }),
            Ok(_) => {}
            Err(e) => warn!(record = %candidate, error = %e, "Skipping vehicle that no longer parses"),
        }
    }

    changes.retain(|change| {
        match records.iter().position(|r| r.id() == change.after.id()) {
            Some(index) => {
                records[index] = change.after.clone();
                true
            }
            None => {
                error!(record = %change.after, "Unable to find index for updated vehicle");
                false
            }
        }
    });

    let changed_ids: Vec<u32> = changes.iter().map(|c| c.after.id()).collect();
    info!(
        vehicle = %origin.identity(),
        source = %origin,
        similar = %format_list(&similar_ids, LOG_LIST_LIMIT),
        updated = %format_list(&changed_ids, LOG_LIST_LIMIT),
        "Synchronized similar vehicles"
    );

    Ok(SyncOutcome {
        source_id: origin.id(),
        similar_ids,
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, file: &str, extra: &str) -> VehicleRecord {
        let text = format!("[VEHICLE]\nID={id}\nFile=\"{file}\"\n{extra}");
        VehicleRecord::from_lines(text.lines().map(str::to_string).collect()).unwrap()
    }

    fn identity(raw: &str) -> VehicleFileIdentity {
        VehicleFileIdentity::parse(raw).unwrap()
    }

    const FOO_2024: &str = r"C:\rF2\Installed\Vehicles\Teams\Foo\Car_2024\car.veh";
    const FOO_2025: &str = r"C:\rF2\Installed\Vehicles\Teams\Foo\Car_2025\car.veh";
    const BAR_2024: &str = r"C:\rF2\Installed\Vehicles\Teams\Bar\Car_2024\car.veh";

    fn fleet() -> Vec<VehicleRecord> {
        vec![
            record(1, FOO_2024, "FOV=60\nSeat=(0,1)"),
            record(2, FOO_2025, "FOV=50\nSeat=(0,1)\nOther=x"),
            record(3, BAR_2024, "FOV=50"),
        ]
    }

    #[test]
    fn propagates_to_similar_vehicle_only() {
        let mut records = fleet();

        let outcome = synchronize(&identity(FOO_2024), &mut records).unwrap();

        assert_eq!(outcome.source_id, 1);
        assert_eq!(outcome.similar_ids, vec![2]);
        assert_eq!(outcome.changed_count(), 1);
        assert_eq!(records[1].field("FOV"), Some("60"));
        assert_eq!(records[1].field("Other"), Some("x"));
        assert_eq!(records[2].field("FOV"), Some("50"));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut records = fleet();
        synchronize(&identity(FOO_2024), &mut records).unwrap();
        let snapshot = records.clone();

        let outcome = synchronize(&identity(FOO_2024), &mut records).unwrap();

        assert_eq!(outcome.similar_ids, vec![2]);
        assert_eq!(outcome.changed_count(), 0);
        assert_eq!(records, snapshot);
    }

    #[test]
    fn unknown_source_is_an_error() {
        let mut records = fleet();
        let snapshot = records.clone();

        let err = synchronize(&identity(r"Vehicles\Nope\1.0\car.veh"), &mut records).unwrap_err();

        assert!(matches!(err, SyncError::SourceNotFound(_)));
        assert_eq!(records, snapshot);
    }

    #[test]
    fn first_duplicate_identity_is_the_source() {
        let mut records = vec![
            record(1, FOO_2024, "FOV=60"),
            record(4, FOO_2024, "FOV=70"),
            record(2, FOO_2025, "FOV=50"),
        ];

        let outcome = synchronize(&identity(FOO_2024), &mut records).unwrap();

        assert_eq!(outcome.source_id, 1);
        assert_eq!(outcome.similar_ids, vec![2]);
        assert_eq!(records[1].field("FOV"), Some("70"), "duplicate left alone");
        assert_eq!(records[2].field("FOV"), Some("60"));
    }

    #[test]
    fn exact_duplicate_alone_is_not_rewritten() {
        let mut records = vec![record(1, FOO_2024, "FOV=60"), record(4, FOO_2024, "FOV=70")];
        let snapshot = records.clone();

        let outcome = synchronize(&identity(FOO_2024), &mut records).unwrap();

        assert!(outcome.similar_ids.is_empty());
        assert_eq!(outcome.changed_count(), 0);
        assert_eq!(records, snapshot);
    }

    #[test]
    fn source_match_ignores_case() {
        let mut records = fleet();
        let outcome = synchronize(&identity(&FOO_2024.to_uppercase()), &mut records).unwrap();
        assert_eq!(outcome.source_id, 1);
    }

    #[test]
    fn all_synced_fields_are_copied() {
        let source_fields: String = SYNCED_FIELDS
            .iter()
            .map(|f| format!("{f}=src\n"))
            .collect();
        let target_fields: String = SYNCED_FIELDS
            .iter()
            .map(|f| format!("{f}=dst\n"))
            .collect();
        let mut records = vec![
            record(1, FOO_2024, &source_fields),
            record(2, FOO_2025, &format!("{target_fields}Controller=keep")),
        ];

        synchronize(&identity(FOO_2024), &mut records).unwrap();

        for field in SYNCED_FIELDS {
            assert_eq!(records[1].field(field), Some("src"), "field {field}");
        }
        assert_eq!(records[1].field("Controller"), Some("keep"));
    }

    #[test]
    fn diff_shows_replaced_lines() {
        let mut records = fleet();
        let outcome = synchronize(&identity(FOO_2024), &mut records).unwrap();

        let diff = outcome.changes[0].unified_diff();
        assert!(diff.contains("-FOV=50"));
        assert!(diff.contains("+FOV=60"));
        assert!(diff.contains("#2"));
    }

    #[test]
    fn format_list_truncates() {
        assert_eq!(format_list(&[1, 2], 5), "[1, 2 (2 items)]");
        assert_eq!(format_list(&[1, 2, 3, 4], 2), "[1, 2, ... (4 items)]");
        assert_eq!(format_list::<u32>(&[], 5), "[]");
    }
}
