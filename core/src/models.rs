/*
    spotify-archiver-rs | Rust CLI tool to move new master playlist tracks into an archive.
    Copyright (C) 2026  spotify-archiver-rs contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::archive::ArchiveError;
use crate::auth::AuthError;
use rspotify::model::TrackId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A playlist's contents at fetch time, in server-returned order.
pub type TrackList = Vec<TrackId<'static>>;

/// The tracks to move in one run.
///
/// `to_add` is every master track not already in the archive, in master's order.
/// `to_remove` is the full master snapshot taken before any mutation; it is never
/// recomputed after tracks start moving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_add: TrackList,
    pub to_remove: TrackList,
}

impl SyncPlan {
    /// Computes the plan from the two fetched track lists. Pure, no I/O.
    pub fn build(master: &[TrackId<'static>], archive: &[TrackId<'static>]) -> Self {
        let archived: HashSet<&TrackId> = archive.iter().collect();

        let to_add = master
            .iter()
            .filter(|id| !archived.contains(*id))
            .cloned()
            .collect();

        Self {
            to_add,
            to_remove: master.to_vec(),
        }
    }

    /// An empty `to_add` means master was likely already drained by a prior run;
    /// the whole mutation step, removal included, is skipped.
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty()
    }
}

/// The result of one run, as reported to the operator.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Nothing new to move; master was left untouched.
    NoOp,
    Success {
        added: usize,
        removed: usize,
    },
    /// Tracks landed in the archive but the removal from master failed.
    /// Safe to retry: the next plan excludes the already-archived tracks.
    PartialFailure {
        added: usize,
        remove_error: ArchiveError,
    },
    /// The add step failed; master is fully intact and removal was never attempted.
    AddFailure {
        error: ArchiveError,
    },
    /// A playlist could not be fetched; no mutation was attempted.
    FetchFailure {
        error: ArchiveError,
    },
    AuthFailure {
        reason: AuthError,
    },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::NoOp => "no-op",
            SyncOutcome::Success { .. } => "success",
            SyncOutcome::PartialFailure { .. } => "partial-failure",
            SyncOutcome::AddFailure { .. } => "add-failure",
            SyncOutcome::FetchFailure { .. } => "fetch-failure",
            SyncOutcome::AuthFailure { .. } => "auth-failure",
        }
    }
}

/// Flat report for JSON export.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: String,
    pub added: usize,
    pub removed: usize,
    pub error: Option<String>,
}

impl From<&SyncOutcome> for SyncReport {
    fn from(outcome: &SyncOutcome) -> Self {
        let (added, removed, error) = match outcome {
            SyncOutcome::NoOp => (0, 0, None),
            SyncOutcome::Success { added, removed } => (*added, *removed, None),
            SyncOutcome::PartialFailure {
                added,
                remove_error,
            } => (*added, 0, Some(remove_error.to_string())),
            SyncOutcome::AddFailure { error } => (0, 0, Some(error.to_string())),
            SyncOutcome::FetchFailure { error } => (0, 0, Some(error.to_string())),
            SyncOutcome::AuthFailure { reason } => (0, 0, Some(reason.to_string())),
        };

        Self {
            outcome: outcome.label().to_string(),
            added,
            removed,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(id: &str) -> TrackId<'static> {
        TrackId::from_id(id.to_string()).unwrap()
    }

    fn tids(ids: &[&str]) -> TrackList {
        ids.iter().map(|id| tid(id)).collect()
    }

    #[test]
    fn test_plan_excludes_archived_tracks_and_keeps_master_order() {
        let master = tids(&["t1", "t2", "t3"]);
        let archive = tids(&["t2"]);

        let plan = SyncPlan::build(&master, &archive);

        assert_eq!(plan.to_add, tids(&["t1", "t3"]));
        assert_eq!(plan.to_remove, master);
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_plan_to_remove_is_always_the_full_master_snapshot() {
        let master = tids(&["t1", "t2"]);
        let archive = tids(&["t1", "t2", "t3"]);

        let plan = SyncPlan::build(&master, &archive);

        // Already-archived tracks still leave master on a run with work to do.
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, master);
    }

    #[test]
    fn test_plan_empty_master_is_noop() {
        let archive = tids(&["t1", "t2"]);
        let plan = SyncPlan::build(&[], &archive);

        assert!(plan.is_noop());
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_plan_empty_archive_adds_everything() {
        let master = tids(&["t1", "t2", "t3"]);
        let plan = SyncPlan::build(&master, &[]);

        assert_eq!(plan.to_add, master);
    }

    #[test]
    fn test_plan_is_idempotent_after_a_completed_sync() {
        let master = tids(&["t1", "t2", "t3"]);
        let archive = tids(&["t2"]);
        let plan = SyncPlan::build(&master, &archive);

        // Post-sync state: master drained, archive holds the moved tracks too.
        let mut archive_after = archive.clone();
        archive_after.extend(plan.to_add.iter().cloned());

        let second = SyncPlan::build(&[], &archive_after);
        assert!(second.is_noop());
    }

    #[test]
    fn test_plan_replans_to_noop_when_only_removal_is_pending() {
        // After a partial failure the adds are archived but master is unchanged.
        let master = tids(&["t1", "t2", "t3"]);
        let archive_after = tids(&["t2", "t1", "t3"]);

        let second = SyncPlan::build(&master, &archive_after);
        assert!(second.is_noop());
    }

    #[test]
    fn test_report_from_success_outcome() {
        let outcome = SyncOutcome::Success {
            added: 2,
            removed: 3,
        };
        let report = SyncReport::from(&outcome);

        assert_eq!(report.outcome, "success");
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 3);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_report_from_partial_failure_keeps_added_count_and_error() {
        let outcome = SyncOutcome::PartialFailure {
            added: 2,
            remove_error: ArchiveError::InvalidId("bogus".to_string()),
        };
        let report = SyncReport::from(&outcome);

        assert_eq!(report.outcome, "partial-failure");
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 0);
        assert!(report.error.unwrap().contains("bogus"));
    }
}
