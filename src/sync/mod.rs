//! Sync Module
//!
//! Delta synchronization against the remote sheet endpoint: wire protocol,
//! HTTP client and dataset change detection.

mod client;
mod detect;
mod protocol;

pub use client::{apply_change_set, DeltaSyncClient, PollResult, SyncOutcome};
pub use detect::{diff_datasets, DatasetDiff};
pub use protocol::{
    parse_csv, parse_rows, ChangeKind, ChangeOp, ChangeSet, ChangesOutcome, SnapshotResponse,
};
