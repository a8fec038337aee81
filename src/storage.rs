pub mod snapshot;

pub use snapshot::{BaseMapping, SnapshotError, load_snapshot, load_snapshot_or_empty};
