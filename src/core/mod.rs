pub mod comparator;
pub mod engine;
pub mod scanner;

pub use comparator::{CompareMode, ComparisonResult, FileComparator, FileRelation};
pub use engine::{
    DirectoryPair, EntryOutcome, Reconciler, SyncAction, SyncConfig, SyncReport, SyncStatus,
};
pub use scanner::{DirListing, ExcludeRules, FileScanner, ScanConfig};
