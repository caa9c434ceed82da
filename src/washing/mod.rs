pub mod board;
pub mod classifier;
pub mod finalizer;
pub mod scanner;

pub use board::WashBoard;
pub use classifier::{EligibilityRule, WashPhase};
pub use finalizer::{BatchSummary, WashFinalizer};
pub use scanner::{PendingScanner, DEBUG_SCAN_INTERVAL_SECS, DEFAULT_SCAN_INTERVAL_SECS};
