mod recompute;

pub use recompute::{RecomputeSummary, run_recompute_pass, schedule_recompute};
