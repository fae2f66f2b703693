use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init();
}

/// Timing and size of one prefab save.
#[derive(Debug, Clone)]
pub struct SaveMetrics {
    pub root: String,
    pub duration_us: u128,
    pub actors: usize,
    pub sub_prefabs: usize,
    pub objects: usize,
    pub overrides: usize,
    pub bytes: usize,
    pub budget_us: u128,
}

impl SaveMetrics {
    pub fn over_budget(&self) -> bool {
        self.duration_us > self.budget_us
    }

    pub fn log(&self) {
        let seconds = self.duration_us as f64 / 1_000_000.0;
        if self.over_budget() {
            tracing::warn!(
                root = %self.root,
                duration_us = self.duration_us,
                actors = self.actors,
                sub_prefabs = self.sub_prefabs,
                objects = self.objects,
                overrides = self.overrides,
                bytes = self.bytes,
                "prefab save exceeded budget ({}us > {}us)",
                self.duration_us,
                self.budget_us
            );
        } else {
            tracing::info!(
                root = %self.root,
                duration_us = self.duration_us,
                actors = self.actors,
                sub_prefabs = self.sub_prefabs,
                objects = self.objects,
                overrides = self.overrides,
                bytes = self.bytes,
                "took {:.6}s saving prefab",
                seconds
            );
        }
    }
}

/// Timing and size of one prefab load, nested instantiations included.
#[derive(Debug, Clone)]
pub struct LoadMetrics {
    pub root: String,
    pub duration_us: u128,
    pub actors: usize,
    pub objects: usize,
    pub sub_prefabs: usize,
    pub depth: usize,
    pub bytes: usize,
    pub budget_us: u128,
}

impl LoadMetrics {
    pub fn over_budget(&self) -> bool {
        self.duration_us > self.budget_us
    }

    pub fn log(&self) {
        if self.over_budget() {
            tracing::warn!(
                root = %self.root,
                duration_us = self.duration_us,
                actors = self.actors,
                objects = self.objects,
                sub_prefabs = self.sub_prefabs,
                depth = self.depth,
                bytes = self.bytes,
                "prefab load exceeded budget ({}us > {}us)",
                self.duration_us,
                self.budget_us
            );
        } else if self.depth > 0 {
            tracing::debug!(
                root = %self.root,
                duration_us = self.duration_us,
                actors = self.actors,
                depth = self.depth,
                "nested prefab loaded"
            );
        } else {
            tracing::info!(
                root = %self.root,
                duration_us = self.duration_us,
                actors = self.actors,
                objects = self.objects,
                sub_prefabs = self.sub_prefabs,
                bytes = self.bytes,
                "prefab loaded"
            );
        }
    }
}
