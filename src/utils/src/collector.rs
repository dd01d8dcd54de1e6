use std::time::Duration;

use crate::fs::append_to_file;

/// Collects how long each scheduling pass took and how many coflows it handled.
#[derive(Debug, Clone, Default)]
pub struct OverheadCollector {
    // computation time, number of coflows in the pass
    data: Vec<(Duration, usize)>,
}

impl OverheadCollector {
    pub fn collect(&mut self, duration: Duration, scale: usize) {
        self.data.push((duration, scale));

        if let Ok(path) = std::env::var("COFLOWSIM_COLLECT_SCHEDULER_OVERHEAD") {
            if let Err(e) = append_to_file(&path, &format!("{} {}", scale, duration.as_nanos())) {
                log::warn!("failed to record scheduler overhead to {}: {}", path, e);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn total(&self) -> Duration {
        self.data.iter().map(|x| x.0).sum()
    }

    pub fn max(&self) -> Option<Duration> {
        self.data.iter().map(|x| x.0).max()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.total() / self.data.len() as u32)
        }
    }
}
