//! Progress snapshot shared between a provider and the code that fills it

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{DownloadProgress, ProgressPhase};

/// Write side of a provider's progress snapshot, handed to whatever
/// downloads or loads the model. The provider keeps a clone and serves
/// [`InferenceProvider::progress`](super::InferenceProvider::progress) from it.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    snapshot: Arc<RwLock<Option<DownloadProgress>>>,
}

impl ProgressReporter {
    pub fn report(&self, phase: ProgressPhase, percentage: f32, current_item: Option<&str>) {
        *self.snapshot.write() = Some(DownloadProgress::new(
            phase,
            percentage,
            current_item.map(str::to_string),
        ));
    }

    pub(crate) fn snapshot(&self) -> Option<DownloadProgress> {
        self.snapshot.read().clone()
    }

    pub(crate) fn clear(&self) {
        *self.snapshot.write() = None;
    }
}
