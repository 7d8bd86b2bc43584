//! UniPC (Unified Predictor-Corrector)
//!
//! Only the configuration check lives here: a scheduler of this kind cannot be
//! constructed yet.

use tracing::error;

use crate::error::SchedulerError;
use crate::sampler::SchedulerKind;

// TODO: implement the bh2 predictor/corrector pair on top of HistoryBuffer
// with history_depth model outputs and lift this rejection.
pub fn unsupported() -> SchedulerError {
    error!(kind = %SchedulerKind::UniPc, "scheduler kind is not implemented");
    SchedulerError::Unimplemented(SchedulerKind::UniPc)
}
