//! Fit loop, callbacks and training history.

pub mod callbacks;
pub mod fit;
pub mod history;
pub mod logs;

pub use callbacks::{Callback, CallbackAction, EarlyStopping, MetricLogger, ModelCheckpoint};
pub use fit::FitOptions;
pub use history::History;
pub use logs::{Logs, MonitorMode};
