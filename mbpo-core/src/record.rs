//! Types and traits for the diagnostics stream.
//!
//! The training loop emits a [`Record`] once per epoch, mapping string keys such as
//! `"Q-avg"`, `"model/val_loss"` or `"evaluation/return-average"` to values.
//! Records are handed to a [`Recorder`] or an [`AggregateRecorder`], which decide
//! where the values end up (memory, TFRecord, nowhere).
//!
//! ```rust
//! use mbpo_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("epoch", RecordValue::Scalar(3.0));
//! record.insert("model/val_loss", RecordValue::Scalar(0.12));
//! assert_eq!(record.get_scalar("epoch").unwrap(), 3.0);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
