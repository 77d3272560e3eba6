//! TensorBoard recorder for MBPO.
use log::warn;
use mbpo_core::record::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use std::path::Path;
use tensorboard_rs::summary_writer::SummaryWriter;

/// Writes records to TFRecord.
///
/// As an [`AggregateRecorder`], records stored during an epoch are aggregated
/// with [`RecordStorage`] and written at the step given to
/// [`AggregateRecorder::flush`].
pub struct TensorboardRecorder {
    writer: SummaryWriter,
    storage: RecordStorage,
    step_key: String,
    ignore_unsupported_value: bool,
}

impl TensorboardRecorder {
    /// Constructs a [`TensorboardRecorder`].
    ///
    /// TFRecord will be stored in `logdir`.
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            storage: RecordStorage::new(),
            step_key: "timesteps_total".to_string(),
            ignore_unsupported_value: true,
        }
    }

    /// Constructs a [`TensorboardRecorder`] warning about values it cannot write.
    pub fn new_with_check_unsupported_value<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            ignore_unsupported_value: false,
            ..Self::new(logdir)
        }
    }

    /// Sets the key of the step in records given to [`Recorder::write`].
    pub fn step_key(mut self, v: impl Into<String>) -> Self {
        self.step_key = v.into();
        self
    }

    fn write_at(&mut self, record: &Record, step: usize) {
        for (k, v) in record.iter() {
            if *k == self.step_key {
                continue;
            }
            match v {
                RecordValue::Scalar(v) => self.writer.add_scalar(k, *v, step),
                RecordValue::Array1(vs) => {
                    for (i, v) in vs.iter().enumerate() {
                        self.writer.add_scalar(&format!("{}/{}", k, i), *v, step);
                    }
                }
                RecordValue::DateTime(_) => {}
                _ => {
                    if !self.ignore_unsupported_value {
                        warn!("Unsupported value: {:?}", (k, v));
                    }
                }
            }
        }
    }
}

impl Recorder for TensorboardRecorder {
    /// Writes a given [`Record`] at the step found under the step key.
    ///
    /// Records without the step key are written at step 0.
    fn write(&mut self, record: Record) {
        let step = match record.get_scalar(&self.step_key) {
            Ok(v) => v as usize,
            Err(_) => {
                warn!("Record has no step key {:?}", self.step_key);
                0
            }
        };
        self.write_at(&record, step);
    }
}

impl AggregateRecorder for TensorboardRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let record = self.storage.aggregate();
        self.write_at(&record, step.max(0) as usize);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_flush_writes_event_file() {
        let dir = TempDir::new("tensorboard").unwrap();
        let mut recorder = TensorboardRecorder::new(dir.path());
        recorder.store(Record::from_scalar("Q-avg", 1.0));
        recorder.store(Record::from_scalar("Q-avg", 2.0));
        recorder.store(Record::from_slice(&[(
            "model/elites",
            RecordValue::Array1(vec![0.0, 3.0, 4.0]),
        )]));
        recorder.flush(1000);
        recorder.write(Record::from_slice(&[
            ("timesteps_total", RecordValue::Scalar(2000.0)),
            ("return-average", RecordValue::Scalar(-3.0)),
            ("note", RecordValue::String("ok".into())),
        ]));

        let n_files = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(n_files > 0);
    }
}
