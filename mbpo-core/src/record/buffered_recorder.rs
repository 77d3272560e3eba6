use super::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};

/// Keeps records in memory.
///
/// Records given to [`Recorder::write`] are kept as they are. Records given to
/// [`AggregateRecorder::store`] are aggregated on [`AggregateRecorder::flush`] and
/// the aggregated record, with the step under the key `"step"`, is kept as well.
/// Useful for inspecting the diagnostics stream in tests.
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<Record>,
    storage: RecordStorage,
}

impl BufferedRecorder {
    /// Constructs the recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an iterator over the kept records.
    pub fn iter(&self) -> std::slice::Iter<Record> {
        self.buf.iter()
    }

    /// Returns the number of kept records.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns the last kept record.
    pub fn last(&self) -> Option<&Record> {
        self.buf.last()
    }
}

impl Recorder for BufferedRecorder {
    fn write(&mut self, record: Record) {
        self.buf.push(record);
    }
}

impl AggregateRecorder for BufferedRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let mut record = self.storage.aggregate();
        record.insert("step", RecordValue::Scalar(step as f32));
        self.buf.push(record);
    }
}
