use super::Record;

/// Writes a record to an output destination with [`Recorder::write`].
pub trait Recorder {
    /// Writes a record.
    fn write(&mut self, record: Record);
}

/// Stores records and writes values aggregated over them on [`AggregateRecorder::flush`].
pub trait AggregateRecorder {
    /// Stores the record.
    fn store(&mut self, record: Record);

    /// Writes values aggregated from the stored records.
    ///
    /// `step` is the x-axis of the written values, e.g., the total number of
    /// environment steps.
    fn flush(&mut self, step: i64);
}
