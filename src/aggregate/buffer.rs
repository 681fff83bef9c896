//! Ordered record buffer, drained once per harvest by the transport
//! collaborator.

use std::sync::Arc;

use parking_lot::Mutex;

use super::records::RequestRecord;

#[derive(Clone, Default)]
pub struct OutputBuffer {
    records: Arc<Mutex<Vec<RequestRecord>>>,
}

impl OutputBuffer {
    pub fn push(&self, record: RequestRecord) {
        self.records.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Gives everything currently buffered to the caller and clears.
    pub fn take(&self) -> Vec<RequestRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}
