use secstore_types::Entry;

/// Immediate children of a path, in backend order.
///
/// Holds no cursor into the store; calling
/// [`PathStore::entries`](crate::PathStore::entries) again restarts the
/// enumeration from the current state.
#[derive(Debug)]
pub struct Entries {
    inner: std::vec::IntoIter<Entry>,
}

impl Entries {
    pub(crate) fn new(entries: Vec<Entry>) -> Self {
        Self {
            inner: entries.into_iter(),
        }
    }
}

impl Iterator for Entries {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Entries {}
