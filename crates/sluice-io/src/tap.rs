//! Source and sink interfaces.

use sluice_core::entry::Entry;
use sluice_core::fields::Fields;
use sluice_core::tuple::{Row, Tuple};

use crate::error::Result;

/// Pull-style record source.
pub trait TupleIterator: Send {
    fn next_tuple(&mut self) -> Result<Option<Tuple>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Push-style record sink. `close` must be called exactly once.
pub trait TupleCollector: Send {
    fn add(&mut self, row: &dyn Row) -> Result<()>;

    fn add_entry<E: Entry>(&mut self, entry: &E) -> Result<()>
    where
        Self: Sized,
    {
        self.add(entry.row())
    }

    fn close(&mut self) -> Result<()>;
}

/// A named resource records are read from or written to. Two taps with the
/// same identifier refer to the same resource.
pub trait Tap: Send + Sync {
    fn identifier(&self) -> &str;

    /// Fields of the records this tap yields.
    fn source_fields(&self) -> Fields;

    fn open_for_read(&self) -> Result<Box<dyn TupleIterator>>;

    /// Opening for write replaces any previous contents.
    fn open_for_write(&self, fields: &Fields) -> Result<Box<dyn TupleCollector>>;
}
