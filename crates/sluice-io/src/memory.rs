//! In-memory tap for tests and small lookups.
//!
//! Clones share the same backing vector, so a test can keep a handle to a
//! sink tap and inspect what the graph wrote after it ran.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sluice_core::fields::Fields;
use sluice_core::tuple::{Row, Tuple};

use crate::error::{Error, Result};
use crate::tap::{Tap, TupleCollector, TupleIterator};

/// Thread-safe in-memory tap backed by a vector of tuples.
#[derive(Clone)]
pub struct MemoryTap {
    identifier: String,
    fields: Fields,
    data: Arc<Mutex<Vec<Tuple>>>,
}

impl MemoryTap {
    pub fn new(name: &str, fields: Fields) -> Self {
        Self {
            identifier: format!("memory://{name}"),
            fields,
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A tap pre-populated with `tuples`.
    pub fn with_tuples(name: &str, fields: Fields, tuples: Vec<Tuple>) -> Self {
        let tap = Self::new(name, fields);
        *tap.lock() = tuples;
        tap
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Tuple>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current contents.
    pub fn tuples(&self) -> Vec<Tuple> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for MemoryTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTap")
            .field("identifier", &self.identifier)
            .field("fields", &self.fields)
            .field("len", &self.len())
            .finish()
    }
}

impl Tap for MemoryTap {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn source_fields(&self) -> Fields {
        self.fields.clone()
    }

    fn open_for_read(&self) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(MemoryIterator {
            rows: self.tuples().into_iter(),
        }))
    }

    fn open_for_write(&self, _fields: &Fields) -> Result<Box<dyn TupleCollector>> {
        self.clear();
        Ok(Box::new(MemoryCollector {
            identifier: self.identifier.clone(),
            data: Some(self.data.clone()),
        }))
    }
}

struct MemoryIterator {
    rows: std::vec::IntoIter<Tuple>,
}

impl TupleIterator for MemoryIterator {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        Ok(self.rows.next())
    }
}

struct MemoryCollector {
    identifier: String,
    data: Option<Arc<Mutex<Vec<Tuple>>>>,
}

impl TupleCollector for MemoryCollector {
    fn add(&mut self, row: &dyn Row) -> Result<()> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| Error::Closed(self.identifier.clone()))?;
        data.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row.to_tuple());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}
