//! Field-addressed access to records.

use crate::error::{Error, Result};
use crate::fields::{Comparable, Fields};
use crate::tuple::{Row, Tuple};
use crate::value::Value;

/// Named and positional access shared by [`TupleEntry`] and [`EntryView`].
pub trait Entry {
    fn fields(&self) -> &Fields;

    fn row(&self) -> &dyn Row;

    fn size(&self) -> usize {
        self.row().arity()
    }

    fn pos(&self, field: impl Into<Comparable>) -> Result<usize> {
        let field = field.into();
        if self.fields().is_unknown() || self.fields().is_none() {
            return match field {
                Comparable::Pos(p) if p >= 0 => Ok(p as usize),
                Comparable::Pos(p) if (self.size() as i64 + p as i64) >= 0 => {
                    Ok((self.size() as i64 + p as i64) as usize)
                }
                other => Err(Error::FieldsResolver {
                    selector: other.to_string(),
                    declared: self.fields().to_string(),
                    missing: other.to_string(),
                }),
            };
        }
        self.fields().pos_of(&field)
    }

    fn get(&self, field: impl Into<Comparable>) -> Result<&Value> {
        let pos = self.pos(field)?;
        self.row()
            .get(pos)
            .ok_or_else(|| Error::Tuple(format!("position {pos} out of range for record of size {}", self.size())))
    }

    /// `None` for null; an error when the value cannot be read as an integer.
    fn get_i64(&self, field: impl Into<Comparable>) -> Result<Option<i64>> {
        let v = self.get(field)?;
        if v.is_null() {
            return Ok(None);
        }
        v.as_i64()
            .map(Some)
            .ok_or_else(|| Error::Tuple(format!("cannot read {v} as an integer")))
    }

    fn get_f64(&self, field: impl Into<Comparable>) -> Result<Option<f64>> {
        let v = self.get(field)?;
        if v.is_null() {
            return Ok(None);
        }
        v.as_f64()
            .map(Some)
            .ok_or_else(|| Error::Tuple(format!("cannot read {v} as a float")))
    }

    fn get_str(&self, field: impl Into<Comparable>) -> Result<Option<&str>> {
        match self.get(field)? {
            Value::Null => Ok(None),
            Value::Str(s) => Ok(Some(s.as_str())),
            other => Err(Error::Tuple(format!("{other} is not a string"))),
        }
    }

    fn select_tuple(&self, selector: &Fields) -> Result<Tuple> {
        if selector.is_all() {
            return Ok(self.row().to_tuple());
        }
        let mut out = Tuple::with_capacity(selector.size());
        for c in selector.iter() {
            out.add(self.get(c)?.clone())?;
        }
        Ok(out)
    }

    fn select_entry(&self, selector: &Fields) -> Result<TupleEntry> {
        let fields = if self.fields().is_unknown() {
            selector.clone()
        } else {
            self.fields().select(selector)?
        };
        Ok(TupleEntry::new(fields, self.select_tuple(selector)?))
    }
}

/// Owned `(Fields, Tuple)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleEntry {
    fields: Fields,
    tuple: Tuple,
    unmodifiable: bool,
}

impl TupleEntry {
    pub fn new(fields: Fields, tuple: Tuple) -> Self {
        Self {
            fields,
            tuple,
            unmodifiable: false,
        }
    }

    /// An entry whose tuples are frozen as they are assigned.
    pub fn unmodifiable(fields: Fields, mut tuple: Tuple) -> Self {
        tuple.set_unmodifiable();
        Self {
            fields,
            tuple,
            unmodifiable: true,
        }
    }

    pub fn is_unmodifiable(&self) -> bool {
        self.unmodifiable
    }

    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }

    pub fn into_tuple(self) -> Tuple {
        self.tuple
    }

    pub fn set_tuple(&mut self, mut tuple: Tuple) {
        if self.unmodifiable {
            tuple.set_unmodifiable();
        }
        self.tuple = tuple;
    }

    pub fn set(&mut self, field: impl Into<Comparable>, value: impl Into<Value>) -> Result<()> {
        let pos = self.pos(field)?;
        self.tuple.set(pos, value)
    }

    pub fn as_view(&self) -> EntryView<'_> {
        EntryView::new(&self.fields, &self.tuple)
    }
}

impl Entry for TupleEntry {
    fn fields(&self) -> &Fields {
        &self.fields
    }

    fn row(&self) -> &dyn Row {
        &self.tuple
    }
}

/// Borrowed `(Fields, Row)` pair used on the hot path.
#[derive(Clone, Copy)]
pub struct EntryView<'a> {
    fields: &'a Fields,
    row: &'a dyn Row,
}

impl<'a> EntryView<'a> {
    pub fn new(fields: &'a Fields, row: &'a dyn Row) -> Self {
        Self { fields, row }
    }

    pub fn to_entry(&self) -> TupleEntry {
        TupleEntry::new(self.fields.clone(), self.row.to_tuple())
    }
}

impl Entry for EntryView<'_> {
    fn fields(&self) -> &Fields {
        self.fields
    }

    fn row(&self) -> &dyn Row {
        self.row
    }
}

impl std::fmt::Debug for EntryView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fields: [{}] tuple: {}", self.fields, crate::tuple::preview(self.row, 256))
    }
}
