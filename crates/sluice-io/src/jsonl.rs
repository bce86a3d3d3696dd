//! Newline-delimited JSON tap.
//!
//! Records are written as one JSON object per line keyed by field name; when
//! the sink fields carry no names, each line is a JSON array instead. Reading
//! accepts both shapes.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use sluice_core::fields::{Comparable, Fields};
use sluice_core::tuple::{Row, Tuple};
use sluice_core::value::Value;

use crate::error::{Error, Result};
use crate::tap::{Tap, TupleCollector, TupleIterator};

#[derive(Debug, Clone)]
pub struct JsonlTap {
    path: PathBuf,
    identifier: String,
    fields: Fields,
}

impl JsonlTap {
    pub fn new(path: impl AsRef<Path>, fields: Fields) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            identifier: format!("file://{}", path.display()),
            path,
            fields,
        }
    }
}

impl Tap for JsonlTap {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn source_fields(&self) -> Fields {
        self.fields.clone()
    }

    fn open_for_read(&self) -> Result<Box<dyn TupleIterator>> {
        let f = File::open(&self.path)?;
        Ok(Box::new(JsonlReader {
            lines: BufReader::new(f).lines(),
            names: names_of(&self.fields),
            line_no: 0,
            identifier: self.identifier.clone(),
        }))
    }

    fn open_for_write(&self, fields: &Fields) -> Result<Box<dyn TupleCollector>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let f = File::create(&self.path)?;
        Ok(Box::new(JsonlWriter::to_writer(f, names_of(fields), self.identifier.clone())))
    }
}

/// Column names when every field is named.
fn names_of(fields: &Fields) -> Option<Vec<String>> {
    if !fields.is_defined() {
        return None;
    }
    fields
        .iter()
        .map(|c| match c {
            Comparable::Name(n) => Some(n.clone()),
            Comparable::Pos(_) => None,
        })
        .collect()
}

pub struct JsonlWriter<W: Write> {
    writer: Option<BufWriter<W>>,
    // header order to keep column ordering stable across records
    columns: Option<Vec<String>>,
    identifier: String,
}

impl<W: Write> JsonlWriter<W> {
    pub fn to_writer(writer: W, columns: Option<Vec<String>>, identifier: String) -> Self {
        Self {
            writer: Some(BufWriter::new(writer)),
            columns,
            identifier,
        }
    }

    fn write_row(&mut self, row: &dyn Row) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Closed(self.identifier.clone()))?;
        let line = match &self.columns {
            Some(columns) if columns.len() == row.arity() => {
                let mut obj = serde_json::Map::new();
                for (ci, name) in columns.iter().enumerate() {
                    obj.insert(name.clone(), value_to_json(row.value(ci)));
                }
                serde_json::to_string(&obj)?
            }
            _ => {
                let arr: Vec<serde_json::Value> = (0..row.arity()).map(|i| value_to_json(row.value(i))).collect();
                serde_json::to_string(&arr)?
            }
        };
        writeln!(writer, "{}", line)?;
        Ok(())
    }
}

impl<W: Write + Send> TupleCollector for JsonlWriter<W> {
    fn add(&mut self, row: &dyn Row) -> Result<()> {
        self.write_row(row)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        Ok(())
    }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    use Value::*;
    match v {
        Null => serde_json::Value::Null,
        Bool(b) => serde_json::Value::Bool(*b),
        I32(i) => serde_json::Value::from(*i),
        I64(i) => serde_json::Value::from(*i),
        F32(f) => serde_json::Value::from(*f as f64),
        F64(f) => serde_json::Value::from(*f),
        Str(s) => serde_json::Value::String(s.clone()),
        Bin(b) => serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect()),
        Tuple(t) => serde_json::Value::Array(t.iter().map(value_to_json).collect()),
    }
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::I64(i),
            None => Value::F64(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::Tuple(items.into_iter().map(json_to_value).collect()),
        other => Value::Str(other.to_string()),
    }
}

struct JsonlReader {
    lines: Lines<BufReader<File>>,
    names: Option<Vec<String>>,
    line_no: usize,
    identifier: String,
}

impl JsonlReader {
    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::Malformed {
            location: format!("{}:{}", self.identifier, self.line_no),
            reason: reason.into(),
        }
    }
}

impl TupleIterator for JsonlReader {
    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: serde_json::Value = serde_json::from_str(&line)?;
            return match parsed {
                serde_json::Value::Array(items) => Ok(Some(items.into_iter().map(json_to_value).collect())),
                serde_json::Value::Object(mut obj) => {
                    let Some(names) = &self.names else {
                        return Err(self.malformed("object record but tap fields are not named"));
                    };
                    let t: Tuple = names
                        .iter()
                        .map(|n| obj.remove(n).map(json_to_value).unwrap_or(Value::Null))
                        .collect();
                    Ok(Some(t))
                }
                other => Err(self.malformed(format!("expected object or array, got {other}"))),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::tuple;

    #[test]
    fn named_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let fields = Fields::new(["id", "name"]).unwrap();
        let tap = JsonlTap::new(dir.path().join("out.jsonl"), fields.clone());

        let mut out = tap.open_for_write(&fields).unwrap();
        out.add(&tuple![1i64, "a"]).unwrap();
        out.add(&tuple![2i64, Value::Null]).unwrap();
        out.close().unwrap();

        let text = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert_eq!(text.lines().next().unwrap(), r#"{"id":1,"name":"a"}"#);

        let mut it = tap.open_for_read().unwrap();
        assert_eq!(it.next_tuple().unwrap(), Some(tuple![1i64, "a"]));
        assert_eq!(it.next_tuple().unwrap(), Some(tuple![2i64, Value::Null]));
        assert_eq!(it.next_tuple().unwrap(), None);
    }

    #[test]
    fn positional_fields_write_arrays() {
        let mut buf = Vec::new();
        {
            let mut w = JsonlWriter::to_writer(&mut buf, names_of(&Fields::size_of(2)), "mem".into());
            w.write_row(&tuple![1.5f64, true]).unwrap();
            w.writer.take().unwrap().flush().unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "[1.5,true]\n");
    }
}
