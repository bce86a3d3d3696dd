//! `Fields`: ordered column descriptors used both to *declare* the columns a
//! producer emits and to *select* columns out of a record.
//!
//! A `Fields` is immutable once built. The only interior state is a lazily
//! built name → position index.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::comparator::FieldComparator;
use crate::error::{Error, Result};

/// A single column reference: a name or a position (negative counts from the end).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparable {
    Name(String),
    Pos(i32),
}

impl From<&str> for Comparable {
    fn from(s: &str) -> Self {
        Comparable::Name(s.to_string())
    }
}

impl From<String> for Comparable {
    fn from(s: String) -> Self {
        Comparable::Name(s)
    }
}

impl From<&String> for Comparable {
    fn from(s: &String) -> Self {
        Comparable::Name(s.clone())
    }
}

impl From<i32> for Comparable {
    fn from(p: i32) -> Self {
        Comparable::Pos(p)
    }
}

impl From<&Comparable> for Comparable {
    fn from(c: &Comparable) -> Self {
        c.clone()
    }
}

impl fmt::Display for Comparable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparable::Name(n) => write!(f, "'{n}'"),
            Comparable::Pos(p) => write!(f, "{p}"),
        }
    }
}

/// Sentinel kinds. `Defined` is an explicit list of names and/or positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Defined,
    All,
    Unknown,
    Args,
    Group,
    Values,
    Results,
    Replace,
    Swap,
    None,
}

pub struct Fields {
    kind: Kind,
    items: Vec<Comparable>,
    comparators: Vec<Option<Arc<dyn FieldComparator>>>,
    index: OnceLock<HashMap<String, usize>>,
}

impl Clone for Fields {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            items: self.items.clone(),
            comparators: self.comparators.clone(),
            index: self.index.clone(),
        }
    }
}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Defined => write!(f, "Fields([{self}])"),
            other => write!(f, "Fields::{other:?}"),
        }
    }
}

impl PartialEq for Fields {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.items == other.items
    }
}

impl Eq for Fields {}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind != Kind::Defined {
            return write!(f, "{}", format!("{:?}", self.kind).to_uppercase());
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::none()
    }
}

impl Fields {
    fn sentinel(kind: Kind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            comparators: Vec::new(),
            index: OnceLock::new(),
        }
    }

    fn from_parts(items: Vec<Comparable>, comparators: Vec<Option<Arc<dyn FieldComparator>>>) -> Result<Self> {
        if items.is_empty() {
            return Ok(Self::none());
        }
        let mut seen = std::collections::HashSet::new();
        for item in &items {
            if let Comparable::Name(n) = item {
                if !seen.insert(n.as_str()) {
                    return Err(Error::Fields(format!("duplicate field name: '{n}'")));
                }
            }
        }
        Ok(Self {
            kind: Kind::Defined,
            items,
            comparators,
            index: OnceLock::new(),
        })
    }

    /// Build a defined Fields. Duplicate names are rejected.
    pub fn new<I, C>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Comparable>,
    {
        let items: Vec<Comparable> = items.into_iter().map(Into::into).collect();
        let comparators = vec![None; items.len()];
        Self::from_parts(items, comparators)
    }

    /// A single named field.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Defined,
            items: vec![Comparable::Name(name.into())],
            comparators: vec![None],
            index: OnceLock::new(),
        }
    }

    /// Positional fields; duplicate positions are allowed.
    pub fn positions<I: IntoIterator<Item = i32>>(positions: I) -> Self {
        let items: Vec<Comparable> = positions.into_iter().map(Comparable::Pos).collect();
        if items.is_empty() {
            return Self::none();
        }
        let comparators = vec![None; items.len()];
        Self {
            kind: Kind::Defined,
            items,
            comparators,
            index: OnceLock::new(),
        }
    }

    /// Ordered positional fields `0..size`.
    pub fn size_of(size: usize) -> Self {
        Self::positions(0..size as i32)
    }

    pub fn all() -> Self {
        Self::sentinel(Kind::All)
    }
    pub fn unknown() -> Self {
        Self::sentinel(Kind::Unknown)
    }
    pub fn args() -> Self {
        Self::sentinel(Kind::Args)
    }
    pub fn group() -> Self {
        Self::sentinel(Kind::Group)
    }
    pub fn values() -> Self {
        Self::sentinel(Kind::Values)
    }
    pub fn results() -> Self {
        Self::sentinel(Kind::Results)
    }
    pub fn replace() -> Self {
        Self::sentinel(Kind::Replace)
    }
    pub fn swap() -> Self {
        Self::sentinel(Kind::Swap)
    }
    pub fn none() -> Self {
        Self::sentinel(Kind::None)
    }
    /// The first position.
    pub fn first() -> Self {
        Self::positions([0])
    }
    /// The last position.
    pub fn last() -> Self {
        Self::positions([-1])
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
    pub fn is_defined(&self) -> bool {
        self.kind == Kind::Defined
    }
    pub fn is_all(&self) -> bool {
        self.kind == Kind::All
    }
    pub fn is_unknown(&self) -> bool {
        self.kind == Kind::Unknown
    }
    pub fn is_args(&self) -> bool {
        self.kind == Kind::Args
    }
    pub fn is_results(&self) -> bool {
        self.kind == Kind::Results
    }
    pub fn is_replace(&self) -> bool {
        self.kind == Kind::Replace
    }
    pub fn is_swap(&self) -> bool {
        self.kind == Kind::Swap
    }
    pub fn is_none(&self) -> bool {
        self.kind == Kind::None
    }

    /// Sentinels that stand for a set computed from other fields.
    pub fn is_substitution(&self) -> bool {
        matches!(
            self.kind,
            Kind::All | Kind::Unknown | Kind::Args | Kind::Group | Kind::Values | Kind::Results | Kind::Replace | Kind::Swap
        )
    }

    /// True when the column arity is statically known.
    pub fn is_sized(&self) -> bool {
        matches!(self.kind, Kind::Defined | Kind::None)
    }

    /// Every positional entry equals its own index.
    pub fn is_ordered(&self) -> bool {
        if !self.is_defined() {
            return self.is_none();
        }
        self.items.iter().enumerate().all(|(i, item)| match item {
            Comparable::Pos(p) => *p >= 0 && *p as usize == i,
            Comparable::Name(_) => true,
        })
    }

    /// True when no entry is a position.
    pub fn is_named(&self) -> bool {
        self.items.iter().all(|c| matches!(c, Comparable::Name(_)))
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Comparable] {
        &self.items
    }

    pub fn get(&self, i: usize) -> Option<&Comparable> {
        self.items.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Comparable> {
        self.items.iter()
    }

    pub fn comparator(&self, i: usize) -> Option<&Arc<dyn FieldComparator>> {
        self.comparators.get(i).and_then(|c| c.as_ref())
    }

    pub fn has_comparators(&self) -> bool {
        self.comparators.iter().any(Option::is_some)
    }

    /// Attach a comparator to the entry equal to `field`.
    pub fn with_comparator(mut self, field: impl Into<Comparable>, comparator: Arc<dyn FieldComparator>) -> Result<Self> {
        let field = field.into();
        let idx = self
            .items
            .iter()
            .position(|c| *c == field)
            .ok_or_else(|| Error::Fields(format!("cannot attach comparator, field {field} not found in [{self}]")))?;
        self.comparators[idx] = Some(comparator);
        Ok(self)
    }

    fn name_index(&self) -> &HashMap<String, usize> {
        self.index.get_or_init(|| {
            self.items
                .iter()
                .enumerate()
                .filter_map(|(i, c)| match c {
                    Comparable::Name(n) => Some((n.clone(), i)),
                    Comparable::Pos(_) => None,
                })
                .collect()
        })
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.name_index().contains_key(name)
    }

    /// Resolve a single reference to an absolute position within these fields.
    pub fn pos_of(&self, c: &Comparable) -> Result<usize> {
        match c {
            Comparable::Pos(p) if *p >= 0 => {
                let p = *p as usize;
                if self.is_unknown() || p < self.size() {
                    Ok(p)
                } else {
                    Err(self.missing(&[c.clone()]))
                }
            }
            Comparable::Pos(p) => {
                let rel = self.size() as i64 + *p as i64;
                if self.is_unknown() || rel < 0 {
                    Err(Error::Fields(format!(
                        "relative position {p} cannot be resolved against [{self}]"
                    )))
                } else {
                    Ok(rel as usize)
                }
            }
            Comparable::Name(n) => self
                .name_index()
                .get(n)
                .copied()
                .ok_or_else(|| self.missing(&[c.clone()])),
        }
    }

    fn missing(&self, missing: &[Comparable]) -> Error {
        Error::FieldsResolver {
            selector: join(missing),
            declared: self.to_string(),
            missing: join(missing),
        }
    }

    /// Translate a selector into absolute positions within these fields.
    pub fn positions_of(&self, selector: &Fields) -> Result<Vec<usize>> {
        match selector.kind {
            Kind::All => {
                if self.is_unknown() {
                    return Err(Error::Fields("cannot expand ALL against UNKNOWN fields".into()));
                }
                Ok((0..self.size()).collect())
            }
            Kind::None => Ok(Vec::new()),
            Kind::Defined => {
                let mut out = Vec::with_capacity(selector.size());
                let mut missing = Vec::new();
                for c in &selector.items {
                    match self.pos_of(c) {
                        Ok(p) => out.push(p),
                        Err(Error::FieldsResolver { .. }) => missing.push(c.clone()),
                        Err(e) => return Err(e),
                    }
                }
                if !missing.is_empty() {
                    return Err(Error::FieldsResolver {
                        selector: selector.to_string(),
                        declared: self.to_string(),
                        missing: join(&missing),
                    });
                }
                Ok(out)
            }
            other => Err(Error::Fields(format!(
                "selector {other:?} must be substituted before it can be resolved"
            ))),
        }
    }

    /// Select a subset, keeping this declaration's names where they exist.
    pub fn select(&self, selector: &Fields) -> Result<Fields> {
        if selector.is_all() {
            return Ok(self.clone());
        }
        if selector.is_none() {
            return Ok(Fields::none());
        }
        if self.is_unknown() {
            return Ok(selector.clone());
        }
        let positions = self.positions_of(selector)?;
        let mut items = Vec::with_capacity(positions.len());
        let mut comparators = Vec::with_capacity(positions.len());
        for (i, &p) in positions.iter().enumerate() {
            items.push(self.items[p].clone());
            let cmp = selector
                .comparator(i)
                .or_else(|| self.comparator(p))
                .cloned();
            comparators.push(cmp);
        }
        Self::from_parts(items, comparators)
    }

    /// Concatenate; positions in `other` are shifted past this declaration.
    pub fn append(&self, other: &Fields) -> Result<Fields> {
        if self.is_unknown() || other.is_unknown() {
            return Ok(Fields::unknown());
        }
        if self.is_none() {
            return Ok(other.clone());
        }
        if other.is_none() {
            return Ok(self.clone());
        }
        if !self.is_defined() || !other.is_defined() {
            return Err(Error::Fields(format!(
                "cannot append [{self}] and [{other}]"
            )));
        }
        let offset = self.size() as i32;
        let mut items = self.items.clone();
        let mut comparators = self.comparators.clone();
        for (i, c) in other.items.iter().enumerate() {
            items.push(match c {
                Comparable::Pos(p) if *p >= 0 => Comparable::Pos(p + offset),
                other => other.clone(),
            });
            comparators.push(other.comparators.get(i).cloned().flatten());
        }
        Self::from_parts(items, comparators)
    }

    /// Remove the entries selected by `other`.
    pub fn subtract(&self, other: &Fields) -> Result<Fields> {
        if other.is_all() {
            return Ok(Fields::none());
        }
        if other.is_none() {
            return Ok(self.clone());
        }
        if !self.is_defined() {
            return Err(Error::Fields(format!("cannot subtract from {self}")));
        }
        let removed = self.positions_of(other)?;
        let mut items = Vec::new();
        let mut comparators = Vec::new();
        for (i, c) in self.items.iter().enumerate() {
            if !removed.contains(&i) {
                items.push(c.clone());
                comparators.push(self.comparators[i].clone());
            }
        }
        Self::from_parts(items, comparators)
    }

    /// Replace the entries selected by `from` with the entries of `to`.
    pub fn rename(&self, from: &Fields, to: &Fields) -> Result<Fields> {
        if !self.is_defined() {
            return Err(Error::Fields(format!("cannot rename fields of {self}")));
        }
        let positions = self.positions_of(from)?;
        if positions.len() != to.size() {
            return Err(Error::Fields(format!(
                "rename requires equal sizes, from: [{from}], to: [{to}]"
            )));
        }
        let mut items = self.items.clone();
        for (i, &p) in positions.iter().enumerate() {
            items[p] = to.items[i].clone();
        }
        Self::from_parts(items, self.comparators.clone())
    }

    /// Replace absolute positions in `other` with the names they point at here.
    pub fn project(&self, other: &Fields) -> Result<Fields> {
        if other.is_all() {
            return Ok(self.clone());
        }
        if !other.is_defined() || self.is_unknown() {
            return Ok(other.clone());
        }
        let mut items = Vec::with_capacity(other.size());
        let mut comparators = Vec::with_capacity(other.size());
        for (i, c) in other.items.iter().enumerate() {
            let projected = match c {
                Comparable::Pos(_) => {
                    let p = self.pos_of(c)?;
                    comparators.push(other.comparator(i).or_else(|| self.comparator(p)).cloned());
                    self.items[p].clone()
                }
                Comparable::Name(_) => {
                    comparators.push(other.comparators.get(i).cloned().flatten());
                    c.clone()
                }
            };
            items.push(projected);
        }
        Self::from_parts(items, comparators)
    }

    /// Merge `declared` into one declaration and select `selector` from it.
    ///
    /// If any declaration has unknown arity the selector is returned unchanged
    /// and resolution is deferred to the record itself.
    pub fn resolve(selector: &Fields, declared: &[&Fields]) -> Result<Fields> {
        if declared.iter().any(|f| f.is_unknown()) {
            return Ok(if selector.is_all() { Fields::unknown() } else { selector.clone() });
        }
        let mut merged = Fields::none();
        for f in declared {
            merged = merged.append(f)?;
        }
        if selector.is_defined() {
            let missing: Vec<Comparable> = selector
                .items
                .iter()
                .filter(|c| merged.pos_of(c).is_err())
                .cloned()
                .collect();
            if !missing.is_empty() {
                let declared_desc = declared
                    .iter()
                    .map(|f| format!("[{f}]"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::FieldsResolver {
                    selector: selector.to_string(),
                    declared: declared_desc,
                    missing: join(&missing),
                });
            }
        }
        merged.select(selector)
    }

    /// True when every entry of `selector` resolves here.
    pub fn contains(&self, selector: &Fields) -> bool {
        selector.is_defined() && selector.items.iter().all(|c| self.pos_of(c).is_ok())
    }
}

/// Fields an operation sees as its arguments.
pub fn resolve_arguments(incoming: &Fields, selector: &Fields) -> Result<Fields> {
    match selector.kind() {
        Kind::All => Ok(incoming.clone()),
        Kind::None => Ok(Fields::none()),
        Kind::Defined if incoming.is_unknown() => Ok(selector.clone()),
        Kind::Defined => incoming.select(selector),
        other => Err(Error::Fields(format!(
            "{other:?} is not a valid argument selector"
        ))),
    }
}

/// Fields an operation emits; `ARGS` stands for its argument fields.
pub fn resolve_declared(declared: &Fields, arguments: &Fields) -> Result<Fields> {
    match declared.kind() {
        Kind::Args => Ok(arguments.clone()),
        Kind::Defined | Kind::Unknown | Kind::None => Ok(declared.clone()),
        Kind::All => Ok(Fields::unknown()),
        other => Err(Error::Fields(format!(
            "{other:?} is not a valid declaration"
        ))),
    }
}

/// Fields leaving an operation once `output_selector` combines the incoming
/// record with the operation's results.
pub fn resolve_outgoing(
    incoming: &Fields,
    arguments: &Fields,
    declared: &Fields,
    output_selector: &Fields,
) -> Result<Fields> {
    match output_selector.kind() {
        Kind::Results => Ok(declared.clone()),
        Kind::All => incoming.append(declared),
        Kind::Replace => {
            if incoming.is_unknown() {
                return Ok(Fields::unknown());
            }
            if declared.is_unknown() || declared.size() != arguments.size() {
                return Err(Error::Fields(format!(
                    "REPLACE requires declared fields [{declared}] to match arguments [{arguments}]"
                )));
            }
            incoming.rename(arguments, declared)
        }
        Kind::Swap => {
            if incoming.is_unknown() {
                return Err(Error::Fields(
                    "SWAP requires known incoming fields".into(),
                ));
            }
            incoming.subtract(arguments)?.append(declared)
        }
        Kind::Defined => Fields::resolve(output_selector, &[incoming, declared]),
        Kind::None => Ok(Fields::none()),
        other => Err(Error::Fields(format!(
            "{other:?} is not a valid output selector"
        ))),
    }
}

fn join(items: &[Comparable]) -> String {
    items
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(Fields::new(["a", "b", "a"]).is_err());
        assert!(Fields::positions([0, 0]).is_defined());
    }

    #[test]
    fn ordered_detection() {
        assert!(Fields::size_of(3).is_ordered());
        assert!(f(&["a", "b"]).is_ordered());
        assert!(!Fields::positions([1, 0]).is_ordered());
        assert!(Fields::new([Comparable::from("a"), Comparable::Pos(1)]).unwrap().is_ordered());
    }

    #[test]
    fn select_preserves_names_for_positions() {
        let declared = f(&["a", "b", "c"]);
        let selected = declared.select(&Fields::positions([2, 0])).unwrap();
        assert_eq!(selected, f(&["c", "a"]));
        let last = declared.select(&Fields::last()).unwrap();
        assert_eq!(last, f(&["c"]));
    }

    #[test]
    fn resolution_error_lists_missing_names() {
        let err = f(&["a", "b"]).select(&f(&["b", "x", "y"])).unwrap_err();
        match err {
            Error::FieldsResolver { missing, .. } => assert_eq!(missing, "'x', 'y'"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn append_shifts_positions_and_rejects_duplicates() {
        let out = f(&["a"]).append(&Fields::positions([0, 1])).unwrap();
        assert_eq!(out.items(), &[Comparable::from("a"), Comparable::Pos(1), Comparable::Pos(2)]);
        assert!(f(&["a"]).append(&f(&["a"])).is_err());
        assert!(f(&["a"]).append(&Fields::unknown()).unwrap().is_unknown());
    }

    #[test]
    fn subtract_rename_project() {
        let abc = f(&["a", "b", "c"]);
        assert_eq!(abc.subtract(&f(&["b"])).unwrap(), f(&["a", "c"]));
        assert!(abc.subtract(&Fields::all()).unwrap().is_none());
        assert_eq!(abc.rename(&f(&["c", "a"]), &f(&["z", "x"])).unwrap(), f(&["x", "b", "z"]));
        assert!(abc.rename(&f(&["a"]), &f(&["x", "y"])).is_err());
        let projected = abc.project(&Fields::positions([1])).unwrap();
        assert_eq!(projected, f(&["b"]));
    }

    #[test]
    fn resolve_over_multiple_declarations() {
        let left = f(&["a", "b"]);
        let right = f(&["c"]);
        let out = Fields::resolve(&f(&["c", "a"]), &[&left, &right]).unwrap();
        assert_eq!(out, f(&["c", "a"]));
        assert!(Fields::resolve(&f(&["q"]), &[&left, &right]).is_err());
        let deferred = Fields::resolve(&f(&["q"]), &[&left, &Fields::unknown()]).unwrap();
        assert_eq!(deferred, f(&["q"]));
    }

    #[test]
    fn display() {
        let mixed = Fields::new([Comparable::from("a"), Comparable::Pos(2)]).unwrap();
        assert_eq!(mixed.to_string(), "'a', 2");
        assert_eq!(Fields::all().to_string(), "ALL");
    }

    #[test]
    fn outgoing_resolution_modes() {
        let incoming = f(&["id", "line"]);
        let args = resolve_arguments(&incoming, &f(&["line"])).unwrap();
        let declared = resolve_declared(&f(&["word"]), &args).unwrap();

        let all = resolve_outgoing(&incoming, &args, &declared, &Fields::all()).unwrap();
        assert_eq!(all, f(&["id", "line", "word"]));
        let results = resolve_outgoing(&incoming, &args, &declared, &Fields::results()).unwrap();
        assert_eq!(results, f(&["word"]));
        let replace = resolve_outgoing(&incoming, &args, &declared, &Fields::replace()).unwrap();
        assert_eq!(replace, f(&["id", "word"]));
        let swap = resolve_outgoing(&incoming, &args, &declared, &Fields::swap()).unwrap();
        assert_eq!(swap, f(&["id", "word"]));
        let picked = resolve_outgoing(&incoming, &args, &declared, &f(&["word", "id"])).unwrap();
        assert_eq!(picked, f(&["word", "id"]));

        assert_eq!(resolve_declared(&Fields::args(), &args).unwrap(), args);
        assert!(resolve_arguments(&incoming, &f(&["nope"])).is_err());
    }
}
