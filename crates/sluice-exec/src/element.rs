//! Pipe assemblies: the element graph a stream graph is built from.
//!
//! Elements are added in topological order through [`ElementGraph`]; each
//! addition resolves the [`Scope`] of its outgoing edge immediately, so a
//! field mistake is reported at the call that made it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sluice_core::fields::{resolve_arguments, resolve_declared, resolve_outgoing, Fields};
use sluice_core::id::ElementId;
use sluice_io::Tap;
use sluice_operators::{Joiner, OperationKind};

use crate::error::{ExecError, ExecResult};

/// Fields of the values and key chain carried by a grouped edge.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupScope {
    /// The key as the gate declared it.
    pub group: Fields,
    /// The key extended by every aggregator so far.
    pub chain: Fields,
    pub values: Fields,
}

/// Resolution metadata of an element's outgoing edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub branch: String,
    /// Fields of the records on the edge once any grouping is flattened or
    /// closed.
    pub fields: Fields,
    pub grouping: Option<GroupScope>,
}

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub grouping: Fields,
    pub sorting: Option<Fields>,
    /// Emit keys in descending order.
    pub reverse_order: bool,
    pub reverse_sort: bool,
}

impl GroupBy {
    pub fn new(grouping: Fields) -> Self {
        Self {
            grouping,
            sorting: None,
            reverse_order: false,
            reverse_sort: false,
        }
    }

    pub fn sorted_by(mut self, sorting: Fields, reverse: bool) -> Self {
        self.sorting = Some(sorting);
        self.reverse_sort = reverse;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse_order = true;
        self
    }
}

#[derive(Clone)]
pub struct CoGroup {
    /// One selector per input, or a single selector shared by all.
    pub grouping: Vec<Fields>,
    /// Names for the joined record; required when input names collide.
    pub declared: Option<Fields>,
    pub joiner: Arc<dyn Joiner>,
    pub nulls_not_equal: bool,
    pub self_joins: usize,
    pub reverse_order: bool,
}

impl CoGroup {
    pub fn new(grouping: Fields, joiner: Arc<dyn Joiner>) -> Self {
        Self {
            grouping: vec![grouping],
            declared: None,
            joiner,
            nulls_not_equal: false,
            self_joins: 0,
            reverse_order: false,
        }
    }

    pub fn per_branch(grouping: Vec<Fields>, joiner: Arc<dyn Joiner>) -> Self {
        Self {
            grouping,
            ..Self::new(Fields::none(), joiner)
        }
    }

    pub fn declared(mut self, declared: Fields) -> Self {
        self.declared = Some(declared);
        self
    }

    pub fn nulls_not_equal(mut self, on: bool) -> Self {
        self.nulls_not_equal = on;
        self
    }

    pub fn self_joins(mut self, copies: usize) -> Self {
        self.self_joins = copies;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse_order = true;
        self
    }

    /// The grouping selector of input `i`.
    pub fn grouping_of(&self, i: usize) -> Option<&Fields> {
        match self.grouping.as_slice() {
            [shared] => Some(shared),
            per_branch => per_branch.get(i),
        }
    }
}

impl fmt::Debug for CoGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoGroup")
            .field("grouping", &self.grouping)
            .field("declared", &self.declared)
            .field("joiner", &self.joiner.name())
            .field("nulls_not_equal", &self.nulls_not_equal)
            .field("self_joins", &self.self_joins)
            .finish()
    }
}

pub enum ElementKind {
    Source(Arc<dyn Tap>),
    Each {
        operation: OperationKind,
        arguments: Fields,
        output: Fields,
    },
    Every {
        operation: OperationKind,
        arguments: Fields,
        output: Fields,
    },
    GroupBy(GroupBy),
    CoGroup(CoGroup),
    HashJoin(CoGroup),
    Merge,
    Sink(Arc<dyn Tap>),
}

impl ElementKind {
    pub fn is_splice(&self) -> bool {
        matches!(self, ElementKind::GroupBy(_) | ElementKind::CoGroup(_) | ElementKind::HashJoin(_))
    }

    /// Splices and merges complete once however many paths feed them.
    pub fn collapses_paths(&self) -> bool {
        self.is_splice() || matches!(self, ElementKind::Merge)
    }

    pub fn is_every(&self) -> bool {
        matches!(self, ElementKind::Every { .. })
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ElementKind::Every { operation, .. } if operation.is_buffer())
    }

    fn label(&self) -> &'static str {
        match self {
            ElementKind::Source(_) => "source",
            ElementKind::Each { .. } => "each",
            ElementKind::Every { .. } => "every",
            ElementKind::GroupBy(_) => "group_by",
            ElementKind::CoGroup(_) => "co_group",
            ElementKind::HashJoin(_) => "hash_join",
            ElementKind::Merge => "merge",
            ElementKind::Sink(_) => "sink",
        }
    }
}

impl fmt::Debug for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Source(tap) | ElementKind::Sink(tap) => write!(f, "{}({})", self.label(), tap.identifier()),
            ElementKind::Each { operation, .. } | ElementKind::Every { operation, .. } => {
                write!(f, "{}({operation:?})", self.label())
            }
            ElementKind::GroupBy(g) => write!(f, "group_by({:?})", g.grouping),
            ElementKind::CoGroup(c) | ElementKind::HashJoin(c) => write!(f, "{}({c:?})", self.label()),
            ElementKind::Merge => f.write_str("merge"),
        }
    }
}

#[derive(Debug)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    pub inputs: Vec<ElementId>,
    pub scope: Scope,
}

/// Run order of the heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceOrder {
    /// Heads feeding the buffered side of a hash join run first.
    #[default]
    BufferedFirst,
    /// Heads run in the order they were added.
    Declared,
}

/// A pipe assembly under construction.
#[derive(Default)]
pub struct ElementGraph {
    elements: Vec<Element>,
    traps: BTreeMap<String, Arc<dyn Tap>>,
    source_order: SourceOrder,
}

impl fmt::Debug for ElementGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let traps: BTreeMap<&str, &str> = self.traps.iter().map(|(b, t)| (b.as_str(), t.identifier())).collect();
        f.debug_struct("ElementGraph")
            .field("elements", &self.elements)
            .field("traps", &traps)
            .field("source_order", &self.source_order)
            .finish()
    }
}

impl ElementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, id: ElementId) -> ExecResult<&Element> {
        self.elements
            .get(id.index())
            .ok_or_else(|| ExecError::config(format!("no element {id}")))
    }

    pub fn scope(&self, id: ElementId) -> ExecResult<&Scope> {
        Ok(&self.element(id)?.scope)
    }

    pub fn source_order(&self) -> SourceOrder {
        self.source_order
    }

    pub fn set_source_order(&mut self, order: SourceOrder) {
        self.source_order = order;
    }

    pub(crate) fn into_parts(self) -> (Vec<Element>, BTreeMap<String, Arc<dyn Tap>>, SourceOrder) {
        (self.elements, self.traps, self.source_order)
    }

    fn push(&mut self, name: String, kind: ElementKind, inputs: Vec<ElementId>, scope: Scope) -> ElementId {
        let id = ElementId::from(self.elements.len());
        tracing::trace!(element = %name, fields = %scope.fields, "added element");
        self.elements.push(Element {
            name,
            kind,
            inputs,
            scope,
        });
        id
    }

    /// Start branch `name` reading from `tap`.
    pub fn source(&mut self, name: impl Into<String>, tap: Arc<dyn Tap>) -> ElementId {
        let name = name.into();
        let scope = Scope {
            branch: name.clone(),
            fields: tap.source_fields(),
            grouping: None,
        };
        self.push(format!("source({name})"), ElementKind::Source(tap), Vec::new(), scope)
    }

    /// Apply a function, filter or value assertion to every record of `prev`.
    pub fn each(
        &mut self,
        prev: ElementId,
        arguments: Fields,
        operation: OperationKind,
        output: Fields,
    ) -> ExecResult<ElementId> {
        let incoming = self.scope(prev)?;
        if !operation.is_each() {
            return Err(ExecError::config(format!("{operation:?} must be applied with every()")));
        }
        let fields = if operation.is_pass_through() {
            incoming.fields.clone()
        } else {
            let args = resolve_arguments(&incoming.fields, &arguments)?;
            let declared = resolve_declared(&operation.declared(), &args)?;
            resolve_outgoing(&incoming.fields, &args, &declared, &output)?
        };
        let scope = Scope {
            branch: incoming.branch.clone(),
            fields,
            grouping: None,
        };
        let name = format!("each({})@{}", operation.name(), scope.branch);
        let kind = ElementKind::Each {
            operation,
            arguments,
            output,
        };
        Ok(self.push(name, kind, vec![prev], scope))
    }

    /// Apply an aggregator, buffer or group assertion to every group of `prev`.
    pub fn every(
        &mut self,
        prev: ElementId,
        arguments: Fields,
        operation: OperationKind,
        output: Fields,
    ) -> ExecResult<ElementId> {
        let before = self.element(prev)?;
        let incoming = &before.scope;
        let Some(group) = incoming.grouping.as_ref() else {
            return Err(ExecError::config(format!(
                "every({}) must follow a group_by, co_group or another every",
                operation.name()
            )));
        };
        if !operation.is_every() {
            return Err(ExecError::config(format!("{operation:?} must be applied with each()")));
        }
        if operation.is_buffer() && !before.kind.is_splice() {
            return Err(ExecError::config(format!(
                "buffer {} must directly follow its splice",
                operation.name()
            )));
        }

        let (fields, grouping) = if operation.is_pass_through() {
            (group.chain.clone(), Some(group.clone()))
        } else {
            let args = resolve_arguments(&group.values, &arguments)?;
            let declared = resolve_declared(&operation.declared(), &args)?;
            if operation.is_buffer() {
                (resolve_outgoing(&group.values, &args, &declared, &output)?, None)
            } else {
                let chain = resolve_outgoing(&group.chain, &args, &declared, &output)?;
                let grouping = GroupScope {
                    group: group.group.clone(),
                    chain: chain.clone(),
                    values: group.values.clone(),
                };
                (chain, Some(grouping))
            }
        };
        let scope = Scope {
            branch: incoming.branch.clone(),
            fields,
            grouping,
        };
        let name = format!("every({})@{}", operation.name(), scope.branch);
        let kind = ElementKind::Every {
            operation,
            arguments,
            output,
        };
        Ok(self.push(name, kind, vec![prev], scope))
    }

    fn splice_inputs(&self, name: &str, inputs: &[ElementId]) -> ExecResult<Vec<Fields>> {
        if inputs.is_empty() {
            return Err(ExecError::config(format!("{name} has no inputs")));
        }
        for (i, input) in inputs.iter().enumerate() {
            if inputs[..i].contains(input) {
                return Err(ExecError::config(format!(
                    "{name} names {input} twice; use self_joins to join a branch with itself"
                )));
            }
        }
        inputs.iter().map(|&id| Ok(self.scope(id)?.fields.clone())).collect()
    }

    /// Group the records of one or more branches with identical fields.
    pub fn group_by(
        &mut self,
        name: impl Into<String>,
        inputs: &[ElementId],
        options: GroupBy,
    ) -> ExecResult<ElementId> {
        let name = name.into();
        let fields = self.splice_inputs(&name, inputs)?;
        let values = fields[0].clone();
        if let Some(other) = fields.iter().find(|f| **f != values) {
            return Err(ExecError::config(format!(
                "{name}: merged branches differ: [{values}] and [{other}]"
            )));
        }
        let group = key_fields(&values, &options.grouping)?;
        if let Some(sorting) = &options.sorting {
            key_fields(&values, sorting)?;
        }
        let scope = Scope {
            branch: name.clone(),
            fields: values.clone(),
            grouping: Some(GroupScope {
                chain: group.clone(),
                group,
                values,
            }),
        };
        Ok(self.push(name, ElementKind::GroupBy(options), inputs.to_vec(), scope))
    }

    /// Join branches by key, blocking until every branch is complete.
    pub fn co_group(&mut self, name: impl Into<String>, inputs: &[ElementId], options: CoGroup) -> ExecResult<ElementId> {
        let name = name.into();
        let scope = self.joined_scope(&name, inputs, &options)?;
        Ok(self.push(name, ElementKind::CoGroup(options), inputs.to_vec(), scope))
    }

    /// Join branches by key, streaming the first and buffering the rest.
    ///
    /// A hash join emits one grouping per streamed record rather than one
    /// per key, so its output carries no grouping and cannot feed `every()`.
    pub fn hash_join(&mut self, name: impl Into<String>, inputs: &[ElementId], options: CoGroup) -> ExecResult<ElementId> {
        let name = name.into();
        let mut scope = self.joined_scope(&name, inputs, &options)?;
        scope.grouping = None;
        Ok(self.push(name, ElementKind::HashJoin(options), inputs.to_vec(), scope))
    }

    fn joined_scope(&self, name: &str, inputs: &[ElementId], options: &CoGroup) -> ExecResult<Scope> {
        let fields = self.splice_inputs(name, inputs)?;
        if options.self_joins > 0 && inputs.len() != 1 {
            return Err(ExecError::config(format!("{name}: a self-join takes exactly one input")));
        }
        if options.grouping.len() != 1 && options.grouping.len() != inputs.len() {
            return Err(ExecError::config(format!(
                "{name}: {} grouping selectors for {} inputs",
                options.grouping.len(),
                inputs.len()
            )));
        }
        let mut keys = Vec::with_capacity(inputs.len());
        for (i, f) in fields.iter().enumerate() {
            let grouping = options
                .grouping_of(i)
                .ok_or_else(|| ExecError::config(format!("{name}: no grouping for input {i}")))?;
            keys.push(key_fields(f, grouping)?);
        }
        if let Some(k) = keys.iter().find(|k| k.size() != keys[0].size()) {
            return Err(ExecError::config(format!(
                "{name}: grouping sizes differ: [{}] and [{k}]",
                keys[0]
            )));
        }

        let copies = 1 + options.self_joins;
        let mut joined = Fields::none();
        for f in fields.iter().cycle().take(fields.len() * copies) {
            joined = match joined.append(f) {
                Ok(j) => j,
                Err(_) if options.declared.is_some() => Fields::size_of(joined.size() + f.size()),
                Err(e) => {
                    return Err(ExecError::config(format!(
                        "{name}: input fields collide ({e}); declare the joined fields"
                    )))
                }
            };
        }
        let values = match &options.declared {
            Some(declared) if joined.is_sized() && declared.size() != joined.size() => {
                return Err(ExecError::config(format!(
                    "{name}: declared [{declared}] but the joined record has {} fields",
                    joined.size()
                )))
            }
            Some(declared) => declared.clone(),
            None => joined,
        };
        let group = keys.swap_remove(0);
        Ok(Scope {
            branch: name.to_string(),
            fields: values.clone(),
            grouping: Some(GroupScope {
                chain: group.clone(),
                group,
                values,
            }),
        })
    }

    /// Union of branches with identical fields.
    pub fn merge(&mut self, name: impl Into<String>, inputs: &[ElementId]) -> ExecResult<ElementId> {
        let name = name.into();
        let fields = self.splice_inputs(&name, inputs)?;
        if let Some(other) = fields.iter().find(|f| **f != fields[0]) {
            return Err(ExecError::config(format!(
                "{name}: merged branches differ: [{}] and [{other}]",
                fields[0]
            )));
        }
        let scope = Scope {
            branch: name.clone(),
            fields: fields[0].clone(),
            grouping: None,
        };
        Ok(self.push(format!("merge({name})"), ElementKind::Merge, inputs.to_vec(), scope))
    }

    /// Write the records of `prev` to `tap`.
    pub fn sink(&mut self, prev: ElementId, tap: Arc<dyn Tap>) -> ExecResult<ElementId> {
        let scope = self.scope(prev)?.clone();
        let name = format!("sink({})@{}", tap.identifier(), scope.branch);
        Ok(self.push(name, ElementKind::Sink(tap), vec![prev], scope))
    }

    /// Divert failed records of `branch` to `tap`.
    pub fn trap(&mut self, branch: impl Into<String>, tap: Arc<dyn Tap>) {
        self.traps.insert(branch.into(), tap);
    }
}

/// The key as it appears in records with `fields`.
fn key_fields(fields: &Fields, grouping: &Fields) -> ExecResult<Fields> {
    if grouping.is_all() {
        return Ok(fields.clone());
    }
    if fields.is_unknown() {
        return Ok(grouping.clone());
    }
    Ok(fields.select(grouping)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_io::MemoryTap;
    use sluice_operators::aggregate::Count;
    use sluice_operators::function::Insert;
    use sluice_operators::join::InnerJoin;

    fn tap(name: &str, fields: &[&str]) -> Arc<dyn Tap> {
        Arc::new(MemoryTap::new(name, Fields::new(fields.iter().copied()).unwrap()))
    }

    #[test]
    fn every_chain_extends_the_key() {
        let mut graph = ElementGraph::new();
        let src = graph.source("words", tap("words", &["word", "n"]));
        let grouped = graph.group_by("by_word", &[src], GroupBy::new(Fields::name("word"))).unwrap();
        let counted = graph
            .every(grouped, Fields::all(), OperationKind::aggregator(Count::new(Fields::name("count"))), Fields::all())
            .unwrap();
        let scope = graph.scope(counted).unwrap();
        assert_eq!(scope.fields, Fields::new(["word", "count"]).unwrap());
        let group = scope.grouping.as_ref().unwrap();
        assert_eq!(group.group, Fields::name("word"));
        assert_eq!(group.values, Fields::new(["word", "n"]).unwrap());
    }

    #[test]
    fn each_resolves_outgoing_fields() {
        let mut graph = ElementGraph::new();
        let src = graph.source("in", tap("in", &["a"]));
        let op = OperationKind::function(Insert::new(vec!["b".into()], vec![1i64.into()]).unwrap());
        let each = graph.each(src, Fields::all(), op, Fields::all()).unwrap();
        assert_eq!(graph.scope(each).unwrap().fields, Fields::new(["a", "b"]).unwrap());
    }

    #[test]
    fn misplaced_operations_are_rejected() {
        let mut graph = ElementGraph::new();
        let src = graph.source("in", tap("in", &["a"]));
        let count = OperationKind::aggregator(Count::new(Fields::name("count")));
        assert!(matches!(
            graph.every(src, Fields::all(), count, Fields::all()),
            Err(ExecError::Config(_))
        ));
    }

    #[test]
    fn colliding_join_fields_need_a_declaration() {
        let mut graph = ElementGraph::new();
        let lhs = graph.source("lhs", tap("lhs", &["id", "v"]));
        let rhs = graph.source("rhs", tap("rhs", &["id", "v"]));
        let join = CoGroup::new(Fields::name("id"), Arc::new(InnerJoin));
        assert!(graph.co_group("j", &[lhs, rhs], join.clone()).is_err());

        let declared = Fields::new(["id", "lv", "rid", "rv"]).unwrap();
        let id = graph.co_group("j", &[lhs, rhs], join.declared(declared.clone())).unwrap();
        assert_eq!(graph.scope(id).unwrap().fields, declared);
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let mut graph = ElementGraph::new();
        let src = graph.source("in", tap("in", &["a"]));
        assert!(graph.merge("m", &[src, src]).is_err());
    }
}
