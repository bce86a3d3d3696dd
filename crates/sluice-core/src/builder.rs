//! Tuple builders: strategies chosen once per stage that turn an incoming
//! record and an operation's output into the outgoing record.
//!
//! Only [`OutgoingBuilder::Dynamic`] resolves fields per record; every other
//! strategy replays position arrays computed up front.

use crate::error::{Error, Result};
use crate::fields::{Comparable, Fields, Kind};
use crate::tuple::{Row, Tuple};
use crate::view::{Layout, RowCow};

fn literal_positions(selector: &Fields) -> Result<Vec<usize>> {
    selector
        .iter()
        .map(|c| match c {
            Comparable::Pos(p) if *p >= 0 => Ok(*p as usize),
            other => Err(Error::Fields(format!(
                "{other} cannot be resolved against fields of unknown arity"
            ))),
        })
        .collect()
}

/// Builds the outgoing record of a function, aggregator or buffer.
#[derive(Debug, Clone)]
pub enum OutgoingBuilder {
    /// The operation's output verbatim.
    Results,
    /// Input followed by output.
    Composite(Layout),
    /// Input with argument positions overwritten by output.
    Override(Layout),
    /// Input of unknown arity copied, then argument positions overwritten.
    CopyReplace { positions: Vec<usize> },
    /// Input of unknown arity copied, output appended.
    CopyAppend,
    /// Every input column was an argument: output verbatim.
    SwapResults,
    /// Non-argument input columns copied, output of unknown arity appended.
    SwapCopy { remainder: Vec<usize> },
    /// Non-argument input columns followed by output.
    SwapView(Layout),
    /// Explicit selection over input followed by output.
    Narrow(Layout),
    /// Resolved per record against the actual arities.
    Dynamic {
        incoming: Fields,
        declared: Fields,
        selector: Fields,
    },
}

impl OutgoingBuilder {
    /// `arguments` and `declared` must already be resolved (see
    /// [`crate::fields::resolve_arguments`] and [`crate::fields::resolve_declared`]).
    pub fn new(incoming: &Fields, arguments: &Fields, declared: &Fields, selector: &Fields) -> Result<Self> {
        let known = incoming.is_sized() && declared.is_sized();
        match selector.kind() {
            Kind::Results => Ok(Self::Results),
            Kind::All if known => Ok(Self::Composite(Layout::composite(incoming.size(), declared.size()))),
            Kind::All => Ok(Self::CopyAppend),
            Kind::Replace if incoming.is_sized() => {
                let positions = incoming.positions_of(arguments)?;
                Ok(Self::Override(Layout::overlay(incoming.size(), &positions)))
            }
            Kind::Replace => Ok(Self::CopyReplace {
                positions: literal_positions(arguments)?,
            }),
            Kind::Swap => {
                if !incoming.is_sized() {
                    return Err(Error::Fields("SWAP requires known incoming fields".into()));
                }
                let removed = incoming.positions_of(arguments)?;
                let remainder: Vec<usize> = (0..incoming.size()).filter(|p| !removed.contains(p)).collect();
                if remainder.is_empty() {
                    Ok(Self::SwapResults)
                } else if !declared.is_sized() {
                    Ok(Self::SwapCopy { remainder })
                } else {
                    let mut slots = Layout::narrow(&remainder).slots().to_vec();
                    slots.extend(Layout::composite(0, declared.size()).slots());
                    Ok(Self::SwapView(Layout::from_slots(slots)))
                }
            }
            Kind::Defined if known => {
                let merged = incoming.append(declared)?;
                let positions = merged.positions_of(selector)?;
                let layout = Layout::composite(incoming.size(), declared.size()).then_narrow(&positions)?;
                Ok(Self::Narrow(layout))
            }
            Kind::Defined => Ok(Self::Dynamic {
                incoming: incoming.clone(),
                declared: declared.clone(),
                selector: selector.clone(),
            }),
            Kind::None => Ok(Self::Narrow(Layout::default())),
            other => Err(Error::Fields(format!("{other:?} is not a valid output selector"))),
        }
    }

    /// Assemble the outgoing record. The result borrows `input` and `output`
    /// for its own lifetime only.
    pub fn make_result<'a>(&'a self, input: &'a dyn Row, output: &'a dyn Row) -> Result<RowCow<'a>> {
        match self {
            Self::Results | Self::SwapResults => Ok(RowCow::Borrowed(output)),
            Self::Composite(layout) | Self::Override(layout) | Self::SwapView(layout) | Self::Narrow(layout) => {
                Ok(RowCow::View(layout.view(input, output)))
            }
            Self::CopyAppend => {
                let mut t = input.to_tuple();
                t.add_all(output)?;
                Ok(RowCow::Owned(t))
            }
            Self::CopyReplace { positions } => {
                let mut t = input.to_tuple();
                t.put(positions, output)?;
                Ok(RowCow::Owned(t))
            }
            Self::SwapCopy { remainder } => {
                let mut t = Tuple::with_capacity(remainder.len() + output.arity());
                for &p in remainder {
                    t.add(input.value(p).clone())?;
                }
                t.add_all(output)?;
                Ok(RowCow::Owned(t))
            }
            Self::Dynamic {
                incoming,
                declared,
                selector,
            } => {
                let incoming = if incoming.is_unknown() {
                    Fields::size_of(input.arity())
                } else {
                    incoming.clone()
                };
                let declared = if declared.is_unknown() {
                    Fields::size_of(output.arity())
                } else {
                    declared.clone()
                };
                let merged = incoming.append(&declared)?;
                let positions = merged.positions_of(selector)?;
                let width = input.arity();
                let mut t = Tuple::with_capacity(positions.len());
                for p in positions {
                    let v = if p < width {
                        input.value(p)
                    } else {
                        output.value(p - width)
                    };
                    t.add(v.clone())?;
                }
                Ok(RowCow::Owned(t))
            }
        }
    }
}

/// Extracts an operation's arguments from the incoming record.
#[derive(Debug, Clone)]
pub enum ArgumentsBuilder {
    PassThrough,
    Narrow(Layout),
}

impl ArgumentsBuilder {
    pub fn new(incoming: &Fields, selector: &Fields) -> Result<Self> {
        if selector.is_all() {
            return Ok(Self::PassThrough);
        }
        let positions = if incoming.is_unknown() {
            literal_positions(selector)?
        } else {
            incoming.positions_of(selector)?
        };
        let layout = Layout::narrow(&positions);
        if incoming.is_sized() && layout.is_identity(incoming.size()) {
            return Ok(Self::PassThrough);
        }
        Ok(Self::Narrow(layout))
    }

    pub fn make<'a>(&'a self, input: &'a dyn Row) -> RowCow<'a> {
        match self {
            Self::PassThrough => RowCow::Borrowed(input),
            Self::Narrow(layout) => RowCow::View(layout.view_of(input)),
        }
    }
}

/// Extracts grouping keys. Views are used for probing, tuples for storage.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    positions: Vec<usize>,
    layout: Layout,
}

impl KeyBuilder {
    pub fn new(incoming: &Fields, key: &Fields) -> Result<Self> {
        let positions = if incoming.is_unknown() {
            literal_positions(key)?
        } else {
            incoming.positions_of(key)?
        };
        Ok(Self {
            layout: Layout::narrow(&positions),
            positions,
        })
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn view<'a>(&'a self, input: &'a dyn Row) -> RowCow<'a> {
        RowCow::View(self.layout.view_of(input))
    }

    pub fn key(&self, input: &dyn Row) -> Tuple {
        self.layout.view_of(input).to_tuple()
    }
}

/// Copies a record with its key columns nulled; the key is restored on read.
#[derive(Debug, Clone)]
pub struct ValueBuilder {
    key_positions: Vec<usize>,
}

impl ValueBuilder {
    pub fn new(key_positions: &[usize]) -> Self {
        Self {
            key_positions: key_positions.to_vec(),
        }
    }

    pub fn key_positions(&self) -> &[usize] {
        &self.key_positions
    }

    pub fn value(&self, input: &dyn Row) -> Tuple {
        (0..input.arity())
            .map(|i| {
                if self.key_positions.contains(&i) {
                    crate::value::Value::Null
                } else {
                    input.value(i).clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{resolve_arguments, resolve_declared};
    use crate::tuple;
    use crate::value::Value;

    fn f(names: &[&str]) -> Fields {
        Fields::new(names.iter().copied()).unwrap()
    }

    fn build(incoming: &Fields, args: &Fields, declared: &Fields, sel: &Fields) -> OutgoingBuilder {
        let args = resolve_arguments(incoming, args).unwrap();
        let declared = resolve_declared(declared, &args).unwrap();
        OutgoingBuilder::new(incoming, &args, &declared, sel).unwrap()
    }

    #[test]
    fn strategy_selection() {
        let incoming = f(&["a", "b"]);
        let args = f(&["b"]);
        let declared = f(&["c"]);
        assert!(matches!(build(&incoming, &args, &declared, &Fields::results()), OutgoingBuilder::Results));
        assert!(matches!(build(&incoming, &args, &declared, &Fields::all()), OutgoingBuilder::Composite(_)));
        assert!(matches!(build(&incoming, &args, &declared, &Fields::replace()), OutgoingBuilder::Override(_)));
        assert!(matches!(build(&incoming, &args, &declared, &Fields::swap()), OutgoingBuilder::SwapView(_)));
        assert!(matches!(build(&incoming, &args, &declared, &f(&["c", "a"])), OutgoingBuilder::Narrow(_)));
        assert!(matches!(
            build(&incoming, &Fields::all(), &declared, &Fields::swap()),
            OutgoingBuilder::SwapResults
        ));
        assert!(matches!(
            build(&Fields::unknown(), &Fields::positions([0]), &declared, &Fields::all()),
            OutgoingBuilder::CopyAppend
        ));
        assert!(matches!(
            build(&Fields::unknown(), &Fields::positions([0]), &declared, &Fields::replace()),
            OutgoingBuilder::CopyReplace { .. }
        ));
        assert!(matches!(
            build(&incoming, &args, &Fields::unknown(), &Fields::swap()),
            OutgoingBuilder::SwapCopy { .. }
        ));
        assert!(matches!(
            build(&incoming, &args, &Fields::unknown(), &f(&["a"])),
            OutgoingBuilder::Dynamic { .. }
        ));
    }

    #[test]
    fn results_per_strategy() {
        let incoming = f(&["a", "b"]);
        let input = tuple![1i64, "x"];
        let output = tuple!["y"];
        let run = |sel: &Fields| {
            build(&incoming, &f(&["b"]), &f(&["c"]), sel)
                .make_result(&input, &output)
                .unwrap()
                .into_tuple()
        };
        assert_eq!(run(&Fields::all()), tuple![1i64, "x", "y"]);
        assert_eq!(run(&Fields::replace()), tuple![1i64, "y"]);
        assert_eq!(run(&Fields::swap()), tuple![1i64, "y"]);
        assert_eq!(run(&f(&["c", "a"])), tuple!["y", 1i64]);
    }

    #[test]
    fn dynamic_resolves_against_actual_arity() {
        let builder = build(&Fields::unknown(), &Fields::positions([0]), &f(&["c"]), &Fields::positions([-1, 0]));
        let input = tuple![1i64, 2i64, 3i64];
        let output = tuple!["z"];
        let out = builder.make_result(&input, &output).unwrap().into_tuple();
        assert_eq!(out, tuple!["z", 1i64]);
    }

    #[test]
    fn arguments_pass_through_when_identity() {
        let incoming = f(&["a", "b"]);
        assert!(matches!(ArgumentsBuilder::new(&incoming, &f(&["a", "b"])).unwrap(), ArgumentsBuilder::PassThrough));
        let narrow = ArgumentsBuilder::new(&incoming, &f(&["b"])).unwrap();
        let input = tuple![1i64, "x"];
        assert_eq!(narrow.make(&input).to_tuple(), tuple!["x"]);
    }

    #[test]
    fn key_and_value_builders() {
        let incoming = f(&["k", "v"]);
        let key = KeyBuilder::new(&incoming, &f(&["k"])).unwrap();
        let input = tuple![7i64, "v"];
        assert_eq!(key.key(&input), tuple![7i64]);
        let values = ValueBuilder::new(key.positions());
        assert_eq!(values.value(&input), tuple![Value::Null, "v"]);
    }
}
