// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference marker: the set of record ids reachable from a selector.
//!
//! The marked set is what retention counts are built from, so the walk errs on
//! the side of marking too much:
//! - ids of absent or deleted link targets are marked (the walk just does not
//!   descend into them), so a later write to such an id is seen as touching
//!   the retained root;
//! - type refinements are descended into when the record's typename matches,
//!   or conservatively when the typename is unknown;
//! - fragment spreads are always descended into.
//!
//! Termination does not depend on the shape of the data: each
//! `(record id, selection list)` pair is expanded at most once.
use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use crate::ident::DataId;
use crate::record::Record;
use crate::selector::{Selection, Selector, Variables};
use crate::source::ReadSource;

/// Marks every record id reachable from `selector` in `source` into `references`.
pub fn mark<S: ReadSource + ?Sized>(
    source: &S,
    selector: &Selector,
    references: &mut BTreeSet<DataId>,
) {
    let mut marker = ReferenceMarker {
        source,
        variables: selector.variables(),
        references,
        visited: FxHashSet::default(),
    };
    marker.traverse(selector.data_id(), selector.node().selections());
}

/// Convenience wrapper returning a fresh set.
pub fn mark_references<S: ReadSource + ?Sized>(source: &S, selector: &Selector) -> BTreeSet<DataId> {
    let mut references = BTreeSet::new();
    mark(source, selector, &mut references);
    references
}

struct ReferenceMarker<'a, S: ?Sized> {
    source: &'a S,
    variables: &'a Variables,
    references: &'a mut BTreeSet<DataId>,
    /// `(record id, selection list address)` pairs already expanded.
    visited: FxHashSet<(DataId, usize)>,
}

impl<'a, S: ReadSource + ?Sized> ReferenceMarker<'a, S> {
    fn traverse(&mut self, id: &DataId, selections: &'a [Selection]) {
        self.references.insert(id.clone());
        if !self.visited.insert((id.clone(), selections.as_ptr() as usize)) {
            return;
        }
        let source = self.source;
        let Some(record) = source.record(id) else {
            return;
        };
        self.traverse_selections(record, selections);
    }

    fn traverse_selections(&mut self, record: &'a Record, selections: &'a [Selection]) {
        for selection in selections {
            match selection {
                Selection::Scalar(_) => {}
                Selection::Linked(field) => {
                    let key = field.storage_key(self.variables);
                    if field.plural {
                        if let Some(ids) = record.get_links(&key) {
                            for id in ids.iter().flatten() {
                                self.traverse(id, &field.selections);
                            }
                        }
                    } else if let Some(id) = record.get_link(&key) {
                        self.traverse(id, &field.selections);
                    }
                }
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.traverse_selections(record, &condition.selections);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let applies = record
                        .typename()
                        .is_none_or(|ty| ty == fragment.type_condition);
                    if applies {
                        self.traverse_selections(record, &fragment.selections);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    self.traverse_selections(record, &spread.selections);
                }
            }
        }
    }
}
