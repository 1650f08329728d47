// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The in-memory [`MemoryStore`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use super::{Cell, Error, Mutation, Row, RowIter, ScanSpec, Store};

/// A [`Store`] that keeps its tables in ordered maps in memory.
///
/// Tables must be created with [`MemoryStore::create_table`] before
/// they are written to or scanned. Optionally, the number of cells the
/// store will hold can be capped ([`MemoryStore::with_cell_limit`]);
/// batches that would exceed the cap are rejected as a whole.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    cell_limit: Option<usize>,
}

/// A single table: row key → (family, qualifier) → cell.
#[derive(Default)]
struct Table {
    rows: BTreeMap<Vec<u8>, BTreeMap<(String, String), StoredCell>>,
    cells: usize,
}

struct StoredCell {
    visibility: String,
    value: Vec<u8>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore` without any tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `MemoryStore` that rejects batches that would make
    /// any table hold more than `limit` cells.
    pub fn with_cell_limit(limit: usize) -> Self {
        Self {
            cell_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Creates a table. Creating a table that already exists is a
    /// no-op.
    pub fn create_table(&self, name: &str) {
        self.tables
            .write()
            .unwrap()
            .entry(name.to_owned())
            .or_default();
    }

    /// Returns the number of rows in a table, or [`None`] if it does
    /// not exist.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.table(table)
            .ok()
            .map(|t| t.read().unwrap().rows.len())
    }

    fn table(&self, name: &str) -> Result<Arc<RwLock<Table>>, Error> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_owned()))
    }
}

impl Store for MemoryStore {
    fn has_table(&self, table: &str) -> bool {
        self.tables.read().unwrap().contains_key(table)
    }

    fn apply(&self, table: &str, mutations: &[Mutation]) -> Result<(), Error> {
        let table = self.table(table)?;
        let mut table = table.write().unwrap();

        if let Some(limit) = self.cell_limit {
            // Upper bound: updates to existing cells don't add any.
            let added: usize = mutations.iter().map(|m| m.updates().len()).sum();
            if table.cells + added > limit {
                return Err(Error::Rejected(format!(
                    "table would exceed its limit of {} cells",
                    limit
                )));
            }
        }

        for mutation in mutations {
            let row = table.rows.entry(mutation.row().to_vec()).or_default();
            let before = row.len();
            for update in mutation.updates() {
                row.insert(
                    (update.family.clone(), update.qualifier.clone()),
                    StoredCell {
                        visibility: update.visibility.clone(),
                        value: update.value.clone(),
                    },
                );
            }
            let after = row.len();
            table.cells += after - before;
        }
        Ok(())
    }

    fn scan<'a>(&'a self, table: &str, spec: &ScanSpec) -> Result<RowIter<'a>, Error> {
        let table = self.table(table)?;
        Ok(Box::new(MemoryScanner {
            table,
            resume: Bound::Included(spec.prefix.clone()),
            spec: spec.clone(),
            done: false,
        }))
    }
}

/// The scan cursor of a [`MemoryStore`]. The table lock is only held
/// while looking for the next row, so writers are never blocked for the
/// whole duration of a scan.
struct MemoryScanner {
    table: Arc<RwLock<Table>>,
    spec: ScanSpec,
    resume: Bound<Vec<u8>>,
    done: bool,
}

impl Iterator for MemoryScanner {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let table = self.table.read().unwrap();
        let range = (self.resume.clone(), Bound::Unbounded);
        for (key, cells) in table.rows.range::<Vec<u8>, _>(range) {
            if !key.starts_with(&self.spec.prefix) {
                break;
            }
            let cells: Vec<Cell> = cells
                .iter()
                .filter(|(_, cell)| self.spec.is_visible(&cell.visibility))
                .filter(|((family, qualifier), cell)| {
                    self.spec
                        .filters_accept(key, family, qualifier, &cell.value)
                })
                .map(|((family, qualifier), cell)| Cell {
                    family: family.clone(),
                    qualifier: qualifier.clone(),
                    value: cell.value.clone(),
                })
                .collect();
            if !cells.is_empty() {
                self.resume = Bound::Excluded(key.clone());
                return Some(Ok(Row {
                    key: key.clone(),
                    cells,
                }));
            }
        }

        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PUBLIC;

    fn mutation(row: &[u8], qualifier: &str, value: u8) -> Mutation {
        let mut m = Mutation::new(row.to_vec());
        m.put("f", qualifier, PUBLIC, vec![value]);
        m
    }

    fn public_scan(prefix: &[u8]) -> ScanSpec {
        let mut spec = ScanSpec::prefix(prefix.to_vec());
        spec.authorizations.push(PUBLIC.to_owned());
        spec
    }

    fn keys(store: &MemoryStore, spec: &ScanSpec) -> Vec<Vec<u8>> {
        store
            .scan("t", spec)
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect()
    }

    #[test]
    fn unknown_tables_are_reported() {
        let store = MemoryStore::new();
        assert!(!store.has_table("t"));
        assert_eq!(
            store.apply("t", &[]),
            Err(Error::TableNotFound("t".to_owned()))
        );
        assert!(store.scan("t", &ScanSpec::default()).is_err());
    }

    #[test]
    fn scan_returns_prefixed_rows_in_order() {
        let store = MemoryStore::new();
        store.create_table("t");
        store
            .apply(
                "t",
                &[
                    mutation(b"b2", "q", 1),
                    mutation(b"a1", "q", 1),
                    mutation(b"b1", "q", 1),
                    mutation(b"c1", "q", 1),
                ],
            )
            .unwrap();
        assert_eq!(keys(&store, &public_scan(b"b")), [b"b1", b"b2"]);
        assert_eq!(keys(&store, &public_scan(b"")).len(), 4);
    }

    #[test]
    fn cells_of_a_row_are_grouped_and_overwritten() {
        let store = MemoryStore::new();
        store.create_table("t");
        store
            .apply(
                "t",
                &[
                    mutation(b"r", "x", 1),
                    mutation(b"r", "y", 2),
                    mutation(b"r", "x", 3),
                ],
            )
            .unwrap();
        let rows: Vec<Row> = store
            .scan("t", &public_scan(b""))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells.len(), 2);
        assert_eq!(rows[0].cells[0].qualifier, "x");
        assert_eq!(rows[0].cells[0].value, [3u8]);
    }

    #[test]
    fn unauthorized_cells_are_hidden() {
        let store = MemoryStore::new();
        store.create_table("t");
        store.apply("t", &[mutation(b"r", "q", 1)]).unwrap();
        assert!(keys(&store, &ScanSpec::prefix(Vec::new())).is_empty());
        assert_eq!(keys(&store, &public_scan(b"")).len(), 1);
    }

    #[test]
    fn filters_discard_rows() {
        let store = MemoryStore::new();
        store.create_table("t");
        store
            .apply("t", &[mutation(b"abc", "q", 1), mutation(b"xyz", "q", 1)])
            .unwrap();
        let mut spec = public_scan(b"");
        spec.filters.push(b"y".to_vec());
        assert_eq!(keys(&store, &spec), [b"xyz"]);
    }

    #[test]
    fn scan_sees_rows_written_behind_the_cursor() {
        let store = MemoryStore::new();
        store.create_table("t");
        store
            .apply("t", &[mutation(b"a", "q", 1), mutation(b"c", "q", 1)])
            .unwrap();
        let mut scan = store.scan("t", &public_scan(b"")).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().key, b"a");
        store.apply("t", &[mutation(b"b", "q", 1)]).unwrap();
        assert_eq!(scan.next().unwrap().unwrap().key, b"b");
        assert_eq!(scan.next().unwrap().unwrap().key, b"c");
        assert!(scan.next().is_none());
    }

    #[test]
    fn cell_limit_rejects_whole_batches() {
        let store = MemoryStore::with_cell_limit(2);
        store.create_table("t");
        store.apply("t", &[mutation(b"a", "q", 1)]).unwrap();
        assert!(matches!(
            store.apply("t", &[mutation(b"b", "q", 1), mutation(b"c", "q", 1)]),
            Err(Error::Rejected(_))
        ));
        assert_eq!(store.row_count("t"), Some(1));
    }
}
