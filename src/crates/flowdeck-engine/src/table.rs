//! The opaque columnar table collaborator
//!
//! The engine never interprets table contents; it only needs the small
//! surface the dashboard and the output nodes use: column names, row count,
//! a `head` prefix, and a column-major dump. [`MemTable`] is the in-memory
//! implementation used by the built-in nodes and by tests; production
//! adapters wrap whatever columnar library backs them behind the same
//! trait.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Column-major table handle.
pub trait Table: Send + Sync {
    /// Column names, in column order.
    fn columns(&self) -> Vec<String>;

    /// Number of rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new handle over the first `n` rows.
    fn head(&self, n: usize) -> TableRef;

    /// Column-major dump: column name -> cell values.
    fn to_dict(&self) -> BTreeMap<String, Vec<Value>>;
}

pub type TableRef = Arc<dyn Table>;

/// Slice rows `start..end` out of a table as JSON row objects.
///
/// Pagination works the way the dashboard protocol specifies: take the
/// `head(end)` prefix, dump it column-major, then rebuild the requested
/// rows. Returns the rows together with the column order used.
pub fn page_rows(table: &dyn Table, start: usize, end: usize) -> (Vec<Value>, Vec<String>) {
    let sliced = table.head(end);
    let columns = sliced.columns();
    let data = sliced.to_dict();
    let available = columns
        .first()
        .and_then(|c| data.get(c))
        .map_or(0, |cells| cells.len());

    let mut rows = Vec::new();
    for i in start..end.min(available) {
        let mut row = Map::new();
        for column in &columns {
            let cell = data
                .get(column)
                .and_then(|cells| cells.get(i))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(column.clone(), cell);
        }
        rows.push(Value::Object(row));
    }
    (rows, columns)
}

/// In-memory column-major table.
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    columns: Vec<String>,
    cells: Vec<Vec<Value>>,
    rows: usize,
}

impl MemTable {
    /// Build from parallel column vectors. All columns must be equally long.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> anyhow::Result<Self> {
        let rows = columns.first().map_or(0, |(_, cells)| cells.len());
        for (name, cells) in &columns {
            if cells.len() != rows {
                anyhow::bail!(
                    "column '{name}' has {} cells, expected {rows}",
                    cells.len()
                );
            }
        }
        let (names, cells) = columns.into_iter().unzip();
        Ok(Self {
            columns: names,
            cells,
            rows,
        })
    }

    /// Build from a list of flat records. Column order follows the first
    /// record; missing cells become null.
    pub fn from_records(records: &[Map<String, Value>]) -> anyhow::Result<Self> {
        let Some(first) = records.first() else {
            return Ok(Self::default());
        };
        let names: Vec<String> = first.keys().cloned().collect();
        let mut cells: Vec<Vec<Value>> = vec![Vec::with_capacity(records.len()); names.len()];
        for record in records {
            for (i, name) in names.iter().enumerate() {
                cells[i].push(record.get(name).cloned().unwrap_or(Value::Null));
            }
        }
        Ok(Self {
            columns: names,
            cells,
            rows: records.len(),
        })
    }
}

impl Table for MemTable {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn head(&self, n: usize) -> TableRef {
        let rows = n.min(self.rows);
        let cells = self
            .cells
            .iter()
            .map(|column| column[..rows].to_vec())
            .collect();
        Arc::new(Self {
            columns: self.columns.clone(),
            cells,
            rows,
        })
    }

    fn to_dict(&self) -> BTreeMap<String, Vec<Value>> {
        self.columns
            .iter()
            .cloned()
            .zip(self.cells.iter().cloned())
            .collect()
    }
}
