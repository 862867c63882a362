//! Incremental decision engine
//!
//! Decides per record whether it already exists downstream. The decision is
//! a membership test of one identifier against a set of identifiers, never a
//! comparison of whole collections.

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{read_sql_file, EtlError, Result};
use crate::load::TableDescriptor;
use crate::normalize::{Cell, TabularBatch};
use crate::warehouse::QueryStore;

/// Primary-key column of every table the pipeline loads
pub const IDENTIFIER_COLUMN: &str = "id";

/// Snapshot of identifiers already present in a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet {
    ids: HashSet<String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for IdentifierSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// `true` iff `candidate` is not a member of `existing`
pub fn is_new(candidate: &str, existing: &IdentifierSet) -> bool {
    !existing.contains(candidate)
}

/// Loads the identifier set of a table and filters batches against it
pub struct IncrementalCheck {
    query_path: PathBuf,
}

impl IncrementalCheck {
    pub fn new(query_path: impl Into<PathBuf>) -> Self {
        Self {
            query_path: query_path.into(),
        }
    }

    /// Read the query file and fill in `{schema}` / `{table}`
    pub fn render_query(&self, table: &TableDescriptor) -> Result<String> {
        let template = read_sql_file(&self.query_path)?;
        Ok(template
            .replace("{schema}", &table.namespace)
            .replace("{table}", &table.name))
    }

    /// Query the identifiers already loaded into `table`
    ///
    /// Any failure is returned to the caller: without the set the engine
    /// cannot decide novelty, so it never guesses.
    pub async fn existing_identifiers<Q>(&self, store: &Q, table: &TableDescriptor) -> Result<IdentifierSet>
    where
        Q: QueryStore + ?Sized,
    {
        let sql = self.render_query(table)?;
        let result = store.query(&sql).await?;

        let ids = result
            .column_values(IDENTIFIER_COLUMN)?
            .filter_map(Cell::as_identifier)
            .collect::<IdentifierSet>();

        info!(table = %table, existing = ids.len(), "Loaded existing identifiers");
        Ok(ids)
    }

    /// Keep rows whose identifier is new, dropping repeats within the batch
    ///
    /// Returns the filtered batch and the identifiers that were skipped.
    pub fn select_new(batch: TabularBatch, existing: &IdentifierSet) -> Result<(TabularBatch, Vec<String>)> {
        let mut ids = Vec::with_capacity(batch.len());
        for row in 0..batch.len() {
            let id = batch.cell(row, IDENTIFIER_COLUMN).as_identifier().ok_or_else(|| {
                EtlError::Schema(format!("row {} has no usable '{}' value", row, IDENTIFIER_COLUMN))
            })?;
            ids.push(id);
        }

        let mut seen = HashSet::new();
        let mut skipped = Vec::new();
        let keep: Vec<bool> = ids
            .into_iter()
            .map(|id| {
                if is_new(&id, existing) && seen.insert(id.clone()) {
                    true
                } else {
                    debug!(id = %id, "Identifier already loaded");
                    skipped.push(id);
                    false
                }
            })
            .collect();

        let mut flags = keep.into_iter();
        let mut batch = batch;
        batch.retain_rows(|_| flags.next().unwrap_or(false));

        Ok((batch, skipped))
    }
}
