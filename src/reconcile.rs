//! Schema reconciliation between declared columns and the remote table.
//!
//! A [`ReconcilePlan`] is the minimal set of changes that makes the remote
//! column names equal the declared names: rename the remote primary column if
//! the declared primary has a different name, remove undeclared columns, then
//! add missing ones. Each change is sent as its own request, so a failure part
//! way through leaves the remote schema between its old and new state; running
//! the reconciler again from a fresh fetch converges.
//!
//! Only names are compared. A declared column whose name already exists is left
//! as is even if its remote type differs.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    columns::{ColumnSet, ColumnSpec},
    error::Result,
    store::{ColumnDefinition, RemoteSchema, SchemaChange, TableStore},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub primary_rename: Option<(String, String)>,
    pub removals: Vec<String>,
    pub additions: Vec<ColumnDefinition>,
}

impl ReconcilePlan {
    pub fn compute(declared: &ColumnSet, remote: &RemoteSchema) -> Self {
        let declared_names = declared.names();

        let primary_rename = match (declared.primary(), remote.primary.as_deref()) {
            (Some(primary), Some(remote_primary))
                if primary.name != remote_primary && !remote.contains(&primary.name) =>
            {
                Some((remote_primary.to_string(), primary.name.clone()))
            }
            _ => None,
        };

        let mut effective: BTreeSet<&str> = remote.columns.iter().map(String::as_str).collect();
        let mut effective_primary = remote.primary.as_deref();
        if let Some((from, to)) = &primary_rename {
            effective.remove(from.as_str());
            effective.insert(to.as_str());
            effective_primary = Some(to.as_str());
        }

        let removals = effective
            .iter()
            .filter(|name| !declared_names.contains(*name))
            .filter(|name| {
                if Some(**name) == effective_primary {
                    warn!("Keeping undeclared primary column '{name}'; it cannot be removed");
                    false
                } else {
                    true
                }
            })
            .map(|name| name.to_string())
            .collect();

        let additions = declared
            .iter()
            .filter(|column| !effective.contains(column.name.as_str()))
            .map(|column| column.definition())
            .collect();

        Self {
            primary_rename,
            removals,
            additions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary_rename.is_none() && self.removals.is_empty() && self.additions.is_empty()
    }

    /// Changes in application order: rename, removals, additions.
    pub fn changes(&self) -> Vec<SchemaChange> {
        let rename = self
            .primary_rename
            .iter()
            .map(|(from, to)| SchemaChange::RenamePrimary {
                from: from.clone(),
                to: to.clone(),
            });
        let removals = self.removals.iter().map(|name| SchemaChange::Remove {
            name: name.clone(),
        });
        let additions = self.additions.iter().cloned().map(SchemaChange::Add);
        rename.chain(removals).chain(additions).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub plan: ReconcilePlan,
    /// Changes actually sent to the store.
    pub applied: Vec<SchemaChange>,
    pub dry_run: bool,
}

impl ReconcileReport {
    pub fn operations(&self) -> usize {
        self.applied.len()
    }
}

pub struct SchemaReconciler<'a, S: TableStore + ?Sized> {
    store: &'a S,
    table_id: &'a str,
    dry_run: bool,
}

impl<'a, S: TableStore + ?Sized> SchemaReconciler<'a, S> {
    pub fn new(store: &'a S, table_id: &'a str) -> Self {
        Self {
            store,
            table_id,
            dry_run: false,
        }
    }

    /// When set, the plan is computed and logged but nothing is sent.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn fetch_remote_columns(&self) -> Result<RemoteSchema> {
        debug!(
            "Retrieving schema of table {} from {}",
            self.table_id,
            self.store.name()
        );
        self.store.retrieve_schema(self.table_id)
    }

    /// Applies the plan for `declared` against an already fetched `remote` schema.
    pub fn reconcile(
        &self,
        declared: &ColumnSet,
        remote: &RemoteSchema,
    ) -> Result<ReconcileReport> {
        let plan = ReconcilePlan::compute(declared, remote);
        let mut report = ReconcileReport {
            plan: plan.clone(),
            applied: Vec::new(),
            dry_run: self.dry_run,
        };
        if plan.is_empty() {
            info!("Schema of table {} already matches", self.table_id);
            return Ok(report);
        }
        for change in plan.changes() {
            self.apply_one(change.clone())?;
            if !self.dry_run {
                report.applied.push(change);
            }
        }
        info!(
            "Reconciled table {}: {} removed, {} added{}",
            self.table_id,
            plan.removals.len(),
            plan.additions.len(),
            if plan.primary_rename.is_some() {
                ", primary renamed"
            } else {
                ""
            }
        );
        Ok(report)
    }

    /// Adds a single declared column.
    pub fn add_column(&self, column: &ColumnSpec) -> Result<()> {
        self.apply_one(SchemaChange::Add(column.definition()))
    }

    /// Removes a single column by name.
    pub fn remove_column(&self, name: &str) -> Result<()> {
        self.apply_one(SchemaChange::Remove {
            name: name.to_string(),
        })
    }

    fn apply_one(&self, change: SchemaChange) -> Result<()> {
        if self.dry_run {
            warn!("Dry run: skipping {change:?}");
            return Ok(());
        }
        debug!("Applying {change:?} to table {}", self.table_id);
        self.store
            .update_schema(self.table_id, std::slice::from_ref(&change))
    }

    /// Fetches the remote schema and reconciles against it.
    pub fn converge(&self, declared: &ColumnSet) -> Result<ReconcileReport> {
        let remote = self.fetch_remote_columns()?;
        self.reconcile(declared, &remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{ColumnSpec, SemanticType, ValueSource};

    fn remote(columns: &[&str], primary: Option<&str>) -> RemoteSchema {
        RemoteSchema {
            columns: columns.iter().map(|name| name.to_string()).collect(),
            primary: primary.map(str::to_string),
        }
    }

    #[test]
    fn plan_removes_undeclared_and_adds_missing() {
        let declared = ColumnSet::book_defaults();
        let plan = ReconcilePlan::compute(
            &declared,
            &remote(&["Book Title", "Rating", "Notes"], Some("Book Title")),
        );
        assert_eq!(plan.primary_rename, None);
        assert_eq!(plan.removals, vec!["Notes".to_string()]);
        assert_eq!(plan.additions.len(), 1);
        assert_eq!(plan.additions[0].name, "Number of Favorites");
        assert_eq!(plan.additions[0].semantic_type, SemanticType::Number);
    }

    #[test]
    fn plan_renames_remote_primary_instead_of_adding_title() {
        let declared = ColumnSet::book_defaults();
        let plan = ReconcilePlan::compute(&declared, &remote(&["Name", "Tags"], Some("Name")));
        assert_eq!(
            plan.primary_rename,
            Some(("Name".to_string(), "Book Title".to_string()))
        );
        assert_eq!(plan.removals, vec!["Tags".to_string()]);
        assert!(
            plan.additions
                .iter()
                .all(|column| column.semantic_type != SemanticType::Title)
        );
        let changes = plan.changes();
        assert!(matches!(changes[0], SchemaChange::RenamePrimary { .. }));
        assert!(matches!(changes[1], SchemaChange::Remove { .. }));
    }

    #[test]
    fn undeclared_primary_is_never_removed() {
        let declared = ColumnSet::new(vec![ColumnSpec::new(
            "Rating",
            SemanticType::Number,
            ValueSource::AverageRating,
        )])
        .expect("columns");
        let plan = ReconcilePlan::compute(&declared, &remote(&["Name"], Some("Name")));
        assert!(plan.removals.is_empty());
        assert_eq!(plan.additions.len(), 1);
    }

    #[test]
    fn matching_schema_plans_nothing() {
        let declared = ColumnSet::book_defaults();
        let plan = ReconcilePlan::compute(
            &declared,
            &remote(
                &["Book Title", "Rating", "Number of Favorites"],
                Some("Book Title"),
            ),
        );
        assert!(plan.is_empty());
        assert!(plan.changes().is_empty());
    }
}
