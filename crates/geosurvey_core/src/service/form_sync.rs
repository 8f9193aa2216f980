//! Form builder persistence: reconcile an edited draft tree with the store.
//!
//! # Responsibility
//! - Turn the in-memory object type → attribute → option tree edited by the
//!   form builder into the minimal set of inserts/updates/deletes.
//! - Write freshly assigned ids back into the drafts.
//!
//! # Invariants
//! - Only rows of the target project are read or written.
//! - A pass over an unchanged tree performs zero writes.
//! - All writes of one pass commit together or not at all; drafts are only
//!   touched after commit.
//! - Passes for the same project never interleave inside one process.

use crate::live::{ChangeBus, DataTable};
use crate::model::project::ProjectId;
use crate::model::schema::{
    Attribute, AttributeId, AttributeKind, AttributeOption, AttributeOptionId, ObjectType,
    ObjectTypeId,
};
use crate::model::validation::{derive_key, normalize_color, normalize_name, ValidationError};
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::{ensure_connection_ready, EntityRef, RepoError};
use log::{error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Draft select option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDraft {
    #[serde(default)]
    pub id: Option<AttributeOptionId>,
    pub text: String,
}

/// Draft attribute; the key is always derived from `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDraft {
    #[serde(default)]
    pub id: Option<AttributeId>,
    pub label: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

/// Draft object type ("card").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDraft {
    #[serde(default)]
    pub id: Option<ObjectTypeId>,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDraft>,
}

/// Whole form of one project as edited in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormTree {
    pub objects: Vec<ObjectDraft>,
}

/// Row counts written by one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    /// Total rows written.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Failure of a sync pass. Nothing was written when this is returned.
#[derive(Debug)]
pub enum SyncError {
    ProjectNotFound(ProjectId),
    /// Two draft attributes of the same object type derive the same key.
    DuplicateKey { object_type: String, key: String },
    Repo(RepoError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProjectNotFound(id) => write!(f, "project {id} not found"),
            Self::DuplicateKey { object_type, key } => {
                write!(f, "object type `{object_type}` has two attributes with key `{key}`")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Project(id)) => Self::ProjectNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(value: ValidationError) -> Self {
        Self::Repo(RepoError::Validation(value))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// One mutex per project id.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding writes to `project_id`.
    pub fn lock_for(&self, project_id: ProjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(project_id).or_default())
    }
}

/// Reconciles draft form trees with persisted schema rows.
pub struct FormSyncService<'conn> {
    conn: &'conn Connection,
    locks: Arc<ProjectLocks>,
    bus: Arc<ChangeBus>,
}

impl<'conn> FormSyncService<'conn> {
    pub fn try_new(
        conn: &'conn Connection,
        locks: Arc<ProjectLocks>,
        bus: Arc<ChangeBus>,
    ) -> Result<Self, SyncError> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn, locks, bus })
    }

    /// Builds the draft tree of a project from persisted rows.
    pub fn load_tree(&self, project_id: ProjectId) -> Result<FormTree, SyncError> {
        let repo = SqliteSchemaRepository::new(self.conn);
        if repo.get_project(project_id)?.is_none() {
            return Err(SyncError::ProjectNotFound(project_id));
        }
        let objects = repo
            .load_project_tree(project_id)?
            .into_iter()
            .map(|tree| ObjectDraft {
                id: Some(tree.object_type.id),
                name: tree.object_type.name,
                color: tree.object_type.color,
                attributes: tree
                    .attributes
                    .into_iter()
                    .map(|item| AttributeDraft {
                        id: Some(item.attribute.id),
                        label: item.attribute.label,
                        kind: item.attribute.kind,
                        required: item.attribute.required,
                        options: item
                            .options
                            .into_iter()
                            .map(|option| OptionDraft {
                                id: Some(option.id),
                                text: option.value_text,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        Ok(FormTree { objects })
    }

    /// Persists `tree` for `project_id` and writes new ids into it.
    pub fn sync(&self, project_id: ProjectId, tree: &mut FormTree) -> Result<SyncReport, SyncError> {
        let started_at = Instant::now();
        let lock = self.locks.lock_for(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut working = tree.clone();
        let result = self.sync_in_transaction(project_id, &mut working);
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(report) => {
                *tree = working;
                info!(
                    "event=form_sync module=sync status=ok project_id={project_id} inserted={} updated={} deleted={} duration_ms={duration_ms}",
                    report.inserted, report.updated, report.deleted
                );
                if report.writes() > 0 {
                    let mut tables = DataTable::SCHEMA.to_vec();
                    if report.deleted > 0 {
                        tables.extend([DataTable::Observations, DataTable::ObservationAnswers]);
                    }
                    self.bus.publish(&tables);
                }
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=form_sync module=sync status=error project_id={project_id} duration_ms={duration_ms} error_code=form_sync_failed"
                );
                Err(err)
            }
        }
    }

    fn sync_in_transaction(
        &self,
        project_id: ProjectId,
        tree: &mut FormTree,
    ) -> Result<SyncReport, SyncError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let repo = SqliteSchemaRepository::new(&tx);
        if repo.get_project(project_id)?.is_none() {
            return Err(SyncError::ProjectNotFound(project_id));
        }

        let mut report = SyncReport::default();
        let mut fields = Vec::with_capacity(tree.objects.len());
        for draft in &tree.objects {
            fields.push((
                normalize_name(&draft.name, "object type name")?,
                normalize_color(draft.color.as_deref())?,
            ));
        }

        let mut unclaimed = repo.list_object_types(project_id)?;
        let matches = claim_rows(
            &mut unclaimed,
            tree.objects.len(),
            |index, row| Some(row.id) == tree.objects[index].id,
            |index, row| row.name == fields[index].0,
        );

        for (position, ((draft, (name, color)), matched)) in tree
            .objects
            .iter_mut()
            .zip(fields)
            .zip(matches)
            .enumerate()
        {
            let order_index = position as i64;
            let object_type_id = match matched {
                Some(row) => {
                    if row.name != name || row.color != color || row.order_index != order_index {
                        repo.update_object_type(&ObjectType {
                            name,
                            color,
                            order_index,
                            ..row
                        })?;
                        report.updated += 1;
                    }
                    row.id
                }
                None => {
                    report.inserted += 1;
                    repo.insert_object_type_at(project_id, &name, color.as_deref(), order_index)?
                }
            };
            draft.id = Some(object_type_id);

            sync_attributes(&repo, object_type_id, draft, &mut report)?;
        }

        for row in unclaimed {
            repo.delete_object_type(row.id)?;
            report.deleted += 1;
        }

        tx.commit()?;
        Ok(report)
    }
}

fn sync_attributes(
    repo: &SqliteSchemaRepository<'_>,
    object_type_id: ObjectTypeId,
    object: &mut ObjectDraft,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let mut keyed: Vec<(String, String)> = Vec::with_capacity(object.attributes.len());
    for draft in &object.attributes {
        let label = normalize_name(&draft.label, "attribute label")?;
        let key = derive_key(&label);
        if key.is_empty() {
            return Err(ValidationError::EmptyKey(label).into());
        }
        if keyed.iter().any(|(_, existing)| *existing == key) {
            return Err(SyncError::DuplicateKey {
                object_type: object.name.trim().to_string(),
                key,
            });
        }
        keyed.push((label, key));
    }

    let mut unclaimed = repo.list_attributes(object_type_id)?;
    let matches = claim_rows(
        &mut unclaimed,
        object.attributes.len(),
        |index, row| Some(row.id) == object.attributes[index].id,
        |index, row| row.key == keyed[index].1,
    );
    let plan: Vec<(Option<Attribute>, String, String)> = matches
        .into_iter()
        .zip(keyed)
        .map(|(matched, (label, key))| (matched, label, key))
        .collect();

    // Free keys held by rows that are going away or being re-keyed, so a
    // rename that swaps keys never trips UNIQUE(object_type_id, key).
    for row in unclaimed {
        repo.delete_attribute(row.id)?;
        report.deleted += 1;
    }
    for (matched, _, key) in &plan {
        if let Some(row) = matched {
            if row.key != *key {
                repo.update_attribute(&Attribute {
                    key: format!("~{}", row.id),
                    ..row.clone()
                })?;
            }
        }
    }

    for (position, (draft, (matched, label, key))) in
        object.attributes.iter_mut().zip(plan).enumerate()
    {
        let order_index = position as i64;
        let attribute_id = match matched {
            Some(row) => {
                let changed = row.label != label
                    || row.key != key
                    || row.kind != draft.kind
                    || row.required != draft.required
                    || row.order_index != order_index;
                if changed {
                    repo.update_attribute(&Attribute {
                        label,
                        key,
                        kind: draft.kind,
                        required: draft.required,
                        order_index,
                        ..row
                    })?;
                    report.updated += 1;
                }
                row.id
            }
            None => {
                report.inserted += 1;
                repo.insert_attribute(&Attribute {
                    id: 0,
                    object_type_id,
                    label,
                    key,
                    kind: draft.kind,
                    required: draft.required,
                    order_index,
                })?
            }
        };
        draft.id = Some(attribute_id);
        sync_options(repo, attribute_id, draft, report)?;
    }
    Ok(())
}

fn sync_options(
    repo: &SqliteSchemaRepository<'_>,
    attribute_id: AttributeId,
    attribute: &mut AttributeDraft,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let mut unclaimed: Vec<AttributeOption> = repo.list_options(attribute_id)?;
    if !attribute.kind.has_options() {
        attribute.options.clear();
    }

    let mut texts = Vec::with_capacity(attribute.options.len());
    for draft in &attribute.options {
        texts.push(normalize_name(&draft.text, "option text")?);
    }

    let matches = claim_rows(
        &mut unclaimed,
        texts.len(),
        |_, _| false,
        |index, row| row.value_text == texts[index],
    );
    for ((draft, text), matched) in attribute.options.iter_mut().zip(texts).zip(matches) {
        let option_id = match matched {
            Some(row) => row.id,
            None => {
                report.inserted += 1;
                repo.add_option(attribute_id, &text)?
            }
        };
        draft.id = Some(option_id);
        draft.text = text;
    }

    for row in unclaimed {
        repo.delete_option(row.id)?;
        report.deleted += 1;
    }
    Ok(())
}

/// Pairs each of `drafts` draft positions with at most one row.
///
/// Every `by_id` match across the whole list is claimed before any draft
/// falls back to `by_name`, so a draft without an id never takes the row a
/// later draft carries the id of.
fn claim_rows<T>(
    rows: &mut Vec<T>,
    drafts: usize,
    by_id: impl Fn(usize, &T) -> bool,
    by_name: impl Fn(usize, &T) -> bool,
) -> Vec<Option<T>> {
    let mut claimed: Vec<Option<T>> = (0..drafts).map(|_| None).collect();
    for (index, slot) in claimed.iter_mut().enumerate() {
        if let Some(position) = rows.iter().position(|row| by_id(index, row)) {
            *slot = Some(rows.remove(position));
        }
    }
    for (index, slot) in claimed.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        if let Some(position) = rows.iter().position(|row| by_name(index, row)) {
            *slot = Some(rows.remove(position));
        }
    }
    claimed
}
