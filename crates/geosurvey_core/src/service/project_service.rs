//! Project and form-schema use-case service.
//!
//! # Responsibility
//! - Expose project/object type/attribute/option editing to UI callers.
//! - Publish table changes after every successful write.
//!
//! # Invariants
//! - Nothing is published when the repository call fails.
//! - Destructive calls do not ask for confirmation; that is a UI concern.

use crate::live::{ChangeBus, DataTable};
use crate::model::project::{Project, ProjectId};
use crate::model::schema::{
    Attribute, AttributeId, AttributeKind, AttributeOptionId, ObjectType, ObjectTypeId,
    ObjectTypeTree,
};
use crate::model::validation::derive_key;
use crate::repo::schema_repo::SchemaRepository;
use crate::repo::{EntityRef, RepoError, RepoResult};
use std::sync::Arc;

/// Tables a project delete or wipe can touch through cascades.
const CASCADE_FROM_PROJECT: [DataTable; 7] = DataTable::ALL;
const CASCADE_FROM_OBJECT_TYPE: [DataTable; 5] = [
    DataTable::ObjectTypes,
    DataTable::Attributes,
    DataTable::AttributeOptions,
    DataTable::Observations,
    DataTable::ObservationAnswers,
];
const CASCADE_FROM_ATTRIBUTE: [DataTable; 3] = [
    DataTable::Attributes,
    DataTable::AttributeOptions,
    DataTable::ObservationAnswers,
];

/// Project/schema facade over a repository implementation.
pub struct ProjectService<R: SchemaRepository> {
    repo: R,
    bus: Arc<ChangeBus>,
}

impl<R: SchemaRepository> ProjectService<R> {
    pub fn new(repo: R, bus: Arc<ChangeBus>) -> Self {
        Self { repo, bus }
    }

    pub fn create_project(&self, name: &str) -> RepoResult<Project> {
        let id = self.repo.create_project(name)?;
        self.bus.publish(&[DataTable::Projects]);
        self.repo
            .get_project(id)?
            .ok_or(RepoError::NotFound(EntityRef::Project(id)))
    }

    pub fn list_projects(&self) -> RepoResult<Vec<Project>> {
        self.repo.list_projects()
    }

    pub fn rename_project(&self, id: ProjectId, name: &str) -> RepoResult<()> {
        self.repo.rename_project(id, name)?;
        self.bus.publish(&[DataTable::Projects]);
        Ok(())
    }

    /// Deletes the project and everything below it.
    pub fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        self.repo.delete_project(id)?;
        self.bus.publish(&CASCADE_FROM_PROJECT);
        Ok(())
    }

    /// Returns the project used when the UI has none selected.
    pub fn default_project(&self) -> RepoResult<ProjectId> {
        let before = self.repo.list_projects()?.len();
        let id = self.repo.get_or_create_default_project()?;
        if before == 0 {
            self.bus.publish(&[DataTable::Projects]);
        }
        Ok(id)
    }

    pub fn add_object_type(
        &self,
        project_id: ProjectId,
        name: &str,
        color: Option<&str>,
    ) -> RepoResult<ObjectTypeId> {
        let id = self.repo.add_object_type(project_id, name, color)?;
        self.bus.publish(&[DataTable::ObjectTypes]);
        Ok(id)
    }

    /// Renames/recolors one object type, keeping its position.
    pub fn update_object_type(
        &self,
        id: ObjectTypeId,
        name: &str,
        color: Option<&str>,
    ) -> RepoResult<()> {
        let current = self
            .repo
            .get_object_type(id)?
            .ok_or(RepoError::NotFound(EntityRef::ObjectType(id)))?;
        self.repo.update_object_type(&ObjectType {
            name: name.to_string(),
            color: color.map(str::to_string),
            ..current
        })?;
        self.bus.publish(&[DataTable::ObjectTypes]);
        Ok(())
    }

    pub fn delete_object_type(&self, id: ObjectTypeId) -> RepoResult<()> {
        self.repo.delete_object_type(id)?;
        self.bus.publish(&CASCADE_FROM_OBJECT_TYPE);
        Ok(())
    }

    pub fn add_attribute(
        &self,
        object_type_id: ObjectTypeId,
        label: &str,
        kind: AttributeKind,
    ) -> RepoResult<AttributeId> {
        let id = self.repo.add_attribute(object_type_id, label, kind, None)?;
        self.bus.publish(&[DataTable::Attributes]);
        Ok(id)
    }

    /// Replaces label, kind and `required`; the key follows the label.
    pub fn update_attribute(
        &self,
        id: AttributeId,
        label: &str,
        kind: AttributeKind,
        required: bool,
    ) -> RepoResult<Attribute> {
        let current = self
            .repo
            .get_attribute(id)?
            .ok_or(RepoError::NotFound(EntityRef::Attribute(id)))?;
        let drop_options = current.kind.has_options() && !kind.has_options();
        let updated = Attribute {
            label: label.trim().to_string(),
            key: derive_key(label),
            kind,
            required,
            ..current
        };
        self.repo.update_attribute(&updated)?;
        if drop_options {
            for option in self.repo.list_options(id)? {
                self.repo.delete_option(option.id)?;
            }
            self.bus
                .publish(&[DataTable::Attributes, DataTable::AttributeOptions]);
        } else {
            self.bus.publish(&[DataTable::Attributes]);
        }
        Ok(updated)
    }

    pub fn delete_attribute(&self, id: AttributeId) -> RepoResult<()> {
        self.repo.delete_attribute(id)?;
        self.bus.publish(&CASCADE_FROM_ATTRIBUTE);
        Ok(())
    }

    /// Adds one select option; other kinds carry no catalog.
    pub fn add_option(&self, attribute_id: AttributeId, text: &str) -> RepoResult<AttributeOptionId> {
        let id = self.repo.add_option(attribute_id, text)?;
        self.bus.publish(&[DataTable::AttributeOptions]);
        Ok(id)
    }

    pub fn delete_option(&self, id: AttributeOptionId) -> RepoResult<()> {
        self.repo.delete_option(id)?;
        self.bus.publish(&[DataTable::AttributeOptions]);
        Ok(())
    }

    pub fn load_tree(&self, project_id: ProjectId) -> RepoResult<Vec<ObjectTypeTree>> {
        self.repo.load_project_tree(project_id)
    }

    /// Deletes all data of all projects.
    pub fn wipe_all(&self) -> RepoResult<()> {
        self.repo.wipe_all()?;
        self.bus.publish(&CASCADE_FROM_PROJECT);
        Ok(())
    }
}
