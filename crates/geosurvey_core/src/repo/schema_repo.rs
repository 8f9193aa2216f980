//! Project and form-schema repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - CRUD over `projects`, `object_types`, `attributes` and the select-option
//!   catalog (`attribute_values`).
//! - Assign display order (`order_index`) on append.
//!
//! # Invariants
//! - Write paths normalize names/colors and derive keys before SQL mutations.
//! - Listing order is deterministic: `order_index ASC, id ASC`.
//! - Deletes rely on `ON DELETE CASCADE` for descendants.

use super::{
    bool_to_int, ensure_connection_ready, int_to_bool, EntityRef, RepoError, RepoResult,
};
use crate::model::now_epoch_ms;
use crate::model::project::{Project, ProjectId};
use crate::model::schema::{
    Attribute, AttributeId, AttributeKind, AttributeOption, AttributeOptionId,
    AttributeWithOptions, ObjectType, ObjectTypeId, ObjectTypeTree,
};
use crate::model::validation::{derive_key, normalize_color, normalize_name, ValidationError};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const DEFAULT_PROJECT_NAME: &str = "Default Project";

const OBJECT_TYPE_SELECT_SQL: &str = "SELECT
    id,
    project_id,
    name,
    color,
    order_index
FROM object_types";

const ATTRIBUTE_SELECT_SQL: &str = "SELECT
    id,
    object_type_id,
    label,
    key,
    type,
    required,
    order_index
FROM attributes";

/// Repository interface for project and form-schema operations.
pub trait SchemaRepository {
    fn create_project(&self, name: &str) -> RepoResult<ProjectId>;
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    /// Newest first.
    fn list_projects(&self) -> RepoResult<Vec<Project>>;
    fn rename_project(&self, id: ProjectId, name: &str) -> RepoResult<()>;
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
    /// Returns the oldest project, creating `Default Project` when none exist.
    fn get_or_create_default_project(&self) -> RepoResult<ProjectId>;

    fn add_object_type(
        &self,
        project_id: ProjectId,
        name: &str,
        color: Option<&str>,
    ) -> RepoResult<ObjectTypeId>;
    /// Inserts with an explicit `order_index` (sync/import paths).
    fn insert_object_type_at(
        &self,
        project_id: ProjectId,
        name: &str,
        color: Option<&str>,
        order_index: i64,
    ) -> RepoResult<ObjectTypeId>;
    fn update_object_type(&self, object_type: &ObjectType) -> RepoResult<()>;
    fn get_object_type(&self, id: ObjectTypeId) -> RepoResult<Option<ObjectType>>;
    fn list_object_types(&self, project_id: ProjectId) -> RepoResult<Vec<ObjectType>>;
    fn delete_object_type(&self, id: ObjectTypeId) -> RepoResult<()>;

    fn add_attribute(
        &self,
        object_type_id: ObjectTypeId,
        label: &str,
        kind: AttributeKind,
        key: Option<&str>,
    ) -> RepoResult<AttributeId>;
    /// Inserts a fully specified attribute (sync/import paths); `id` is ignored.
    fn insert_attribute(&self, attribute: &Attribute) -> RepoResult<AttributeId>;
    fn update_attribute(&self, attribute: &Attribute) -> RepoResult<()>;
    fn get_attribute(&self, id: AttributeId) -> RepoResult<Option<Attribute>>;
    fn list_attributes(&self, object_type_id: ObjectTypeId) -> RepoResult<Vec<Attribute>>;
    /// All attributes of all object types of one project.
    fn list_project_attributes(&self, project_id: ProjectId) -> RepoResult<Vec<Attribute>>;
    fn delete_attribute(&self, id: AttributeId) -> RepoResult<()>;

    fn add_option(&self, attribute_id: AttributeId, value_text: &str)
        -> RepoResult<AttributeOptionId>;
    fn list_options(&self, attribute_id: AttributeId) -> RepoResult<Vec<AttributeOption>>;
    /// All select options below one project.
    fn list_project_options(&self, project_id: ProjectId) -> RepoResult<Vec<AttributeOption>>;
    fn delete_option(&self, id: AttributeOptionId) -> RepoResult<()>;

    /// Loads object type → attribute → option tree for one project.
    fn load_project_tree(&self, project_id: ProjectId) -> RepoResult<Vec<ObjectTypeTree>>;

    /// Deletes every row of every table, children first.
    fn wipe_all(&self) -> RepoResult<()>;
}

/// SQLite-backed schema repository.
pub struct SqliteSchemaRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSchemaRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Creates repository without the schema version check.
    ///
    /// Used on transactions opened from a connection already checked.
    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn ensure_project(&self, id: ProjectId) -> RepoResult<()> {
        ensure_row_exists(self.conn, "projects", id, EntityRef::Project(id))
    }

    fn ensure_object_type(&self, id: ObjectTypeId) -> RepoResult<()> {
        ensure_row_exists(self.conn, "object_types", id, EntityRef::ObjectType(id))
    }

    fn ensure_key_free(
        &self,
        object_type_id: ObjectTypeId,
        key: &str,
        except: Option<AttributeId>,
    ) -> RepoResult<()> {
        let taken: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM attributes
                WHERE object_type_id = ?1
                  AND key = ?2
                  AND (?3 IS NULL OR id <> ?3)
            );",
            params![object_type_id, key, except],
            |row| row.get(0),
        )?;
        if taken == 1 {
            return Err(ValidationError::DuplicateKey(key.to_string()).into());
        }
        Ok(())
    }
}

impl SchemaRepository for SqliteSchemaRepository<'_> {
    fn create_project(&self, name: &str) -> RepoResult<ProjectId> {
        let name = normalize_name(name, "project name")?;
        self.conn.execute(
            "INSERT INTO projects (name, created_at) VALUES (?1, ?2);",
            params![name, now_epoch_ms()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM projects WHERE id = ?1;",
                [id],
                parse_project_row,
            )
            .optional()?;
        Ok(project)
    }

    fn list_projects(&self) -> RepoResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at
             FROM projects
             ORDER BY created_at DESC, id DESC;",
        )?;
        let projects = stmt
            .query_map([], parse_project_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    fn rename_project(&self, id: ProjectId, name: &str) -> RepoResult<()> {
        let name = normalize_name(name, "project name")?;
        let changed = self.conn.execute(
            "UPDATE projects SET name = ?2 WHERE id = ?1;",
            params![id, name],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Project(id)));
        }
        Ok(())
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Project(id)));
        }
        Ok(())
    }

    fn get_or_create_default_project(&self) -> RepoResult<ProjectId> {
        let existing: Option<ProjectId> = self
            .conn
            .query_row(
                "SELECT id FROM projects ORDER BY created_at ASC, id ASC LIMIT 1;",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => Ok(id),
            None => self.create_project(DEFAULT_PROJECT_NAME),
        }
    }

    fn add_object_type(
        &self,
        project_id: ProjectId,
        name: &str,
        color: Option<&str>,
    ) -> RepoResult<ObjectTypeId> {
        let order_index: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(order_index), -1) + 1
             FROM object_types
             WHERE project_id = ?1;",
            [project_id],
            |row| row.get(0),
        )?;
        self.insert_object_type_at(project_id, name, color, order_index)
    }

    fn insert_object_type_at(
        &self,
        project_id: ProjectId,
        name: &str,
        color: Option<&str>,
        order_index: i64,
    ) -> RepoResult<ObjectTypeId> {
        let name = normalize_name(name, "object type name")?;
        let color = normalize_color(color)?;
        self.ensure_project(project_id)?;
        self.conn.execute(
            "INSERT INTO object_types (project_id, name, color, order_index)
             VALUES (?1, ?2, ?3, ?4);",
            params![project_id, name, color, order_index],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_object_type(&self, object_type: &ObjectType) -> RepoResult<()> {
        let name = normalize_name(&object_type.name, "object type name")?;
        let color = normalize_color(object_type.color.as_deref())?;
        let changed = self.conn.execute(
            "UPDATE object_types
             SET name = ?2,
                 color = ?3,
                 order_index = ?4
             WHERE id = ?1;",
            params![object_type.id, name, color, object_type.order_index],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::ObjectType(object_type.id)));
        }
        Ok(())
    }

    fn get_object_type(&self, id: ObjectTypeId) -> RepoResult<Option<ObjectType>> {
        let object_type = self
            .conn
            .query_row(
                &format!("{OBJECT_TYPE_SELECT_SQL} WHERE id = ?1;"),
                [id],
                parse_object_type_row,
            )
            .optional()?;
        Ok(object_type)
    }

    fn list_object_types(&self, project_id: ProjectId) -> RepoResult<Vec<ObjectType>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OBJECT_TYPE_SELECT_SQL}
             WHERE project_id = ?1
             ORDER BY order_index ASC, id ASC;"
        ))?;
        let items = stmt
            .query_map([project_id], parse_object_type_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn delete_object_type(&self, id: ObjectTypeId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM object_types WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::ObjectType(id)));
        }
        Ok(())
    }

    fn add_attribute(
        &self,
        object_type_id: ObjectTypeId,
        label: &str,
        kind: AttributeKind,
        key: Option<&str>,
    ) -> RepoResult<AttributeId> {
        let label = normalize_name(label, "attribute label")?;
        let key = match key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => derive_key(&label),
        };
        let order_index: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(order_index), -1) + 1
             FROM attributes
             WHERE object_type_id = ?1;",
            [object_type_id],
            |row| row.get(0),
        )?;
        self.insert_attribute(&Attribute {
            id: 0,
            object_type_id,
            label,
            key,
            kind,
            required: false,
            order_index,
        })
    }

    fn insert_attribute(&self, attribute: &Attribute) -> RepoResult<AttributeId> {
        let label = normalize_name(&attribute.label, "attribute label")?;
        let key = attribute.key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey(label).into());
        }
        self.ensure_object_type(attribute.object_type_id)?;
        self.ensure_key_free(attribute.object_type_id, key, None)?;
        self.conn.execute(
            "INSERT INTO attributes (
                object_type_id,
                label,
                key,
                type,
                required,
                order_index
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                attribute.object_type_id,
                label,
                key,
                attribute.kind.as_str(),
                bool_to_int(attribute.required),
                attribute.order_index,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_attribute(&self, attribute: &Attribute) -> RepoResult<()> {
        let label = normalize_name(&attribute.label, "attribute label")?;
        let key = attribute.key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey(label).into());
        }
        self.ensure_key_free(attribute.object_type_id, key, Some(attribute.id))?;
        let changed = self.conn.execute(
            "UPDATE attributes
             SET label = ?2,
                 key = ?3,
                 type = ?4,
                 required = ?5,
                 order_index = ?6
             WHERE id = ?1;",
            params![
                attribute.id,
                label,
                key,
                attribute.kind.as_str(),
                bool_to_int(attribute.required),
                attribute.order_index,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Attribute(attribute.id)));
        }
        Ok(())
    }

    fn get_attribute(&self, id: AttributeId) -> RepoResult<Option<Attribute>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ATTRIBUTE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_attribute_row(row)?));
        }
        Ok(None)
    }

    fn list_attributes(&self, object_type_id: ObjectTypeId) -> RepoResult<Vec<Attribute>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ATTRIBUTE_SELECT_SQL}
             WHERE object_type_id = ?1
             ORDER BY order_index ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([object_type_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_attribute_row(row)?);
        }
        Ok(items)
    }

    fn list_project_attributes(&self, project_id: ProjectId) -> RepoResult<Vec<Attribute>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                a.id AS id,
                a.object_type_id AS object_type_id,
                a.label AS label,
                a.key AS key,
                a.type AS type,
                a.required AS required,
                a.order_index AS order_index
             FROM attributes a
             INNER JOIN object_types o ON o.id = a.object_type_id
             WHERE o.project_id = ?1
             ORDER BY o.order_index ASC, o.id ASC, a.order_index ASC, a.id ASC;",
        )?;
        let mut rows = stmt.query([project_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_attribute_row(row)?);
        }
        Ok(items)
    }

    fn delete_attribute(&self, id: AttributeId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM attributes WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Attribute(id)));
        }
        Ok(())
    }

    fn add_option(
        &self,
        attribute_id: AttributeId,
        value_text: &str,
    ) -> RepoResult<AttributeOptionId> {
        let value_text = normalize_name(value_text, "option text")?;
        let attribute = self
            .get_attribute(attribute_id)?
            .ok_or(RepoError::NotFound(EntityRef::Attribute(attribute_id)))?;
        if !attribute.kind.has_options() {
            return Err(ValidationError::OptionsNotAllowed(attribute.kind.as_str()).into());
        }
        self.conn.execute(
            "INSERT INTO attribute_values (attribute_id, value_text) VALUES (?1, ?2);",
            params![attribute_id, value_text],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_options(&self, attribute_id: AttributeId) -> RepoResult<Vec<AttributeOption>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, attribute_id, value_text
             FROM attribute_values
             WHERE attribute_id = ?1
             ORDER BY id ASC;",
        )?;
        let items = stmt
            .query_map([attribute_id], parse_option_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn list_project_options(&self, project_id: ProjectId) -> RepoResult<Vec<AttributeOption>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.id AS id, v.attribute_id AS attribute_id, v.value_text AS value_text
             FROM attribute_values v
             INNER JOIN attributes a ON a.id = v.attribute_id
             INNER JOIN object_types o ON o.id = a.object_type_id
             WHERE o.project_id = ?1
             ORDER BY o.order_index ASC, o.id ASC, a.order_index ASC, a.id ASC, v.id ASC;",
        )?;
        let items = stmt
            .query_map([project_id], parse_option_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn delete_option(&self, id: AttributeOptionId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM attribute_values WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::AttributeOption(id)));
        }
        Ok(())
    }

    fn load_project_tree(&self, project_id: ProjectId) -> RepoResult<Vec<ObjectTypeTree>> {
        let mut tree = Vec::new();
        for object_type in self.list_object_types(project_id)? {
            let mut attributes = Vec::new();
            for attribute in self.list_attributes(object_type.id)? {
                let options = self.list_options(attribute.id)?;
                attributes.push(AttributeWithOptions { attribute, options });
            }
            tree.push(ObjectTypeTree {
                object_type,
                attributes,
            });
        }
        Ok(tree)
    }

    fn wipe_all(&self) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM attribute_coordinate_values;
             DELETE FROM observations;
             DELETE FROM survey_sessions;
             DELETE FROM attribute_values;
             DELETE FROM attributes;
             DELETE FROM object_types;
             DELETE FROM projects;",
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn ensure_row_exists(
    conn: &Connection,
    table: &'static str,
    id: i64,
    entity: EntityRef,
) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
        [id],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(RepoError::NotFound(entity))
    }
}

fn parse_project_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_object_type_row(row: &Row<'_>) -> rusqlite::Result<ObjectType> {
    Ok(ObjectType {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        order_index: row.get("order_index")?,
    })
}

fn parse_attribute_row(row: &Row<'_>) -> RepoResult<Attribute> {
    let type_text: String = row.get("type")?;
    let kind = AttributeKind::parse(&type_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid attribute type `{type_text}` in attributes.type"))
    })?;
    Ok(Attribute {
        id: row.get("id")?,
        object_type_id: row.get("object_type_id")?,
        label: row.get("label")?,
        key: row.get("key")?,
        kind,
        required: int_to_bool(row.get("required")?, "attributes.required")?,
        order_index: row.get("order_index")?,
    })
}

fn parse_option_row(row: &Row<'_>) -> rusqlite::Result<AttributeOption> {
    Ok(AttributeOption {
        id: row.get("id")?,
        attribute_id: row.get("attribute_id")?,
        value_text: row.get("value_text")?,
    })
}
