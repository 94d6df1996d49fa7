//! Mapping of raw Azure DevOps records into Port catalog entities.
//!
//! Each resource kind has a typed raw record. Deserializing into it is where a
//! record that lacks a required field gets rejected with
//! [`SyncError::Mapping`]; fields that Azure DevOps legitimately omits are
//! `Option`s and end up as `null` properties.
//!
//! Numeric Azure DevOps ids are stringified: catalog identifiers are opaque
//! strings. All mapping functions are pure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SyncError;

/// Catalog blueprint an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blueprint {
    Project,
    Repository,
    Pipeline,
    WorkItem,
}

impl Blueprint {
    pub fn as_str(self) -> &'static str {
        match self {
            Blueprint::Project => "azure_devops_project",
            Blueprint::Repository => "azure_devops_repository",
            Blueprint::Pipeline => "azure_devops_pipeline",
            Blueprint::WorkItem => "azure_devops_work_item",
        }
    }

    /// Human-readable kind, used in logs and mapping errors.
    pub fn kind(self) -> &'static str {
        match self {
            Blueprint::Project => "project",
            Blueprint::Repository => "repository",
            Blueprint::Pipeline => "pipeline",
            Blueprint::WorkItem => "work item",
        }
    }
}

impl fmt::Display for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized catalog entity, serialized as the upsert request body.
///
/// Maps are ordered so the same input always serializes to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub identifier: String,
    pub title: String,
    pub properties: BTreeMap<String, Value>,
    pub relations: BTreeMap<String, String>,
}

impl Entity {
    /// Identifier of the related project, if the entity has one.
    pub fn project(&self) -> Option<&str> {
        self.relations.get("project").map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    last_update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepository {
    id: String,
    name: String,
    url: String,
    #[serde(default)]
    default_branch: Option<String>,
    is_disabled: bool,
    project: ProjectRef,
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    id: u64,
    name: String,
    url: String,
    revision: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRef {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WorkItemFields {
    #[serde(rename = "System.Title")]
    title: String,
    #[serde(rename = "System.WorkItemType")]
    work_item_type: String,
    #[serde(rename = "System.State")]
    state: String,
    #[serde(rename = "System.CreatedDate")]
    created_date: String,
    #[serde(rename = "System.CreatedBy")]
    created_by: IdentityRef,
    #[serde(rename = "System.ChangedDate")]
    changed_date: String,
    // Not every work item type carries a priority.
    #[serde(rename = "Microsoft.VSTS.Common.Priority", default)]
    priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawWorkItem {
    id: u64,
    rev: u64,
    url: String,
    fields: WorkItemFields,
}

fn parse<T: DeserializeOwned>(blueprint: Blueprint, raw: &Value) -> Result<T, SyncError> {
    T::deserialize(raw).map_err(|e| SyncError::mapping(blueprint.kind(), e))
}

fn project_relation(project_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("project".to_string(), project_id.to_string())])
}

pub fn map_project(raw: &Value) -> Result<Entity, SyncError> {
    let project: RawProject = parse(Blueprint::Project, raw)?;
    Ok(Entity {
        identifier: project.id,
        title: project.name,
        properties: BTreeMap::from([
            ("description".to_string(), json!(project.description)),
            ("url".to_string(), json!(project.url)),
            ("visibility".to_string(), json!(project.visibility)),
            ("last_updated_time".to_string(), json!(project.last_update_time)),
        ]),
        relations: BTreeMap::new(),
    })
}

/// Repositories carry their own project reference, which is used for the relation.
pub fn map_repository(raw: &Value) -> Result<Entity, SyncError> {
    let repo: RawRepository = parse(Blueprint::Repository, raw)?;
    Ok(Entity {
        identifier: repo.id,
        title: repo.name,
        properties: BTreeMap::from([
            ("url".to_string(), json!(repo.url)),
            ("default_branch".to_string(), json!(repo.default_branch)),
            ("is_disabled".to_string(), json!(repo.is_disabled)),
        ]),
        relations: project_relation(&repo.project.id),
    })
}

pub fn map_pipeline(raw: &Value, project_id: &str) -> Result<Entity, SyncError> {
    let pipeline: RawPipeline = parse(Blueprint::Pipeline, raw)?;
    Ok(Entity {
        identifier: pipeline.id.to_string(),
        title: pipeline.name,
        properties: BTreeMap::from([
            ("url".to_string(), json!(pipeline.url)),
            ("revision".to_string(), json!(pipeline.revision)),
        ]),
        relations: project_relation(project_id),
    })
}

pub fn map_work_item(raw: &Value, project_id: &str) -> Result<Entity, SyncError> {
    let item: RawWorkItem = parse(Blueprint::WorkItem, raw)?;
    let fields = item.fields;
    Ok(Entity {
        identifier: item.id.to_string(),
        title: fields.title,
        properties: BTreeMap::from([
            ("url".to_string(), json!(item.url)),
            ("revision".to_string(), json!(item.rev)),
            ("type".to_string(), json!(fields.work_item_type)),
            ("state".to_string(), json!(fields.state)),
            ("created_date".to_string(), json!(fields.created_date)),
            ("created_by".to_string(), json!(fields.created_by.display_name)),
            ("updated_date".to_string(), json!(fields.changed_date)),
            ("priority".to_string(), json!(fields.priority)),
        ]),
        relations: project_relation(project_id),
    })
}

/// Maps a whole batch, stopping at the first record that does not map.
pub fn map_batch<F>(records: &[Value], map: F) -> Result<Vec<Entity>, SyncError>
where
    F: Fn(&Value) -> Result<Entity, SyncError>,
{
    records.iter().map(map).collect()
}
