//! High-level pipeline: walks the Azure DevOps tree and upserts it into the catalog.
//!
//! One run proceeds strictly in order, one request at a time:
//!
//!   1. page through all projects; each batch of projects is upserted as soon as
//!      it arrives
//!   2. for every project of that batch, in arrival order:
//!      repositories → pipelines → work items
//!   3. work items take two steps: a WIQL query scoped to the project's area path
//!      returns ids, then the ids are bulk-fetched in chunks of at most
//!      [`WORK_ITEM_BATCH_SIZE`]
//!
//! Parents are always upserted before their children are fetched, so every
//! `project` relation points at a project written earlier in the same run.
//!
//! # Error Handling
//! Any [`SyncError`] (failed read, undecodable response, unmappable record)
//! aborts the run immediately; whatever was upserted before stays in the
//! catalog and the next run re-walks everything. A failed upsert is logged,
//! recorded in the [`SynchroniseReport`] and the run continues.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::contract::{Catalog, DevOpsSource};
use crate::download::paths;
use crate::error::SyncError;
use crate::paginate;
use crate::preprocess::{
    map_batch, map_pipeline, map_project, map_repository, map_work_item, Blueprint, Entity,
};
use crate::rate_limit::RateLimiter;

/// The bulk work-item endpoint accepts at most this many ids per request.
pub const WORK_ITEM_BATCH_SIZE: usize = 200;

/// Split work item ids into bulk-fetch chunks, preserving order.
pub fn work_item_chunks(ids: &[u64]) -> std::slice::Chunks<'_, u64> {
    ids.chunks(WORK_ITEM_BATCH_SIZE)
}

/// WIQL body selecting every work item under the project's area path.
pub fn wiql_query(project_name: &str) -> Value {
    // WIQL string literals escape a single quote by doubling it.
    let area_path = project_name.replace('\'', "''");
    json!({
        "query": format!("SELECT [Id] from WorkItems Where [System.AreaPath] = '{area_path}'")
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    work_items: Vec<WorkItemRef>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: u64,
}

/// Outcome of a run that was not aborted.
#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub upserted: BTreeMap<Blueprint, usize>,
    pub failed: Vec<FailedUpsert>,
}

#[derive(Debug)]
pub struct FailedUpsert {
    pub blueprint: Blueprint,
    pub identifier: String,
    pub error: String,
}

impl SynchroniseReport {
    pub fn upserted(&self, blueprint: Blueprint) -> usize {
        self.upserted.get(&blueprint).copied().unwrap_or(0)
    }

    pub fn total_upserted(&self) -> usize {
        self.upserted.values().sum()
    }
}

struct Synchroniser<'a, S: ?Sized, C: ?Sized> {
    source: &'a S,
    catalog: &'a C,
    limiter: &'a RateLimiter,
    report: SynchroniseReport,
}

/// Run one full synchronisation.
pub async fn synchronise<S, C>(
    source: &S,
    catalog: &C,
    limiter: &RateLimiter,
) -> Result<SynchroniseReport, SyncError>
where
    S: DevOpsSource + ?Sized,
    C: Catalog + ?Sized,
{
    info!("[SYNC] Starting full synchronisation run");

    let mut sync = Synchroniser {
        source,
        catalog,
        limiter,
        report: SynchroniseReport::default(),
    };

    let mut projects = paginate::fetch(source, limiter, paths::projects());
    while let Some(batch) = projects.next_batch().await? {
        info!(size = batch.len(), "[SYNC] Received projects batch");
        let entities = map_batch(&batch, map_project)?;
        sync.upsert_all(Blueprint::Project, &entities).await;

        for project in &entities {
            sync.sync_repositories(&project.identifier).await?;
            sync.sync_pipelines(&project.identifier).await?;
            sync.sync_work_items(&project.identifier, &project.title).await?;
        }
    }

    let report = sync.report;
    info!(
        projects = report.upserted(Blueprint::Project),
        repositories = report.upserted(Blueprint::Repository),
        pipelines = report.upserted(Blueprint::Pipeline),
        work_items = report.upserted(Blueprint::WorkItem),
        failed = report.failed.len(),
        "[SYNC] Synchronisation run finished"
    );
    Ok(report)
}

impl<'a, S, C> Synchroniser<'a, S, C>
where
    S: DevOpsSource + ?Sized,
    C: Catalog + ?Sized,
{
    async fn sync_repositories(&mut self, project_id: &str) -> Result<(), SyncError> {
        let mut pages = paginate::fetch(self.source, self.limiter, paths::repositories(project_id));
        while let Some(batch) = pages.next_batch().await? {
            info!(project_id, size = batch.len(), "[SYNC] Received repositories batch");
            let entities = map_batch(&batch, map_repository)?;
            self.upsert_all(Blueprint::Repository, &entities).await;
        }
        Ok(())
    }

    async fn sync_pipelines(&mut self, project_id: &str) -> Result<(), SyncError> {
        let mut pages = paginate::fetch(self.source, self.limiter, paths::pipelines(project_id));
        while let Some(batch) = pages.next_batch().await? {
            info!(project_id, size = batch.len(), "[SYNC] Received pipelines batch");
            let entities = map_batch(&batch, |raw| map_pipeline(raw, project_id))?;
            self.upsert_all(Blueprint::Pipeline, &entities).await;
        }
        Ok(())
    }

    async fn sync_work_items(&mut self, project_id: &str, project_name: &str) -> Result<(), SyncError> {
        let ids = self.query_work_item_ids(project_id, project_name).await?;
        info!(project_id, count = ids.len(), "[SYNC] Work item query returned ids");

        for chunk in work_item_chunks(&ids) {
            let path = paths::work_items(project_id, chunk);
            let mut pages = paginate::fetch(self.source, self.limiter, path);
            while let Some(batch) = pages.next_batch().await? {
                info!(project_id, size = batch.len(), "[SYNC] Received work items batch");
                let entities = map_batch(&batch, |raw| map_work_item(raw, project_id))?;
                self.upsert_all(Blueprint::WorkItem, &entities).await;
            }
        }
        Ok(())
    }

    async fn query_work_item_ids(
        &self,
        project_id: &str,
        project_name: &str,
    ) -> Result<Vec<u64>, SyncError> {
        let path = paths::wiql(project_id);
        self.limiter.acquire().await;
        let response = self
            .source
            .post_query(&path, &wiql_query(project_name))
            .await?;

        let parsed = WiqlResponse::deserialize(&response).map_err(|e| SyncError::Decode {
            url: path,
            message: e.to_string(),
        })?;
        Ok(parsed.work_items.into_iter().map(|item| item.id).collect())
    }

    async fn upsert_all(&mut self, blueprint: Blueprint, entities: &[Entity]) {
        for entity in entities {
            match self.catalog.upsert_entity(blueprint, entity).await {
                Ok(()) => {
                    *self.report.upserted.entry(blueprint).or_default() += 1;
                }
                Err(e) => {
                    error!(
                        blueprint = %blueprint,
                        identifier = %entity.identifier,
                        error = %e,
                        "[SYNC][ERROR] Upsert failed, continuing"
                    );
                    self.report.failed.push(FailedUpsert {
                        blueprint,
                        identifier: entity.identifier.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
