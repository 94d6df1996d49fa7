use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use ado_port_sync::contract::{Catalog, DevOpsSource, MockCatalog, Page};
use ado_port_sync::download::paths;
use ado_port_sync::error::{SyncError, UpsertError};
use ado_port_sync::preprocess::{Blueprint, Entity};
use ado_port_sync::rate_limit::RateLimiter;
use ado_port_sync::synchronise::synchronise;
use async_trait::async_trait;
use mockall::Sequence;
use serde_json::{json, Value};

/// Scripted Azure DevOps: list paths return their registered pages (tokens are
/// page indexes), unregistered list paths return one empty page, and bulk
/// work-item paths answer with one record per requested id.
#[derive(Default)]
struct FakeSource {
    lists: HashMap<String, Vec<Vec<Value>>>,
    queries: HashMap<String, Value>,
    failures: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
    pages: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeSource {
    fn list(mut self, path: String, pages: Vec<Vec<Value>>) -> Self {
        self.lists.insert(path, pages);
        self
    }

    fn query(mut self, path: String, response: Value) -> Self {
        self.queries.insert(path, response);
        self
    }

    fn fail(mut self, path: String, status: u16) -> Self {
        self.failures.insert(path, status);
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Every `get_page` call with the continuation token it carried.
    fn pages_requested(&self) -> Vec<(String, Option<String>)> {
        self.pages.lock().unwrap().clone()
    }

    fn record(&self, path: &str) -> Result<(), SyncError> {
        self.requests.lock().unwrap().push(path.to_string());
        match self.failures.get(path) {
            Some(status) => Err(SyncError::Http {
                status: *status,
                url: path.to_string(),
                message: "scripted failure".into(),
            }),
            None => Ok(()),
        }
    }
}

fn bulk_ids(path: &str) -> Vec<u64> {
    path.split("ids=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .map(|ids| ids.split(',').map(|id| id.parse().unwrap()).collect())
        .unwrap_or_default()
}

#[async_trait]
impl DevOpsSource for FakeSource {
    async fn get_page(&self, path: &str, continuation_token: Option<String>) -> Result<Page, SyncError> {
        self.pages
            .lock()
            .unwrap()
            .push((path.to_string(), continuation_token.clone()));
        self.record(path)?;

        if path.contains("/_apis/wit/workitems?ids=") && !self.lists.contains_key(path) {
            return Ok(Page {
                records: bulk_ids(path).into_iter().map(work_item).collect(),
                continuation_token: None,
            });
        }

        let pages = self.lists.get(path).cloned().unwrap_or_else(|| vec![vec![]]);
        let index = continuation_token
            .map(|t| t.parse::<usize>().unwrap())
            .unwrap_or(0);
        let next = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(Page {
            records: pages[index].clone(),
            continuation_token: next,
        })
    }

    async fn post_query(&self, path: &str, _body: &Value) -> Result<Value, SyncError> {
        self.record(path)?;
        Ok(self
            .queries
            .get(path)
            .cloned()
            .unwrap_or_else(|| json!({ "workItems": [] })))
    }
}

/// Catalog that remembers every upsert in order and merges into a keyed state.
#[derive(Default)]
struct RecordingCatalog {
    upserts: Mutex<Vec<(Blueprint, Entity)>>,
    state: Mutex<BTreeMap<(Blueprint, String), Entity>>,
    reject: HashSet<String>,
}

impl RecordingCatalog {
    fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn upserts(&self) -> Vec<(Blueprint, Entity)> {
        self.upserts.lock().unwrap().clone()
    }

    fn identifiers(&self, blueprint: Blueprint) -> Vec<String> {
        self.upserts()
            .into_iter()
            .filter(|(b, _)| *b == blueprint)
            .map(|(_, e)| e.identifier)
            .collect()
    }
}

#[async_trait]
impl Catalog for RecordingCatalog {
    async fn upsert_entity(&self, blueprint: Blueprint, entity: &Entity) -> Result<(), UpsertError> {
        if self.reject.contains(&entity.identifier) {
            return Err(UpsertError::Rejected {
                status: 422,
                body: "{\"ok\":false}".into(),
            });
        }
        self.upserts.lock().unwrap().push((blueprint, entity.clone()));
        self.state
            .lock()
            .unwrap()
            .insert((blueprint, entity.identifier.clone()), entity.clone());
        Ok(())
    }
}

fn project(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name, "url": format!("https://dev.azure.com/org/_apis/projects/{id}"), "visibility": "private", "lastUpdateTime": "2024-01-01T00:00:00Z" })
}

fn repository(id: &str, project_id: &str) -> Value {
    json!({ "id": id, "name": format!("repo-{id}"), "url": "u", "isDisabled": false, "defaultBranch": "refs/heads/main", "project": { "id": project_id } })
}

fn pipeline(id: u64) -> Value {
    json!({ "id": id, "name": format!("pipeline-{id}"), "url": "p", "revision": 1 })
}

fn work_item(id: u64) -> Value {
    json!({
        "id": id,
        "rev": 1,
        "url": format!("https://dev.azure.com/org/_apis/wit/workItems/{id}"),
        "fields": {
            "System.Title": format!("item {id}"),
            "System.WorkItemType": "Task",
            "System.State": "New",
            "System.CreatedDate": "2024-01-01T00:00:00Z",
            "System.CreatedBy": { "displayName": "Grace Hopper" },
            "System.ChangedDate": "2024-01-02T00:00:00Z"
        }
    })
}

fn wiql_ids(ids: impl IntoIterator<Item = u64>) -> Value {
    json!({ "workItems": ids.into_iter().map(|id| json!({ "id": id, "url": "w" })).collect::<Vec<_>>() })
}

#[tokio::test]
async fn single_project_with_single_repository_produces_exactly_two_upserts() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![json!({ "id": "P1", "name": "Proj" })]])
        .list(
            paths::repositories("P1"),
            vec![vec![json!({ "id": "R1", "name": "repo", "url": "u", "isDisabled": false, "project": { "id": "P1" } })]],
        );

    let mut catalog = MockCatalog::new();
    let mut seq = Sequence::new();
    catalog
        .expect_upsert_entity()
        .withf(|blueprint, entity| {
            blueprint.as_str() == "azure_devops_project" && entity.identifier == "P1"
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    catalog
        .expect_upsert_entity()
        .withf(|blueprint, entity| {
            blueprint.as_str() == "azure_devops_repository"
                && entity.identifier == "R1"
                && entity.project() == Some("P1")
        })
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let limiter = RateLimiter::default();
    let report = synchronise(&source, &catalog, &limiter)
        .await
        .expect("sync should succeed");

    assert_eq!(report.total_upserted(), 2);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn every_child_relates_to_a_project_upserted_earlier() {
    let source = FakeSource::default()
        .list(
            paths::projects(),
            vec![vec![project("P1", "One")], vec![project("P2", "Two")]],
        )
        .list(
            paths::repositories("P1"),
            vec![vec![repository("R1", "P1")], vec![repository("R2", "P1")]],
        )
        .list(paths::repositories("P2"), vec![vec![repository("R3", "P2")]])
        .list(paths::pipelines("P1"), vec![vec![pipeline(10), pipeline(11)]])
        .list(paths::pipelines("P2"), vec![vec![pipeline(20)]])
        .query(paths::wiql("P1"), wiql_ids([1, 2, 3]))
        .query(paths::wiql("P2"), wiql_ids([4]));
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let report = synchronise(&source, &catalog, &limiter).await.unwrap();

    assert_eq!(report.upserted(Blueprint::Project), 2);
    assert_eq!(report.upserted(Blueprint::Repository), 3);
    assert_eq!(report.upserted(Blueprint::Pipeline), 3);
    assert_eq!(report.upserted(Blueprint::WorkItem), 4);

    let mut seen_projects = HashSet::new();
    for (blueprint, entity) in catalog.upserts() {
        match blueprint {
            Blueprint::Project => {
                seen_projects.insert(entity.identifier);
            }
            _ => {
                let project = entity.project().expect("child entities carry a project relation");
                assert!(
                    seen_projects.contains(project),
                    "{} {} relates to {project} before it was upserted",
                    blueprint,
                    entity.identifier
                );
            }
        }
    }
}

#[tokio::test]
async fn resource_kinds_are_walked_in_order_per_project() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One"), project("P2", "Two")]]);
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    synchronise(&source, &catalog, &limiter).await.unwrap();

    assert_eq!(
        source.requested(),
        vec![
            paths::projects(),
            paths::repositories("P1"),
            paths::pipelines("P1"),
            paths::wiql("P1"),
            paths::repositories("P2"),
            paths::pipelines("P2"),
            paths::wiql("P2"),
        ]
    );
}

#[tokio::test]
async fn each_project_page_is_walked_before_the_next_is_requested() {
    let source = FakeSource::default().list(
        paths::projects(),
        vec![vec![project("P1", "One")], vec![project("P2", "Two")]],
    );
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    synchronise(&source, &catalog, &limiter).await.unwrap();

    assert_eq!(
        source.requested(),
        vec![
            paths::projects(),
            paths::repositories("P1"),
            paths::pipelines("P1"),
            paths::wiql("P1"),
            paths::projects(),
            paths::repositories("P2"),
            paths::pipelines("P2"),
            paths::wiql("P2"),
        ]
    );
    let project_tokens: Vec<Option<String>> = source
        .pages_requested()
        .into_iter()
        .filter(|(path, _)| *path == paths::projects())
        .map(|(_, token)| token)
        .collect();
    assert_eq!(project_tokens, vec![None, Some("1".to_string())]);
}

#[tokio::test]
async fn bulk_work_item_fetch_follows_continuation_tokens() {
    let bulk = paths::work_items("P1", &[1, 2, 3]);
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .query(paths::wiql("P1"), wiql_ids([1, 2, 3]))
        .list(bulk.clone(), vec![vec![work_item(1), work_item(2)], vec![work_item(3)]]);
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let report = synchronise(&source, &catalog, &limiter).await.unwrap();

    let bulk_pages: Vec<Option<String>> = source
        .pages_requested()
        .into_iter()
        .filter(|(path, _)| *path == bulk)
        .map(|(_, token)| token)
        .collect();
    assert_eq!(bulk_pages, vec![None, Some("1".to_string())]);
    assert_eq!(report.upserted(Blueprint::WorkItem), 3);
    assert_eq!(catalog.identifiers(Blueprint::WorkItem), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn work_items_are_bulk_fetched_in_chunks_of_at_most_200() {
    let ids: Vec<u64> = (1..=450).collect();
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .query(paths::wiql("P1"), wiql_ids(ids.clone()));
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let report = synchronise(&source, &catalog, &limiter).await.unwrap();

    let bulk_requests: Vec<String> = source
        .requested()
        .into_iter()
        .filter(|p| p.contains("/_apis/wit/workitems?ids="))
        .collect();
    assert_eq!(bulk_requests.len(), 3);
    assert!(bulk_requests.iter().all(|p| bulk_ids(p).len() <= 200));

    let fetched: Vec<u64> = bulk_requests.iter().flat_map(|p| bulk_ids(p)).collect();
    assert_eq!(fetched, ids);

    assert_eq!(report.upserted(Blueprint::WorkItem), 450);
    let expected: Vec<String> = ids.iter().map(u64::to_string).collect();
    assert_eq!(catalog.identifiers(Blueprint::WorkItem), expected);
}

#[tokio::test]
async fn empty_query_result_issues_no_bulk_fetch() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .query(paths::wiql("P1"), json!({ "workItems": [] }));
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    synchronise(&source, &catalog, &limiter).await.unwrap();

    assert!(!source
        .requested()
        .iter()
        .any(|p| p.contains("/_apis/wit/workitems?ids=")));
}

#[tokio::test]
async fn http_error_aborts_the_run_and_skips_remaining_projects() {
    let source = FakeSource::default()
        .list(
            paths::projects(),
            vec![vec![project("P1", "One"), project("P2", "Two")]],
        )
        .list(paths::repositories("P1"), vec![vec![repository("R1", "P1")]])
        .fail(paths::pipelines("P1"), 503);
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let err = synchronise(&source, &catalog, &limiter).await.unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 503, .. }));
    // Work done before the failure stays written.
    assert_eq!(catalog.identifiers(Blueprint::Repository), vec!["R1"]);
    assert!(!source.requested().contains(&paths::repositories("P2")));
}

#[tokio::test]
async fn failed_query_aborts_the_run() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .fail(paths::wiql("P1"), 400);
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let err = synchronise(&source, &catalog, &limiter).await.unwrap_err();
    assert!(matches!(err, SyncError::Http { status: 400, .. }));
}

#[tokio::test]
async fn malformed_query_response_is_a_decode_error() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .query(paths::wiql("P1"), json!({ "unexpected": true }));
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let err = synchronise(&source, &catalog, &limiter).await.unwrap_err();
    assert!(matches!(err, SyncError::Decode { .. }));
}

#[tokio::test]
async fn unmappable_record_aborts_before_its_batch_is_upserted() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .list(
            paths::repositories("P1"),
            vec![vec![
                repository("R1", "P1"),
                json!({ "id": "R2", "url": "u", "isDisabled": false, "project": { "id": "P1" } }),
            ]],
        );
    let catalog = RecordingCatalog::default();

    let limiter = RateLimiter::default();
    let err = synchronise(&source, &catalog, &limiter).await.unwrap_err();

    assert!(matches!(err, SyncError::Mapping { kind: "repository", .. }));
    assert!(catalog.identifiers(Blueprint::Repository).is_empty());
    assert_eq!(catalog.identifiers(Blueprint::Project), vec!["P1"]);
}

#[tokio::test]
async fn rejected_upsert_is_reported_and_the_run_continues() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .list(
            paths::repositories("P1"),
            vec![vec![repository("R1", "P1"), repository("R2", "P1")]],
        )
        .list(paths::pipelines("P1"), vec![vec![pipeline(10)]]);
    let catalog = RecordingCatalog::rejecting(&["R1"]);

    let limiter = RateLimiter::default();
    let report = synchronise(&source, &catalog, &limiter).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].identifier, "R1");
    assert_eq!(report.failed[0].blueprint, Blueprint::Repository);
    assert_eq!(report.upserted(Blueprint::Repository), 1);
    assert_eq!(report.upserted(Blueprint::Pipeline), 1);
}

#[tokio::test]
async fn rerunning_with_unchanged_data_leaves_catalog_state_unchanged() {
    let source = FakeSource::default()
        .list(paths::projects(), vec![vec![project("P1", "One")]])
        .list(paths::repositories("P1"), vec![vec![repository("R1", "P1")]])
        .list(paths::pipelines("P1"), vec![vec![pipeline(10)]])
        .query(paths::wiql("P1"), wiql_ids([5, 6]));
    let catalog = RecordingCatalog::default();
    let limiter = RateLimiter::default();

    synchronise(&source, &catalog, &limiter).await.unwrap();
    let after_first = catalog.state.lock().unwrap().clone();

    synchronise(&source, &catalog, &limiter).await.unwrap();
    let after_second = catalog.state.lock().unwrap().clone();

    assert_eq!(after_first.len(), 5);
    assert_eq!(after_first, after_second);
}
