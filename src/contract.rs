#![allow(unused)]

//! # contract: the two remote seams of a sync run
//!
//! - [`DevOpsSource`] is the read side: paged list requests and query
//!   submission against the Azure DevOps REST API.
//! - [`Catalog`] is the write side: idempotent create-or-merge of one entity
//!   into a Port blueprint.
//!
//! The orchestration in [`crate::synchronise`] only talks to these traits, so
//! tests can drive it with `mockall` mocks (feature `test-export-mocks`) or with
//! scripted fakes. Real implementations live in [`crate::download`] and
//! [`crate::upload`].

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde_json::Value;

use crate::error::{SyncError, UpsertError};
use crate::preprocess::{Blueprint, Entity};

/// One page of a list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Raw records from the body's `value` array, in response order.
    pub records: Vec<Value>,
    /// Cursor for the next page; `None` on the last page.
    pub continuation_token: Option<String>,
}

/// Read access to an Azure DevOps organization.
///
/// Paths are relative to the organization root, e.g.
/// `_apis/projects?api-version=7.1-preview.4`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DevOpsSource: Send + Sync {
    /// Fetch one page of a list endpoint. The first page is requested without a token.
    async fn get_page(
        &self,
        path: &str,
        continuation_token: Option<String>,
    ) -> Result<Page, SyncError>;

    /// Submit a query (POST) and return the decoded JSON response.
    async fn post_query(&self, path: &str, body: &Value) -> Result<Value, SyncError>;
}

/// Write access to the software catalog.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Create the entity if absent, merge its fields into the existing one otherwise.
    async fn upsert_entity(&self, blueprint: Blueprint, entity: &Entity) -> Result<(), UpsertError>;
}
