//! ado-port-sync: one-way synchronisation of an Azure DevOps organization into
//! the Port software catalog.
//!
//! The pipeline mirrors download → process → upload:
//! [`download`] and [`paginate`] read the remote tree under the budget of
//! [`rate_limit`], [`preprocess`] maps raw records to catalog entities,
//! [`upload`] writes them, and [`synchronise`] drives the traversal.

pub mod cli;
pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod load_config;
pub mod paginate;
pub mod preprocess;
pub mod rate_limit;
pub mod synchronise;
pub mod upload;

pub use cli::{run, Cli, Commands};
