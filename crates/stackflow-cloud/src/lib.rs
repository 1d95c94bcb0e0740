//! Stackflow Cloud Control Plane
//!
//! This crate provides the provider abstraction the lifecycle engines talk
//! to. Engines never call a provider API directly; they go through the
//! traits defined here so update, restore and destroy share one notion of
//! what a stack, a resource and a release are.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 stackflow CLI                    │
//! │       (update / rollback / restore / destroy)    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │              stackflow-lifecycle                 │
//! │   update engine · restore engine · destroy      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  trait ControlPlane · trait ReleaseCatalog       │
//! │  trait SnapshotCopier · StackDescriptor · ...    │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │ stackflow-    │
//!           │  cloud-aws    │
//!           └───────────────┘
//! ```

pub mod error;
pub mod model;
pub mod provider;

// Re-exports
pub use error::{CloudError, Result};
pub use model::{
    BucketSettings, CloudResource, CreateStackRequest, DEFAULT_CAPABILITIES, OperationKind,
    ResourceKind, StackDescriptor, StackOperation, StackOutput, StackParameter, TableSettings,
    UpdateInfo, UpdateStackRequest, VersionInfo, region_from_arn,
};
pub use provider::{ControlPlane, ReleaseCatalog, RetryConfig, SnapshotCopier};
