//! AWS provider for Stackflow
//!
//! This crate implements the `stackflow-cloud` traits on top of the `aws`
//! CLI, so no SDK credentials handling lives in Stackflow itself.
//!
//! # Components
//!
//! - [`AwsControlPlane`]: CloudFormation stacks, DynamoDB tables, S3 buckets,
//!   KMS keys and CloudWatch log groups
//! - [`LambdaCatalog`]: release catalog behind the stack's management function
//! - [`PitRestoreCopier`]: bucket snapshots through `s3-pit-restore`
//!
//! # Requirements
//!
//! - `aws` CLI v2 must be installed and configured
//! - `s3-pit-restore` is only needed for restores that include buckets
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::ControlPlane;
//! use stackflow_cloud_aws::{AwsCli, AwsControlPlane};
//!
//! let cli = AwsCli::new(Some("eu-west-1".into()), None);
//! cli.check_installed().await?;
//!
//! let control_plane = AwsControlPlane::new(cli);
//! let stack = control_plane.describe_stack("demo-ltd-prod").await?;
//! ```

pub mod awscli;
pub mod catalog;
pub mod error;
pub mod pit;
pub mod provider;

pub use awscli::AwsCli;
pub use catalog::{LambdaCatalog, MANAGEMENT_FUNCTION_OUTPUT};
pub use error::{AwsError, Result, parse_cli_error};
pub use pit::PitRestoreCopier;
pub use provider::AwsControlPlane;
