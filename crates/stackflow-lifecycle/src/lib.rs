//! Stackflow lifecycle engines
//!
//! Three engines drive a deployed stack through its lifecycle:
//!
//! - [`update::UpdateEngine`]: move to a newer release (or roll back to an
//!   older one), applying transition releases first
//! - [`restore::RestoreEngine`]: rebuild tables and buckets from a
//!   point-in-time snapshot and derive parameters for a new stack
//! - [`destroy::DestroyEngine`]: delete a stack and the resources it would leak
//!
//! All three read stacks through the shared [`params::ParameterDeriver`]
//! and [`resources::ResourceEnumerator`], and talk to the operator only
//! through the [`prompt::Prompter`] and [`report::Reporter`] handles they
//! are given.

pub mod destroy;
pub mod error;
pub mod naming;
pub mod params;
pub mod prompt;
pub mod report;
pub mod resources;
pub mod restore;
pub mod script;
pub mod update;

pub use destroy::{DestroyEngine, DestroyOptions, RetentionDecision, TeardownReport};
pub use error::{CleanupFailure, LifecycleError, RestoreStage, Result};
pub use naming::derive_restored_resource_name;
pub use params::ParameterDeriver;
pub use prompt::{AssumeYes, Prompter};
pub use report::{Reporter, SilentReporter, TracingReporter};
pub use resources::ResourceEnumerator;
pub use restore::{LaunchOptions, RestoreEngine, RestoreOptions, RestorePlan, RestoreResult};
pub use update::{Direction, UpdateEngine, UpdateOptions, UpdateOutcome, UpdatePlan, UpdateStatus};
