//! Stack Parameter Deriver
//!
//! Reads a stack's current parameters and outputs and turns them into the
//! parameter set a template expects to "bring your own resource": each
//! resource output `X` fills parameter `ExistingX` when the stack declares it.

use crate::error::{LifecycleError, Result};
use crate::report::Reporter;
use stackflow_cloud::{ControlPlane, StackDescriptor, StackParameter};

/// Parameter naming where templates are staged; excluded from renaming
pub const DEPLOYMENT_BUCKET_PARAMETER: &str = "SourceDeploymentBucket";

/// Parameter that receives the physical id of resource output `output_key`
pub fn parameter_name_for_output(output_key: &str) -> String {
    format!("Existing{}", output_key)
}

/// Insert or replace (in place) a parameter by key
pub fn set_parameter(parameters: &mut Vec<StackParameter>, parameter: StackParameter) {
    match parameters.iter_mut().find(|p| p.key == parameter.key) {
        Some(existing) => *existing = parameter,
        None => parameters.push(parameter),
    }
}

/// Parse a `KEY=VALUE` override
pub fn parse_override(raw: &str) -> Result<StackParameter> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        LifecycleError::InvalidInput(format!("expected KEY=VALUE, got '{}'", raw))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(LifecycleError::InvalidInput(format!(
            "parameter override '{}' has an empty key",
            raw
        )));
    }
    Ok(StackParameter::new(key, value))
}

/// Derive the parameter set from an already-read stack snapshot.
///
/// Only keys the stack already declares are filled from outputs, so the set
/// stays valid for the stack's template. A resource whose `ExistingX` is
/// undeclared is left unreferenced for cross-validation to catch.
pub fn derive_from(stack: &StackDescriptor, overrides: &[StackParameter]) -> Vec<StackParameter> {
    let mut parameters = stack.parameters.clone();

    for resource in stack.output_resources() {
        let key = parameter_name_for_output(&resource.logical_name);
        if let Some(existing) = parameters.iter_mut().find(|p| p.key == key) {
            *existing = StackParameter::new(key, resource.physical_id);
        } else {
            tracing::debug!(parameter = %key, "Output has no declared parameter");
        }
    }

    for parameter in overrides {
        set_parameter(&mut parameters, parameter.clone());
    }

    parameters
}

/// "Keep what you have" form of the stack's current parameters
pub fn previous_values(stack: &StackDescriptor) -> Vec<StackParameter> {
    stack
        .parameters
        .iter()
        .map(|p| StackParameter::previous(p.key.clone()))
        .collect()
}

pub struct ParameterDeriver<'a> {
    control_plane: &'a dyn ControlPlane,
    reporter: &'a dyn Reporter,
}

impl<'a> ParameterDeriver<'a> {
    /// Pass a [`SilentReporter`](crate::report::SilentReporter) to run quietly
    pub fn new(control_plane: &'a dyn ControlPlane, reporter: &'a dyn Reporter) -> Self {
        Self {
            control_plane,
            reporter,
        }
    }

    /// Re-read the stack and derive its parameter set
    pub async fn derive(
        &self,
        stack: &str,
        overrides: &[StackParameter],
    ) -> Result<Vec<StackParameter>> {
        Ok(self.derive_with_stack(stack, overrides).await?.1)
    }

    /// Like [`derive`](Self::derive), also returning the snapshot it was derived from
    pub async fn derive_with_stack(
        &self,
        stack: &str,
        overrides: &[StackParameter],
    ) -> Result<(StackDescriptor, Vec<StackParameter>)> {
        self.reporter
            .info(&format!("Reading parameters of stack {}", stack));
        let descriptor = self.control_plane.describe_stack(stack).await?;
        let parameters = derive_from(&descriptor, overrides);
        tracing::debug!(stack, count = parameters.len(), "Derived stack parameters");
        Ok((descriptor, parameters))
    }
}
