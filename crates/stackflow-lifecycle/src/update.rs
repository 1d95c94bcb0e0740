//! Version Update/Rollback engine
//!
//! One control loop per invocation:
//! resolve current version → load candidates → select target → resolve
//! prerequisite transition (recursively) → fetch release (retrying) →
//! submit the stack update → await a terminal state.

use crate::error::{LifecycleError, Result};
use crate::params;
use crate::prompt::{Prompter, require};
use crate::report::Reporter;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use regex::Regex;
use stackflow_cloud::{
    CloudError, ControlPlane, DEFAULT_CAPABILITIES, ReleaseCatalog, RetryConfig,
    UpdateStackRequest, VersionInfo,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Stacks older than this predate the update protocol and must be updated by hand once
pub const MIN_SUPPORTED_SORTABLE_TAG: &str = "01.13.00";

/// Longest chain of transition releases one invocation will follow
pub const MAX_PREREQUISITE_DEPTH: usize = 8;

static RELEASE_CANDIDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-rc\.\d+$").expect("valid release candidate regex"));

const TRANSITION_MARKER: &str = "-trans";

pub fn is_release_candidate(tag: &str) -> bool {
    RELEASE_CANDIDATE.is_match(tag)
}

pub fn is_transition(tag: &str) -> bool {
    tag.contains(TRANSITION_MARKER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Update,
    Rollback,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Update => write!(f, "update"),
            Direction::Rollback => write!(f, "rollback"),
        }
    }
}

/// Options for one update or rollback invocation
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub stack: String,
    pub direction: Direction,

    /// Target release; chosen interactively when absent
    pub tag: Option<String>,

    /// Skip the transition-release prerequisite check
    pub force: bool,

    /// Offer `-rc.N` releases as candidates
    pub show_release_candidates: bool,

    /// Release provider to request updates from, if not the default
    pub provider: Option<String>,

    /// Release metadata fetch backoff
    pub fetch_retry: RetryConfig,
}

impl UpdateOptions {
    pub fn update(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            direction: Direction::Update,
            tag: None,
            force: false,
            show_release_candidates: false,
            provider: None,
            fetch_retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(10),
                backoff_multiplier: 2.0,
            },
        }
    }

    pub fn rollback(stack: impl Into<String>) -> Self {
        Self {
            direction: Direction::Rollback,
            ..Self::update(stack)
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stack.trim().is_empty() {
            return Err(LifecycleError::InvalidInput(
                "a stack name or id is required".to_string(),
            ));
        }
        if matches!(&self.tag, Some(tag) if tag.trim().is_empty()) {
            return Err(LifecycleError::InvalidInput(
                "release tag must not be empty".to_string(),
            ));
        }
        if self.fetch_retry.max_attempts == 0 {
            return Err(LifecycleError::InvalidInput(
                "release fetch needs at least one attempt".to_string(),
            ));
        }
        if self.direction == Direction::Rollback && self.provider.is_some() {
            return Err(LifecycleError::InvalidInput(
                "a release provider only applies to updates".to_string(),
            ));
        }
        Ok(())
    }
}

/// Candidates to offer, in display order.
///
/// Updates are shown oldest-first; rollbacks only offer releases strictly
/// older than `current`, newest-first. Sorting is stable, so equal
/// sortable tags keep catalog order.
pub fn select_candidates(
    all: &[VersionInfo],
    current: &VersionInfo,
    direction: Direction,
    show_release_candidates: bool,
) -> Vec<VersionInfo> {
    let mut candidates: Vec<VersionInfo> = match direction {
        Direction::Update => all.to_vec(),
        Direction::Rollback => all
            .iter()
            .rev()
            .filter(|v| v.sortable_tag < current.sortable_tag)
            .cloned()
            .collect(),
    };

    candidates.sort_by(|a, b| a.sortable_tag.cmp(&b.sortable_tag));
    candidates.retain(|v| show_release_candidates || !is_release_candidate(&v.tag));

    if direction == Direction::Rollback {
        candidates.sort_by(|a, b| b.sortable_tag.cmp(&a.sortable_tag));
    }
    candidates
}

/// Newest transition release between `current` and `target` (both exclusive).
///
/// Release-candidate filtering does not apply here.
pub fn find_prerequisite(
    all: &[VersionInfo],
    current: &VersionInfo,
    target: &VersionInfo,
) -> Option<VersionInfo> {
    all.iter()
        .filter(|v| is_transition(&v.tag) && v.tag != target.tag)
        .filter(|v| v.sortable_tag < target.sortable_tag && v.sortable_tag > current.sortable_tag)
        .max_by(|a, b| a.sortable_tag.cmp(&b.sortable_tag))
        .cloned()
}

/// Per-invocation plan, discarded after the run
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub current_version: VersionInfo,

    /// Filtered, display-ordered candidates
    pub candidate_list: Vec<VersionInfo>,
    pub target: Option<VersionInfo>,
    pub requires_transition: Option<VersionInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The stack was moved to the target release
    Applied,
    /// The stack already runs the target release
    UpToDate,
    /// No release to move to
    NothingAvailable,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub direction: Direction,
    pub status: UpdateStatus,
    pub from: String,
    pub to: Option<String>,

    /// Transition releases applied on the way, oldest first
    pub transitions: Vec<String>,
}

enum Fetched {
    Release(VersionInfo),
    UpToDate,
}

pub struct UpdateEngine<'a> {
    control_plane: &'a dyn ControlPlane,
    catalog: &'a dyn ReleaseCatalog,
    prompter: &'a dyn Prompter,
    reporter: &'a dyn Reporter,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(
        control_plane: &'a dyn ControlPlane,
        catalog: &'a dyn ReleaseCatalog,
        prompter: &'a dyn Prompter,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            control_plane,
            catalog,
            prompter,
            reporter,
        }
    }

    pub async fn run(&self, options: &UpdateOptions) -> Result<UpdateOutcome> {
        options.validate()?;
        self.run_for(options, options.tag.clone(), Vec::new()).await
    }

    /// One full engine pass; `chain` holds the targets of enclosing passes
    fn run_for<'b>(
        &'b self,
        options: &'b UpdateOptions,
        tag: Option<String>,
        chain: Vec<String>,
    ) -> BoxFuture<'b, Result<UpdateOutcome>> {
        async move {
            let plan = self.plan(options, tag.as_deref()).await?;
            let from = plan.current_version.tag.clone();

            let Some(target) = plan.target.clone() else {
                self.reporter.info(&format!(
                    "No {} candidates for {} (current: {})",
                    options.direction, options.stack, from
                ));
                return Ok(UpdateOutcome {
                    direction: options.direction,
                    status: UpdateStatus::NothingAvailable,
                    from,
                    to: None,
                    transitions: Vec::new(),
                });
            };

            if target.tag == plan.current_version.tag {
                self.reporter
                    .success(&format!("{} is already at {}", options.stack, target.tag));
                return Ok(UpdateOutcome {
                    direction: options.direction,
                    status: UpdateStatus::UpToDate,
                    from,
                    to: Some(target.tag),
                    transitions: Vec::new(),
                });
            }

            if chain.contains(&target.tag) {
                return Err(LifecycleError::InvalidInput(format!(
                    "release catalog has a prerequisite cycle: {} -> {}",
                    chain.join(" -> "),
                    target.tag
                )));
            }

            let mut transitions = Vec::new();
            if let Some(transition) = &plan.requires_transition {
                if chain.len() + 1 > MAX_PREREQUISITE_DEPTH {
                    return Err(LifecycleError::InvalidInput(format!(
                        "more than {} transition releases are required before {}; update step by step",
                        MAX_PREREQUISITE_DEPTH, target.tag
                    )));
                }

                self.reporter.warn(&format!(
                    "{} requires transition release {} to be applied first",
                    target.tag, transition.tag
                ));
                require(
                    self.prompter,
                    &format!("Apply transition release {} now?", transition.tag),
                )?;

                let mut nested_chain = chain.clone();
                nested_chain.push(target.tag.clone());
                let nested = self
                    .run_for(options, Some(transition.tag.clone()), nested_chain)
                    .await?;
                transitions.extend(nested.transitions);
                if nested.status == UpdateStatus::Applied {
                    transitions.push(transition.tag.clone());
                }
            }

            let verb = match options.direction {
                Direction::Update => "Update",
                Direction::Rollback => "Roll back",
            };
            let current_tag = transitions.last().cloned().unwrap_or_else(|| from.clone());
            require(
                self.prompter,
                &format!(
                    "{} {} from {} to {}?",
                    verb, options.stack, current_tag, target.tag
                ),
            )?;

            let release = match self.fetch_release(options, &target.tag).await? {
                Fetched::Release(release) => release,
                Fetched::UpToDate => {
                    self.reporter
                        .success(&format!("{} is already up to date", options.stack));
                    return Ok(UpdateOutcome {
                        direction: options.direction,
                        status: UpdateStatus::UpToDate,
                        from,
                        to: Some(target.tag),
                        transitions,
                    });
                }
            };

            let status = self.apply(options, &release).await?;
            Ok(UpdateOutcome {
                direction: options.direction,
                status,
                from,
                to: Some(release.tag),
                transitions,
            })
        }
        .boxed()
    }

    /// Resolve the current version, load candidates and choose a target
    pub async fn plan(&self, options: &UpdateOptions, tag: Option<&str>) -> Result<UpdatePlan> {
        let current = self.resolve_current_version().await?;
        let all = self.load_candidates(options).await?;
        let candidate_list = select_candidates(
            &all,
            &current,
            options.direction,
            options.show_release_candidates,
        );

        let target = match tag {
            Some(tag) if tag == current.tag => Some(current.clone()),
            Some(tag) => Some(self.resolve_explicit_target(options, &all, &current, tag)?),
            None if candidate_list.is_empty() => None,
            None => {
                let choices: Vec<String> = candidate_list.iter().map(|v| v.tag.clone()).collect();
                let question = match options.direction {
                    Direction::Update => "Choose the release to update to",
                    Direction::Rollback => "Choose the release to roll back to",
                };
                let chosen = self.prompter.select(question, &choices)?;
                let target = candidate_list
                    .iter()
                    .find(|v| v.tag == chosen)
                    .cloned()
                    .ok_or_else(|| {
                        LifecycleError::InvalidInput(format!("'{}' is not a candidate", chosen))
                    })?;
                Some(target)
            }
        };

        let requires_transition = match &target {
            Some(target)
                if options.direction == Direction::Update
                    && !options.force
                    && !target.sortable_tag.is_empty() =>
            {
                find_prerequisite(&all, &current, target)
            }
            _ => None,
        };

        tracing::info!(
            stack = %options.stack,
            current = %current.tag,
            candidates = candidate_list.len(),
            target = ?target.as_ref().map(|t| &t.tag),
            transition = ?requires_transition.as_ref().map(|t| &t.tag),
            "Planned {}",
            options.direction
        );

        Ok(UpdatePlan {
            current_version: current,
            candidate_list,
            target,
            requires_transition,
        })
    }

    async fn resolve_current_version(&self) -> Result<VersionInfo> {
        let current = self.catalog.current_version().await?.ok_or_else(|| {
            LifecycleError::NotFound("the stack does not report its current version".to_string())
        })?;

        if current.sortable_tag.as_str() < MIN_SUPPORTED_SORTABLE_TAG {
            return Err(LifecycleError::InvalidInput(format!(
                "version {} is too old for automatic updates; update the stack manually once",
                current.tag
            )));
        }
        Ok(current)
    }

    async fn load_candidates(&self, options: &UpdateOptions) -> Result<Vec<VersionInfo>> {
        let all = match options.direction {
            Direction::Update => {
                self.catalog
                    .list_available_updates(options.provider.as_deref())
                    .await?
            }
            Direction::Rollback => self.catalog.list_previous_versions().await?,
        };
        tracing::debug!(count = all.len(), "Loaded release candidates");
        Ok(all)
    }

    /// An explicit tag bypasses the release-candidate filter of the interactive list
    fn resolve_explicit_target(
        &self,
        options: &UpdateOptions,
        all: &[VersionInfo],
        current: &VersionInfo,
        tag: &str,
    ) -> Result<VersionInfo> {
        match options.direction {
            Direction::Rollback => all
                .iter()
                .find(|v| v.tag == tag && v.sortable_tag < current.sortable_tag)
                .cloned()
                .ok_or_else(|| {
                    LifecycleError::InvalidInput(format!(
                        "{} is not a previous version older than the current one",
                        tag
                    ))
                }),
            Direction::Update => Ok(all.iter().find(|v| v.tag == tag).cloned().unwrap_or_else(|| {
                // Not listed yet; the fetch step asks the catalog for it.
                tracing::warn!(tag, "Release not in catalog listing, prerequisite check skipped");
                VersionInfo::new(tag, "")
            })),
        }
    }

    /// Fetch release metadata, requesting the release once if it is missing
    async fn fetch_release(&self, options: &UpdateOptions, tag: &str) -> Result<Fetched> {
        let retry = &options.fetch_retry;
        let mut requested = false;

        for attempt in 0..retry.max_attempts {
            let missing = match self.catalog.get_update_info(tag).await {
                Ok(info) if info.up_to_date => return Ok(Fetched::UpToDate),
                Ok(info) => match info.update {
                    Some(release) if release.template_url.is_some() => {
                        return Ok(Fetched::Release(release));
                    }
                    Some(_) => {
                        tracing::debug!(tag, attempt, "Release found but not staged yet");
                        false
                    }
                    None => true,
                },
                Err(e) if e.is_not_found() => true,
                Err(e) if is_retryable(&e) => {
                    tracing::warn!(tag, attempt, error = %e, "Release fetch failed, retrying");
                    false
                }
                Err(CloudError::InvalidConfig(message)) => {
                    return Err(LifecycleError::InvalidInput(message));
                }
                Err(e) => return Err(e.into()),
            };

            if missing && !requested {
                self.reporter
                    .info(&format!("Release {} not available yet, requesting it", tag));
                self.catalog
                    .request_update(tag, options.provider.as_deref())
                    .await?;
                requested = true;
            }

            if attempt + 1 < retry.max_attempts {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
        }

        Err(LifecycleError::NotFound(format!(
            "release {} is still unavailable after {} attempts",
            tag, retry.max_attempts
        )))
    }

    /// Submit the update and wait for the stack to settle
    async fn apply(&self, options: &UpdateOptions, release: &VersionInfo) -> Result<UpdateStatus> {
        let stack = self.control_plane.describe_stack(&options.stack).await?;
        if stack.status.ends_with("_IN_PROGRESS") {
            return Err(LifecycleError::StackBusy {
                stack: stack.name.clone(),
                status: stack.status.clone(),
            });
        }

        let template_url = release.template_url.clone().ok_or_else(|| {
            LifecycleError::NotFound(format!("release {} has no template", release.tag))
        })?;

        let request = UpdateStackRequest {
            stack: stack.id.clone(),
            template_url,
            parameters: params::previous_values(&stack),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        };

        let operation = match self.control_plane.update_stack(&request).await {
            Ok(operation) => operation,
            Err(CloudError::NoChanges(_)) => {
                self.reporter
                    .success(&format!("{} is already up to date", stack.name));
                return Ok(UpdateStatus::UpToDate);
            }
            Err(e @ CloudError::StackBusy { .. }) => return Err(e.into()),
            Err(e) => {
                return Err(LifecycleError::UpdateFailed {
                    message: e.to_string(),
                    console_url: stack.console_url(),
                });
            }
        };

        self.reporter.info(&format!(
            "Moving {} to {}, waiting for the stack to settle...",
            stack.name, release.tag
        ));

        self.control_plane
            .wait_for_terminal(&operation)
            .await
            .map_err(|e| LifecycleError::UpdateFailed {
                message: e.to_string(),
                console_url: stack.console_url(),
            })?;

        self.reporter
            .success(&format!("{} is now at {}", stack.name, release.tag));
        Ok(UpdateStatus::Applied)
    }
}

fn is_retryable(error: &CloudError) -> bool {
    matches!(
        error,
        CloudError::ApiError(_) | CloudError::CommandFailed(_) | CloudError::Timeout(_)
    )
}
