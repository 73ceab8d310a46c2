// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed runtime configuration
//!
//! All recognized options live in one record with defaults; environment
//! binding is a peripheral concern handled by whoever embeds the toolkit.
//! Field names deserialize from the documented kebab-case keys.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Selects how modules are detected from the package tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStrategySelector {
    /// Every direct sub-package of the root becomes a module.
    #[default]
    DirectSubPackages,
    /// Only packages carrying a module annotation become modules.
    ExplicitlyAnnotated,
    /// A user-registered strategy, referenced by name.
    #[serde(untagged)]
    Custom(String),
}

/// How the externalization router hands events to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalizationMode {
    /// Call the broker sender directly.
    #[default]
    Broker,
    /// Write to the caller-provided outbox inside the business
    /// transaction; an external worker drains it later.
    Outbox,
}

/// What completing a publication does to its stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionMode {
    /// Set the completion instant, keep the row.
    #[default]
    Update,
    /// Remove the row.
    Delete,
}

/// Externalization router options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExternalizationConfig {
    /// Master switch for the router.
    pub enabled: bool,
    /// Broker or outbox handoff.
    pub mode: ExternalizationMode,
    /// Ship the serialized event form instead of the live payload.
    pub serialize_externalization: bool,
}

impl Default for ExternalizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ExternalizationMode::default(),
            serialize_externalization: false,
        }
    }
}

/// Toolkit-wide configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LatticeConfig {
    /// Module detection strategy.
    pub detection_strategy: DetectionStrategySelector,
    /// When true, async dispatch shutdown awaits termination with the
    /// default two second grace period.
    pub default_async_termination: bool,
    /// Enables the supervisor's restart resubmission loop.
    pub republish_on_restart: bool,
    /// Externalization router options.
    pub externalization: ExternalizationConfig,
    /// Enables the periodic staleness scan.
    pub monitor_staleness: bool,
    /// Seconds between staleness scans.
    pub staleness_check_interval_secs: u64,
    /// Age in seconds after which an unfinished publication counts as
    /// stale.
    pub staleness_threshold_secs: u64,
    /// What completion does to the stored publication.
    pub completion_mode: CompletionMode,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            detection_strategy: DetectionStrategySelector::default(),
            default_async_termination: false,
            republish_on_restart: false,
            externalization: ExternalizationConfig::default(),
            monitor_staleness: false,
            staleness_check_interval_secs: 60,
            staleness_threshold_secs: 300,
            completion_mode: CompletionMode::default(),
        }
    }
}

impl LatticeConfig {
    /// Default grace period for awaiting in-flight async dispatch on
    /// shutdown.
    pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

    /// The interval between staleness scans.
    pub fn staleness_check_interval(&self) -> Duration {
        Duration::from_secs(self.staleness_check_interval_secs)
    }

    /// The staleness threshold as a chrono duration.
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_threshold_secs as i64)
    }

    /// The grace period used on shutdown; zero unless
    /// `default-async-termination` is set.
    pub fn termination_grace(&self) -> Duration {
        if self.default_async_termination {
            Self::DEFAULT_TERMINATION_GRACE
        } else {
            Duration::ZERO
        }
    }

    /// Enables restart resubmission.
    pub fn with_republish_on_restart(mut self, enabled: bool) -> Self {
        self.republish_on_restart = enabled;
        self
    }

    /// Enables the staleness scan with the given spacing.
    pub fn with_staleness_monitoring(mut self, interval_secs: u64, threshold_secs: u64) -> Self {
        self.monitor_staleness = true;
        self.staleness_check_interval_secs = interval_secs;
        self.staleness_threshold_secs = threshold_secs;
        self
    }

    /// Selects the externalization mode.
    pub fn with_externalization_mode(mut self, mode: ExternalizationMode) -> Self {
        self.externalization.mode = mode;
        self
    }

    /// Selects the completion mode.
    pub fn with_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.completion_mode = mode;
        self
    }
}
