//! Domain model types used throughout Lingosync.
//!
//! These types bridge the merge coordinator, the persistence layer, and the
//! binaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::stats::TranslationStats;

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

/// Immutable identifier of a VCS revision (a commit hash / changeset node).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines and commit trailers.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Commit author / committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

// ---------------------------------------------------------------------------
// String units
// ---------------------------------------------------------------------------

/// Translation state of a unit. Ordered: everything from
/// [`UnitState::Translated`] upwards counts as translated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    #[default]
    Empty,
    Fuzzy,
    Translated,
    Approved,
    ReadOnly,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Fuzzy => "fuzzy",
            Self::Translated => "translated",
            Self::Approved => "approved",
            Self::ReadOnly => "read_only",
        }
    }

    /// Parse a stored state string; unknown values map to `Empty`.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "fuzzy" => Self::Fuzzy,
            "translated" => Self::Translated,
            "approved" => Self::Approved,
            "read_only" => Self::ReadOnly,
            _ => Self::Empty,
        }
    }

    pub fn is_translated(&self) -> bool {
        *self >= Self::Translated
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical translatable string. Identity is the `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringUnit {
    pub key: String,
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub state: UnitState,
}

impl StringUnit {
    pub fn new(
        key: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        state: UnitState,
    ) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
            target: target.into(),
            state,
        }
    }
}

/// Which fields of a unit differ between two revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFields {
    pub source: bool,
    pub target: bool,
    pub state: bool,
}

impl ChangedFields {
    pub fn between(old: &StringUnit, new: &StringUnit) -> Self {
        Self {
            source: old.source != new.source,
            target: old.target != new.target,
            state: old.state != new.state,
        }
    }

    pub fn any(&self) -> bool {
        self.source || self.target || self.state
    }
}

/// Change of a single unit between two revisions, aligned by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitChange {
    Unchanged,
    Added(StringUnit),
    Removed(StringUnit),
    Changed {
        old: StringUnit,
        new: StringUnit,
        fields: ChangedFields,
    },
}

impl UnitChange {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Source or target text differs.
    pub fn is_text_changed(&self) -> bool {
        matches!(self, Self::Changed { fields, .. } if fields.source || fields.target)
    }

    /// Translation state differs.
    pub fn is_state_changed(&self) -> bool {
        matches!(self, Self::Changed { fields, .. } if fields.state)
    }
}

// ---------------------------------------------------------------------------
// Pending edits
// ---------------------------------------------------------------------------

/// A translator edit not yet written to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub id: String,
    pub repository_id: String,
    pub file_path: String,
    pub unit_key: String,
    pub target: String,
    pub state: UnitState,
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// Upstream target a reviewer already weighed this edit against.
    #[serde(default)]
    pub reviewed_target: Option<String>,
}

impl PendingEdit {
    /// Create a new edit with a fresh UUID.
    pub fn new(
        repository_id: impl Into<String>,
        file_path: impl Into<String>,
        unit_key: impl Into<String>,
        target: impl Into<String>,
        state: UnitState,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository_id.into(),
            file_path: file_path.into(),
            unit_key: unit_key.into(),
            target: target.into(),
            state,
            author: author.into(),
            created_at: Utc::now(),
            reviewed_target: None,
        }
    }

    /// Mark the edit as reviewed against the given upstream target.
    pub fn reviewed_against(mut self, target: impl Into<String>) -> Self {
        self.reviewed_target = Some(target.into());
        self
    }

    /// Whether the edit already matches `unit`'s translation.
    pub fn matches(&self, unit: &StringUnit) -> bool {
        self.target == unit.target && self.state == unit.state
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Outcome the resolution policy assigned to a unit touched on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AutoMerged,
    KeptLocal,
    KeptRemote,
    NeedsManualReview,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMerged => "auto_merged",
            Self::KeptLocal => "kept_local",
            Self::KeptRemote => "kept_remote",
            Self::NeedsManualReview => "needs_manual_review",
        }
    }

    pub fn from_str_val(s: &str) -> Self {
        match s {
            "auto_merged" => Self::AutoMerged,
            "kept_local" => Self::KeptLocal,
            "kept_remote" => Self::KeptRemote,
            _ => Self::NeedsManualReview,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a persisted conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str_val(s: &str) -> Self {
        match s {
            "resolved" => Self::Resolved,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewer decision for a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    /// Keep the translator's edit; it is committed by the next cycle.
    KeepLocal,
    /// Keep the upstream translation and drop the edit.
    KeepRemote,
    /// Replace the edit with reviewer-supplied text.
    Custom(String),
}

impl ResolutionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Custom(_) => "custom",
        }
    }
}

/// Divergence between an upstream change and a local edit of the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub repository_id: String,
    pub file_path: String,
    pub unit_key: String,
    /// Target at the sync point, if the unit existed there.
    pub base_target: Option<String>,
    pub local_target: String,
    pub local_state: UnitState,
    /// Upstream unit; `None` when upstream removed it.
    pub remote: Option<StringUnit>,
    pub resolution: Resolution,
    pub status: ConflictStatus,
    pub choice: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Build an open record for `edit` against `remote`.
    pub fn new(
        edit: &PendingEdit,
        base: Option<&StringUnit>,
        remote: Option<&StringUnit>,
        resolution: Resolution,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: edit.repository_id.clone(),
            file_path: edit.file_path.clone(),
            unit_key: edit.unit_key.clone(),
            base_target: base.map(|u| u.target.clone()),
            local_target: edit.target.clone(),
            local_state: edit.state,
            remote: remote.cloned(),
            resolution,
            status: ConflictStatus::Open,
            choice: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Unified diff from the upstream translation to the local one.
    pub fn render_diff(&self) -> String {
        let remote = self
            .remote
            .as_ref()
            .map(|u| format!("{}\n", u.target))
            .unwrap_or_default();
        let local = format!("{}\n", self.local_target);
        diffy::create_patch(&remote, &local).to_string()
    }
}

// ---------------------------------------------------------------------------
// Synchronization cycle
// ---------------------------------------------------------------------------

/// What started a synchronization cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Periodic pull by the daemon.
    Scheduled,
    /// Upstream notified us of a push.
    Webhook { source: String },
    /// A translator asked for their edits to be committed.
    EditCommit { actor: String },
    /// An operator ran the CLI.
    Manual { actor: String },
}

impl SyncTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Webhook { .. } => "webhook",
            Self::EditCommit { .. } => "edit_commit",
            Self::Manual { .. } => "manual",
        }
    }

    /// Actor credited in commit messages.
    pub fn actor(&self) -> &str {
        match self {
            Self::Scheduled => "scheduler",
            Self::Webhook { source } => source,
            Self::EditCommit { actor } | Self::Manual { actor } => actor,
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// States of a synchronization cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Locking,
    Fetching,
    ExtractingRemoteChanges,
    ApplyingConflictPolicy,
    Committing,
    Pushing,
    Done,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Locking => write!(f, "locking"),
            Self::Fetching => write!(f, "fetching"),
            Self::ExtractingRemoteChanges => write!(f, "extracting_remote_changes"),
            Self::ApplyingConflictPolicy => write!(f, "applying_conflict_policy"),
            Self::Committing => write!(f, "committing"),
            Self::Pushing => write!(f, "pushing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-file summary of a successful cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub upstream_changes: usize,
    pub local_applied: usize,
    pub auto_merged: usize,
    pub conflicts: usize,
    pub rewritten: bool,
    pub stats: TranslationStats,
}

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub repository_id: String,
    pub revision: Revision,
    /// `false` when the merged tree equalled upstream and no commit was made.
    pub committed: bool,
    pub upstream_commits: usize,
    pub push_attempts: u32,
    pub files: Vec<FileReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn local_applied(&self) -> usize {
        self.files.iter().map(|f| f.local_applied).sum()
    }

    pub fn upstream_changes(&self) -> usize {
        self.files.iter().map(|f| f.upstream_changes).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.files.iter().map(|f| f.conflicts).sum()
    }
}

/// Result of [`MergeCoordinator::synchronize`](crate::coordinator::MergeCoordinator::synchronize).
#[derive(Debug)]
pub enum SyncOutcome {
    Done(SyncReport),
    Busy,
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Done(_) => "done",
            Self::Busy => "busy",
            Self::Failed(_) => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Audit / history
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub repository_id: Option<String>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, repository_id: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            repository_id: repository_id.map(str::to_string),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, repository_id: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            repository_id: repository_id.map(str::to_string),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}
