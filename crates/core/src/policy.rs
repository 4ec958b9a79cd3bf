//! Conflict resolution policy.
//!
//! [`decide`] is a pure function of the upstream change of a unit, the
//! pending local edit of that unit and the unit as it was at the sync point.
//! It never touches storage or the working copy.

use crate::models::{PendingEdit, Resolution, StringUnit, UnitChange};

/// What the coordinator should do with one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do: no edit and no upstream change.
    Noop,
    /// Take the upstream state of the unit (which may be a removal).
    ApplyUpstream,
    /// Write the local edit over the upstream unit.
    ApplyLocal(Resolution),
    /// Upstream already equals the edit; the edit is consumed.
    Converged,
    /// Escalate to a reviewer; the edit is held.
    Conflict,
}

impl Decision {
    /// Resolution recorded for a unit that has a pending edit.
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::Noop | Self::ApplyUpstream => None,
            Self::ApplyLocal(resolution) => Some(*resolution),
            Self::Converged => Some(Resolution::AutoMerged),
            Self::Conflict => Some(Resolution::NeedsManualReview),
        }
    }
}

/// Decide the outcome for one unit.
///
/// `base` is the unit at the sync point, when it existed there.
pub fn decide(
    upstream: &UnitChange,
    local: Option<&PendingEdit>,
    base: Option<&StringUnit>,
) -> Decision {
    let Some(edit) = local else {
        return if upstream.is_unchanged() {
            Decision::Noop
        } else {
            Decision::ApplyUpstream
        };
    };

    // Both sides agree already.
    if let Some(current) = upstream_unit(upstream, base) {
        if edit.matches(current) {
            return Decision::Converged;
        }
        // A review only covers the upstream target the reviewer saw.
        if let Some(reviewed) = edit.reviewed_target.as_deref() {
            return if reviewed == current.target {
                Decision::ApplyLocal(Resolution::KeptLocal)
            } else {
                Decision::Conflict
            };
        }
    }

    match upstream {
        // An edit of a unit upstream never had cannot be placed anywhere.
        UnitChange::Unchanged if base.is_none() => Decision::Conflict,
        UnitChange::Unchanged => Decision::ApplyLocal(Resolution::KeptLocal),
        UnitChange::Removed(_) => Decision::Conflict,
        UnitChange::Added(_) => Decision::Conflict,
        UnitChange::Changed { fields, .. } if fields.target => Decision::Conflict,
        UnitChange::Changed { .. } => {
            // Upstream touched only source or state: the translator's
            // target and state win, the new source is adopted.
            Decision::ApplyLocal(Resolution::AutoMerged)
        }
    }
}

/// The unit as upstream has it now, if it exists there.
fn upstream_unit<'a>(upstream: &'a UnitChange, base: Option<&'a StringUnit>) -> Option<&'a StringUnit> {
    match upstream {
        UnitChange::Unchanged => base,
        UnitChange::Added(unit) => Some(unit),
        UnitChange::Changed { new, .. } => Some(new),
        UnitChange::Removed(_) => None,
    }
}

/// Apply an edit to an upstream unit: upstream source, local target and state.
pub fn merge_unit(upstream: &StringUnit, edit: &PendingEdit) -> StringUnit {
    StringUnit {
        key: upstream.key.clone(),
        source: upstream.source.clone(),
        target: edit.target.clone(),
        state: edit.state,
    }
}
