use deckr_contracts::deck::{SlideSpec, TruncationNotice, TruncationReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapOutcome {
    pub specs: Vec<SlideSpec>,
    pub truncation: Option<TruncationNotice>,
}

impl CapOutcome {
    pub fn truncated(&self) -> bool {
        self.truncation.is_some()
    }

    pub fn reason(&self) -> Option<TruncationReason> {
        self.truncation.as_ref().map(|notice| notice.reason)
    }

    pub fn warning(&self) -> Option<&str> {
        self.truncation
            .as_ref()
            .and_then(|notice| notice.warning.as_deref())
    }
}

/// Applies trial and plan limits before any external call is made. Always a
/// prefix cut, never a sample.
pub fn enforce_session_cap(
    specs: Vec<SlideSpec>,
    test_mode: bool,
    test_mode_cap: usize,
    plan_cap: usize,
) -> CapOutcome {
    let original = specs.len();
    if test_mode && original > test_mode_cap {
        return truncate(specs, test_mode_cap, TruncationReason::TestMode, None);
    }
    if original > plan_cap {
        let warning = format!(
            "Outline has {original} slides but your plan allows {plan_cap}; generating the first {plan_cap}."
        );
        return truncate(specs, plan_cap, TruncationReason::PlanLimit, Some(warning));
    }
    CapOutcome {
        specs,
        truncation: None,
    }
}

fn truncate(
    mut specs: Vec<SlideSpec>,
    keep: usize,
    reason: TruncationReason,
    warning: Option<String>,
) -> CapOutcome {
    let original = specs.len();
    specs.truncate(keep);
    CapOutcome {
        truncation: Some(TruncationNotice {
            reason,
            original,
            kept: specs.len(),
            warning,
        }),
        specs,
    }
}
