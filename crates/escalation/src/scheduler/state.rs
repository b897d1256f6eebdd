//! Level and pass progression for an escalation run.

use std::time::Duration;

use crate::model::{EscalationPolicy, Step};

/// What follows a notified step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Notify `step` after waiting `delay`
    Notify { step: Step, delay: Duration },
    /// The run is complete
    Complete,
}

/// The first step of a run and the wait before it.
///
/// `policy` must be ordered and non-empty.
pub fn first_step(policy: &EscalationPolicy) -> NextStep {
    NextStep::Notify {
        step: Step::FIRST,
        delay: policy.rules.first().map(|r| r.delay()).unwrap_or_default(),
    }
}

/// Plan the step after `current` has been notified.
///
/// Within a pass each rule waits its own delay. A new pass restarts at the
/// first rule and waits at least `min_repeat_interval`, so a policy made of
/// zero-delay rules cannot loop without pause.
pub fn plan_next(
    policy: &EscalationPolicy,
    current: Step,
    min_repeat_interval: Duration,
) -> NextStep {
    let next_level = current.level + 1;
    if let Some(rule) = policy.rules.get(next_level) {
        return NextStep::Notify {
            step: Step {
                level: next_level,
                pass: current.pass,
            },
            delay: rule.delay(),
        };
    }

    if policy.repeat.allows_pass_after(current.pass) {
        let first_delay = policy.rules.first().map(|r| r.delay()).unwrap_or_default();
        return NextStep::Notify {
            step: Step {
                level: 0,
                pass: current.pass + 1,
            },
            delay: first_delay.max(min_repeat_interval),
        };
    }

    NextStep::Complete
}
