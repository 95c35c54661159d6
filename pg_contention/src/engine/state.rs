use std::fmt;

/// Lifecycle of one generator cycle.
///
/// `Idle → Acquire → Work → Cooldown → Idle`, where `Acquire` may block on
/// pool capacity. A failed `Acquire` or `Work` goes straight to `Cooldown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeneratorState {
    #[default]
    Idle,
    Acquire,
    Work,
    Cooldown,
}

impl GeneratorState {
    pub const ALL: [GeneratorState; 4] = [
        GeneratorState::Idle,
        GeneratorState::Acquire,
        GeneratorState::Work,
        GeneratorState::Cooldown,
    ];

    /// Whether moving from `self` to `next` is a legal step.
    ///
    /// Fan-out scenarios re-enter `Acquire` from `Work` when a sub-task takes
    /// its own connection, and staying in the same state is always allowed.
    pub fn can_transition_to(self, next: GeneratorState) -> bool {
        use GeneratorState::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Acquire)
                | (Idle, Work)
                | (Idle, Cooldown)
                | (Acquire, Work)
                | (Acquire, Cooldown)
                | (Work, Acquire)
                | (Work, Cooldown)
                | (Cooldown, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorState::Idle => "idle",
            GeneratorState::Acquire => "acquire",
            GeneratorState::Work => "work",
            GeneratorState::Cooldown => "cooldown",
        }
    }
}

impl fmt::Display for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::GeneratorState::*;

    #[test]
    fn test_happy_path_cycle_is_legal() {
        let cycle = [Idle, Acquire, Work, Cooldown, Idle];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failures_skip_to_cooldown() {
        assert!(Acquire.can_transition_to(Cooldown));
        assert!(Work.can_transition_to(Cooldown));
    }

    #[test]
    fn test_cooldown_only_returns_to_idle() {
        assert!(!Cooldown.can_transition_to(Work));
        assert!(!Cooldown.can_transition_to(Acquire));
        assert!(!Work.can_transition_to(Idle));
    }
}
