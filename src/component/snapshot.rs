//! Snapshot values exchanged on every step of a component run.

/// Starting point of a run: a state plus the bootstrap commands that must be
/// resolved before any external message is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initial<S, C> {
    pub state: S,
    pub commands: Vec<C>,
}

impl<S, C> Initial<S, C> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            commands: Vec::new(),
        }
    }

    pub fn with_commands(state: S, commands: Vec<C>) -> Self {
        Self { state, commands }
    }
}

/// One state transition produced by applying `message` to `previous_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regular<M, S, C> {
    pub message: M,
    pub previous_state: S,
    pub current_state: S,
    pub commands: Vec<C>,
}

/// Immutable record of either the start of a run or one state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<M, S, C> {
    /// First snapshot of a run (or of a forked run after a forced state).
    Initial(Initial<S, C>),

    /// Result of applying one message to the previous state.
    Regular(Regular<M, S, C>),
}

impl<M, S, C> Snapshot<M, S, C> {
    /// State observers should see after this snapshot.
    pub fn current_state(&self) -> &S {
        match self {
            Snapshot::Initial(initial) => &initial.state,
            Snapshot::Regular(regular) => &regular.current_state,
        }
    }

    pub fn into_current_state(self) -> S {
        match self {
            Snapshot::Initial(initial) => initial.state,
            Snapshot::Regular(regular) => regular.current_state,
        }
    }

    pub fn commands(&self) -> &[C] {
        match self {
            Snapshot::Initial(initial) => &initial.commands,
            Snapshot::Regular(regular) => &regular.commands,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Snapshot::Initial(_))
    }

    /// Short name for log output
    pub fn kind(&self) -> &'static str {
        match self {
            Snapshot::Initial(_) => "Initial",
            Snapshot::Regular(_) => "Regular",
        }
    }
}

impl<M, S, C> From<Initial<S, C>> for Snapshot<M, S, C> {
    fn from(initial: Initial<S, C>) -> Self {
        Snapshot::Initial(initial)
    }
}

impl<M, S, C> From<Regular<M, S, C>> for Snapshot<M, S, C> {
    fn from(regular: Regular<M, S, C>) -> Self {
        Snapshot::Regular(regular)
    }
}

/// Result of a single `Updater` application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<S, C> {
    pub state: S,
    pub commands: Vec<C>,
}

impl<S, C> Update<S, C> {
    /// Next state with no follow-up commands.
    pub fn new(state: S) -> Self {
        Self {
            state,
            commands: Vec::new(),
        }
    }

    pub fn with_commands(state: S, commands: Vec<C>) -> Self {
        Self { state, commands }
    }
}
