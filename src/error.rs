use thiserror::Error;

/// Typed engine errors. Each variant names the phase and node path where it
/// was raised, per the error-handling policy: recoverable errors
/// (`Solver`, up to a bounded retry count) are handled inside the engine;
/// everything else surfaces to the caller with enough context to locate the
/// failure.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("[{phase}] configuration error ({path}): {message}")]
    Config { phase: String, path: String, message: String },

    #[error("[{phase}] input error ({path}): {message}")]
    Input { phase: String, path: String, message: String },

    #[error("[{phase}] parameter error ({path}): {message}")]
    Parameter { phase: String, path: String, message: String },

    #[error("[{phase}] infeasible constraints ({path}): {message}")]
    Infeasible { phase: String, path: String, message: String },

    #[error("[{phase}] solver error ({path}) after {attempts} attempt(s): {message}")]
    Solver { phase: String, path: String, attempts: u32, message: String },

    #[error("[{phase}] checkpoint state error: {message}")]
    State { phase: String, message: String },

    #[error("[{phase}] interrupted ({path}): checkpoint flushed, resume to continue")]
    Interrupted { phase: String, path: String },
}

impl EngineError {
    pub fn config(phase: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { phase: phase.into(), path: path.into(), message: message.into() }
    }

    pub fn input(phase: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input { phase: phase.into(), path: path.into(), message: message.into() }
    }

    pub fn parameter(phase: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parameter { phase: phase.into(), path: path.into(), message: message.into() }
    }

    pub fn infeasible(phase: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Infeasible { phase: phase.into(), path: path.into(), message: message.into() }
    }

    pub fn solver(
        phase: impl Into<String>,
        path: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::Solver { phase: phase.into(), path: path.into(), attempts, message: message.into() }
    }

    pub fn state(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State { phase: phase.into(), message: message.into() }
    }

    pub fn interrupted(phase: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Interrupted { phase: phase.into(), path: path.into() }
    }

    /// Maps a terminal error onto the CLI exit-code table (spec.md §6).
    /// `Parameter` and `State` are not named in that table; both are
    /// configuration-class mistakes (a bad budget, a checkpoint that
    /// doesn't match the current config) so they share exit code 1 with
    /// `Config` — see DESIGN.md.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config { .. } => 1,
            EngineError::Parameter { .. } => 1,
            EngineError::State { .. } => 1,
            EngineError::Input { .. } => 2,
            EngineError::Infeasible { .. } => 3,
            EngineError::Solver { .. } => 4,
            EngineError::Interrupted { .. } => 5,
        }
    }
}
