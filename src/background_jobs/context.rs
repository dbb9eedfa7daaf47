use tokio_util::sync::CancellationToken;

/// Origin of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Schedule,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Schedule => "schedule",
            Trigger::Manual => "manual",
        }
    }
}

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Id of the run record being produced.
    pub run_id: String,

    pub trigger: Trigger,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, run_id: String, trigger: Trigger) -> Self {
        Self {
            cancellation_token,
            run_id,
            trigger,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
