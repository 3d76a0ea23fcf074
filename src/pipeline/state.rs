//! Three-stage pipeline state with cascading invalidation.
//!
//! Both the indexing and integration pipelines run as prepare -> execute ->
//! finish. Each stage has a done flag; clearing a flag clears every later
//! flag, so a pipeline can never claim a finished result built on stale
//! earlier work. One transition function holds the whole table - there are
//! no ad hoc boolean updates anywhere else.
//!
//! The state object is deliberately not synchronised: it has exactly one
//! owner (its pipeline), and the coordinator enforces that no stage method
//! is entered from two callers at once.

use log::debug;

/// The three pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Prepare,
    Execute,
    Finish,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Execute => "execute",
            Stage::Finish => "finish",
        }
    }
}

/// Coarse phase derived from the stage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing valid yet, or an earlier stage was invalidated.
    Dirty,
    Prepared,
    Executed,
    /// Terminal: all three stages hold.
    Finished,
}

/// Done flags for the three stages.
///
/// Invariant, restored by every transition: a stage is only done if all
/// earlier stages are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineState {
    prepared: bool,
    executed: bool,
    finished: bool,
}

impl PipelineState {
    /// Fresh state, all stages pending.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared(&self) -> bool {
        self.prepared
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// The single transition function. Setting a stage done requires the
    /// earlier stages to be done already; clearing a stage cascades forward
    /// and clears every later stage.
    pub fn set(&mut self, stage: Stage, done: bool) {
        match (stage, done) {
            (Stage::Prepare, true) => {
                self.prepared = true;
            }
            (Stage::Prepare, false) => {
                if self.executed || self.finished {
                    debug!("prepare invalidated, cascading to execute/finish");
                }
                self.prepared = false;
                self.executed = false;
                self.finished = false;
            }
            (Stage::Execute, true) => {
                debug_assert!(self.prepared, "execute done before prepare");
                self.executed = true;
            }
            (Stage::Execute, false) => {
                if self.finished {
                    debug!("execute invalidated, cascading to finish");
                }
                self.executed = false;
                self.finished = false;
            }
            (Stage::Finish, true) => {
                debug_assert!(self.executed, "finish done before execute");
                self.finished = true;
            }
            (Stage::Finish, false) => {
                self.finished = false;
            }
        }
    }

    pub fn set_prepared(&mut self, done: bool) {
        self.set(Stage::Prepare, done);
    }

    pub fn set_executed(&mut self, done: bool) {
        self.set(Stage::Execute, done);
    }

    pub fn set_finished(&mut self, done: bool) {
        self.set(Stage::Finish, done);
    }

    /// Clear everything, back to `Dirty`.
    pub fn reset(&mut self) {
        self.set(Stage::Prepare, false);
    }

    /// The earliest stage still pending before `stage` can be considered
    /// satisfied, in execution order. None when `stage` is already done.
    pub fn next_pending(&self, stage: Stage) -> Option<Stage> {
        if !self.prepared {
            return Some(Stage::Prepare);
        }
        if stage == Stage::Prepare {
            return None;
        }
        if !self.executed {
            return Some(Stage::Execute);
        }
        if stage == Stage::Execute {
            return None;
        }
        if !self.finished {
            return Some(Stage::Finish);
        }
        None
    }

    pub fn phase(&self) -> Phase {
        match (self.prepared, self.executed, self.finished) {
            (true, true, true) => Phase::Finished,
            (true, true, false) => Phase::Executed,
            (true, false, _) => Phase::Prepared,
            (false, _, _) => Phase::Dirty,
        }
    }

    /// Invariant check, used by tests and debug assertions.
    pub fn is_consistent(&self) -> bool {
        (self.prepared || (!self.executed && !self.finished))
            && (self.executed || !self.finished)
    }
}
