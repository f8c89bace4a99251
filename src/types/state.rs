//! Per-transaction state enums
//!
//! `ConflictState` is the protocol state machine. Only the edges listed in
//! `ConflictState::can_transition_to` are legal; every mutation goes
//! through `TrxState::transition` which rejects anything else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Conflict state of a replicated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictState {
    NoConflict,
    /// BF-aborted while executing, rollback pending
    MustAbort,
    /// Local rollback in progress
    Aborting,
    /// Local rollback complete
    Aborted,
    /// BF-aborted after certification, replay pending
    MustReplay,
    /// Replay in progress
    Replaying,
    /// Autocommit statement died with a deadlock and may be retried
    RetryAutocommit,
    /// Certification failed, caller must roll back
    CertFailure,
}

impl ConflictState {
    /// Legal edges of the conflict state machine.
    ///
    /// - NoConflict -> MustAbort | CertFailure | MustReplay
    /// - MustAbort -> Aborting -> Aborted
    /// - MustReplay -> Replaying -> NoConflict
    /// - Replaying -> Aborted when the replay lost certification
    pub fn can_transition_to(self, next: ConflictState) -> bool {
        use ConflictState::*;
        matches!(
            (self, next),
            (NoConflict, MustAbort)
                | (NoConflict, CertFailure)
                | (NoConflict, MustReplay)
                | (MustAbort, Aborting)
                | (Aborting, Aborted)
                | (MustReplay, Replaying)
                | (Replaying, NoConflict)
                | (Replaying, Aborted)
        )
    }

    /// States a finished transaction may be left in. Anything else means
    /// rollback or replay is still owed.
    pub fn is_settled(self) -> bool {
        !matches!(
            self,
            ConflictState::Aborting | ConflictState::MustReplay | ConflictState::Replaying
        )
    }

    /// States in which the transaction is already on its way out.
    pub fn is_aborting(self) -> bool {
        matches!(
            self,
            ConflictState::MustAbort | ConflictState::Aborting | ConflictState::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConflictState::NoConflict => "NO_CONFLICT",
            ConflictState::MustAbort => "MUST_ABORT",
            ConflictState::Aborting => "ABORTING",
            ConflictState::Aborted => "ABORTED",
            ConflictState::MustReplay => "MUST_REPLAY",
            ConflictState::Replaying => "REPLAYING",
            ConflictState::RetryAutocommit => "RETRY_AUTOCOMMIT",
            ConflictState::CertFailure => "CERT_FAILURE",
        }
    }

    pub fn all() -> [ConflictState; 8] {
        use ConflictState::*;
        [
            NoConflict,
            MustAbort,
            Aborting,
            Aborted,
            MustReplay,
            Replaying,
            RetryAutocommit,
            CertFailure,
        ]
    }
}

impl fmt::Display for ConflictState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which replication role the executing thread currently plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientExecMode {
    /// Normal local execution
    LocalState,
    /// Applying a remote write-set or replaying
    ReplRecv,
    /// Total order isolated execution
    TotalOrder,
    /// Certified, waiting for final commit
    LocalCommit,
    /// Rolling back locally
    LocalRollback,
}

impl ClientExecMode {
    /// Brute-force (high priority) modes are never BF-abort victims.
    pub fn is_high_priority(self) -> bool {
        matches!(self, ClientExecMode::ReplRecv | ClientExecMode::TotalOrder)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientExecMode::LocalState => "LOCAL_STATE",
            ClientExecMode::ReplRecv => "REPL_RECV",
            ClientExecMode::TotalOrder => "TOTAL_ORDER",
            ClientExecMode::LocalCommit => "LOCAL_COMMIT",
            ClientExecMode::LocalRollback => "LOCAL_ROLLBACK",
        }
    }
}

impl fmt::Display for ClientExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the statement lifecycle the owning session is.
///
/// The BF-abort resolver uses this to tell the abortable windows apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    /// Between statements
    Idle,
    /// Executing a statement
    Exec,
    /// Inside certification or waiting to enter commit order
    Committing,
    /// Inside the commit order critical section
    OrderedCommit,
}

impl QueryState {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryState::Idle => "IDLE",
            QueryState::Exec => "EXEC",
            QueryState::Committing => "COMMITTING",
            QueryState::OrderedCommit => "ORDERED_COMMIT",
        }
    }
}
