//! Observable replication events
//!
//! Every log line carries exactly one of these. Events are explicit and
//! typed so that log consumers can match on stable names.

use std::fmt;

/// Observable events in the replication layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Replication context created
    ReplicationInit,
    /// Replication context shut down
    ReplicationShutdown,
    /// Configuration loaded
    ConfigLoaded,

    // Certification and commit
    /// Write-set certified and ordered
    CertifyOk,
    /// Write-set failed certification
    CertifyFailed,
    /// Certification interrupted by a BF-abort
    CertifyBfAborted,
    /// Write-set exceeded the configured size or row limit
    WriteSetSizeExceeded,
    /// Transaction reported affected rows but produced no write-set
    WriteSetEmpty,
    /// Provider connection or node failure
    ProviderFailure,
    /// Ordered commit complete
    CommitOrdered,
    /// BF-abort arrived after the commit already happened
    CommitAbortSwallowed,
    /// Rollback event replicated for a streaming transaction
    RollbackReplicated,
    /// Client rollback after BF-abort or certification failure
    ClientRollback,
    /// Autocommit statement scheduled for retry
    AutocommitRetry,

    // Streaming replication
    /// Fragment recorded in the store before certification
    FragmentAppended,
    /// Fragment certified and ordered
    FragmentReplicated,
    /// Fragment replication failed
    FragmentFailed,
    /// Fragments of a transaction removed from the store
    FragmentsRemoved,
    /// Unsafe statement rollback escalated to a full rollback
    StatementRollbackEscalated,

    // Conflict resolution
    /// BF-abort signal accepted
    BfAbort,
    /// BF-abort signal ignored
    BfAbortIgnored,
    /// Two high priority executions conflicted
    BfBfConflict,
    /// Victim handed to the background rollbacker
    RollbackerEnqueued,
    /// Background rollback finished
    RollbackerComplete,
    /// Idle streaming transaction reaped
    ReaperAbort,

    // Replay
    /// Replay started
    ReplayBegin,
    /// Replay succeeded
    ReplayComplete,
    /// Replay failed certification
    ReplayFailed,

    // Appliers
    /// Remote write-set failed to apply
    ApplyError,
    /// Failed write-set dumped to the apply error log
    ApplyErrorDumped,

    // Total order isolation
    /// Isolated execution started
    IsolationBegin,
    /// Isolated execution ended
    IsolationEnd,
    /// Isolated execution could not start
    IsolationFailed,

    // Fragment store
    /// Fragment store opened
    StoreOpened,
    /// Torn trailing record ignored
    StoreTornTail,
    /// Fragment store corruption (FATAL)
    StoreCorruption,
    /// Fragment store log compacted
    StoreCompacted,
    /// Fragment store failed during normal operation
    StoreFailure,

    // Recovery
    /// Fragment recovery started
    RecoveryStart,
    /// Uncertified orphan fragment removed
    RecoveryOrphanRemoved,
    /// Streaming transaction reconstructed and applied
    RecoveryTransactionReplayed,
    /// Fragment recovery complete
    RecoveryComplete,
    /// Fragment recovery failed (FATAL)
    RecoveryFailed,

    // State transfer
    /// Snapshot received from a donor
    SnapshotReceived,
    /// Snapshot donated to a joiner
    SnapshotDonated,

    /// Unrecoverable inconsistency (FATAL)
    FatalInconsistency,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ReplicationInit => "WSREP_INIT",
            Event::ReplicationShutdown => "WSREP_SHUTDOWN",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::CertifyOk => "CERTIFY_OK",
            Event::CertifyFailed => "CERTIFY_FAILED",
            Event::CertifyBfAborted => "CERTIFY_BF_ABORTED",
            Event::WriteSetSizeExceeded => "WRITESET_SIZE_EXCEEDED",
            Event::WriteSetEmpty => "WRITESET_EMPTY",
            Event::ProviderFailure => "PROVIDER_FAILURE",
            Event::CommitOrdered => "COMMIT_ORDERED",
            Event::CommitAbortSwallowed => "COMMIT_ABORT_SWALLOWED",
            Event::RollbackReplicated => "ROLLBACK_REPLICATED",
            Event::ClientRollback => "CLIENT_ROLLBACK",
            Event::AutocommitRetry => "AUTOCOMMIT_RETRY",

            Event::FragmentAppended => "FRAGMENT_APPENDED",
            Event::FragmentReplicated => "FRAGMENT_REPLICATED",
            Event::FragmentFailed => "FRAGMENT_FAILED",
            Event::FragmentsRemoved => "FRAGMENTS_REMOVED",
            Event::StatementRollbackEscalated => "STATEMENT_ROLLBACK_ESCALATED",

            Event::BfAbort => "BF_ABORT",
            Event::BfAbortIgnored => "BF_ABORT_IGNORED",
            Event::BfBfConflict => "BF_BF_CONFLICT",
            Event::RollbackerEnqueued => "ROLLBACKER_ENQUEUED",
            Event::RollbackerComplete => "ROLLBACKER_COMPLETE",
            Event::ReaperAbort => "REAPER_ABORT",

            Event::ReplayBegin => "REPLAY_BEGIN",
            Event::ReplayComplete => "REPLAY_COMPLETE",
            Event::ReplayFailed => "REPLAY_FAILED",

            Event::ApplyError => "APPLY_ERROR",
            Event::ApplyErrorDumped => "APPLY_ERROR_DUMPED",

            Event::IsolationBegin => "TOI_BEGIN",
            Event::IsolationEnd => "TOI_END",
            Event::IsolationFailed => "TOI_FAILED",

            Event::StoreOpened => "SR_STORE_OPENED",
            Event::StoreTornTail => "SR_STORE_TORN_TAIL",
            Event::StoreCorruption => "SR_STORE_CORRUPTION",
            Event::StoreCompacted => "SR_STORE_COMPACTED",
            Event::StoreFailure => "SR_STORE_FAILURE",

            Event::RecoveryStart => "SR_RECOVERY_BEGIN",
            Event::RecoveryOrphanRemoved => "SR_RECOVERY_ORPHAN_REMOVED",
            Event::RecoveryTransactionReplayed => "SR_RECOVERY_TRX_REPLAYED",
            Event::RecoveryComplete => "SR_RECOVERY_COMPLETE",
            Event::RecoveryFailed => "SR_RECOVERY_FAILED",

            Event::SnapshotReceived => "SST_RECEIVED",
            Event::SnapshotDonated => "SST_DONATED",

            Event::FatalInconsistency => "FATAL_INCONSISTENCY",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::StoreCorruption | Event::RecoveryFailed | Event::FatalInconsistency
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_unique() {
        let events = [
            Event::ReplicationInit,
            Event::CertifyOk,
            Event::CertifyFailed,
            Event::FragmentReplicated,
            Event::BfAbort,
            Event::BfAbortIgnored,
            Event::ReplayBegin,
            Event::ReplayComplete,
            Event::RecoveryStart,
            Event::RecoveryFailed,
            Event::StoreCorruption,
        ];
        let mut names: Vec<_> = events.iter().map(|e| e.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), events.len());
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::StoreCorruption.is_fatal());
        assert!(Event::RecoveryFailed.is_fatal());
        assert!(Event::FatalInconsistency.is_fatal());
        assert!(!Event::CertifyFailed.is_fatal());
        assert!(!Event::ApplyError.is_fatal());
    }
}
