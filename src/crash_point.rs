//! Crash point injection for durability testing
//!
//! A crash point is enabled through the `WSREP_CRASH_POINT` environment
//! variable. When the named point is reached the process terminates via
//! `std::process::abort()`: no cleanup, no unwinding.
//!
//! ```bash
//! WSREP_CRASH_POINT=sr_after_fragment_append ./wsrep-core ...
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("WSREP_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `WSREP_CRASH_POINT` equals the given name.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Streaming fragments
    pub const SR_AFTER_FRAGMENT_APPEND: &str = "sr_after_fragment_append";
    pub const SR_AFTER_FRAGMENT_CERTIFY: &str = "sr_after_fragment_certify";
    pub const SR_AFTER_SEQNO_UPDATE: &str = "sr_after_seqno_update";

    // Commit
    pub const COMMIT_AFTER_CERTIFY: &str = "commit_after_certify";
    pub const COMMIT_BEFORE_ENGINE_COMMIT: &str = "commit_before_engine_commit";
    pub const COMMIT_AFTER_ENGINE_COMMIT: &str = "commit_after_engine_commit";

    // Fragment store
    pub const STORE_BEFORE_FSYNC: &str = "sr_store_before_fsync";
    pub const STORE_BEFORE_COMPACT_RENAME: &str = "sr_store_before_compact_rename";

    // Recovery
    pub const RECOVERY_AFTER_ORPHAN_PURGE: &str = "sr_recovery_after_orphan_purge";
    pub const RECOVERY_AFTER_TRX_APPLY: &str = "sr_recovery_after_trx_apply";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            SR_AFTER_FRAGMENT_APPEND,
            SR_AFTER_FRAGMENT_CERTIFY,
            SR_AFTER_SEQNO_UPDATE,
            COMMIT_AFTER_CERTIFY,
            COMMIT_BEFORE_ENGINE_COMMIT,
            COMMIT_AFTER_ENGINE_COMMIT,
            STORE_BEFORE_FSYNC,
            STORE_BEFORE_COMPACT_RENAME,
            RECOVERY_AFTER_ORPHAN_PURGE,
            RECOVERY_AFTER_TRX_APPLY,
        ]
    }
}
