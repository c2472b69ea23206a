//! Local replication state

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tidemark_core::{OpTime, ReplicationOracle};

/// Replica role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationRole {
    /// Accepts writes and assigns their timestamps
    #[default]
    Primary,
    /// Replays operations at the timestamps it is given
    Secondary,
    /// Accepts writes but keeps no replicated log
    Standalone,
}

#[derive(Debug)]
struct State {
    role: ReplicationRole,
    term: i64,
    last_applied: OpTime,
}

/// [`ReplicationOracle`] backed by settable in-process state
#[derive(Debug)]
pub struct LocalReplicationState {
    state: RwLock<State>,
}

impl LocalReplicationState {
    /// State with `role` in `term`, nothing applied yet
    pub fn new(role: ReplicationRole, term: i64) -> Self {
        Self {
            state: RwLock::new(State {
                role,
                term,
                last_applied: OpTime::null(),
            }),
        }
    }

    /// Current role
    pub fn role(&self) -> ReplicationRole {
        self.state.read().role
    }

    /// Change role
    pub fn set_role(&self, role: ReplicationRole) {
        self.state.write().role = role;
    }

    /// Change term
    pub fn set_term(&self, term: i64) {
        self.state.write().term = term;
    }

    /// Record the last applied optime
    pub fn set_my_last_applied_optime(&self, optime: OpTime) {
        self.state.write().last_applied = optime;
    }
}

impl Default for LocalReplicationState {
    fn default() -> Self {
        Self::new(ReplicationRole::Primary, 1)
    }
}

impl ReplicationOracle for LocalReplicationState {
    fn can_accept_writes(&self) -> bool {
        self.state.read().role != ReplicationRole::Secondary
    }

    fn my_last_applied_optime(&self) -> OpTime {
        self.state.read().last_applied
    }

    fn current_term(&self) -> i64 {
        self.state.read().term
    }

    fn replication_enabled(&self) -> bool {
        self.state.read().role != ReplicationRole::Standalone
    }
}
