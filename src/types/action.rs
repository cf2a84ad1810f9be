//! Pending-action events carried by the custody feed.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ids::{ActionId, AgentId};

/// A pending action decoded from a feed payload.
///
/// Only `id` and `expire_time` drive behaviour; the other fields are kept
/// for logging. Missing fields decode to their defaults, so a payload
/// without `expireTime` is treated as already expired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionInfo {
    pub id: ActionId,

    #[serde(rename = "coreClientID")]
    pub agent_id: AgentId,

    #[serde(rename = "type")]
    pub action_type: String,

    pub status: String,

    /// Creation time, unix seconds.
    pub timestamp: i64,

    /// Expiry, unix seconds.
    #[serde(rename = "expireTime")]
    pub expire_time: i64,
}

impl ActionInfo {
    /// Decodes a raw feed payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// True iff the expiry is strictly after `now` (unix seconds).
    pub fn is_not_expired_at(&self, now: i64) -> bool {
        self.expire_time > now
    }

    /// True iff the action can still be approved at the current wall-clock time.
    pub fn is_not_expired(&self) -> bool {
        self.is_not_expired_at(Utc::now().timestamp())
    }
}
