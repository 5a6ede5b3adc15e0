//! # Delivery Policy
//!
//! Decides whether a message may only be published once a peer playing a
//! given role is in the room. The bus consults it on every send.

use serde_json::Value;
use shared_types::PeerRole;

/// Hook deciding which peer role, if any, a message requires.
pub trait DeliveryPolicy: Send + Sync {
    fn required_peer_role(&self, topic: &str, payload: &Value) -> Option<PeerRole>;
}

/// Never gate on peer presence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeerGating;

impl DeliveryPolicy for NoPeerGating {
    fn required_peer_role(&self, _topic: &str, _payload: &Value) -> Option<PeerRole> {
        None
    }
}

/// Messages flagged as manually triggered must reach a specific role.
///
/// A payload object is "manual" when it carries `"manual": true` or
/// `"source": "manual"`.
#[derive(Debug, Clone)]
pub struct ManualDeliveryPolicy {
    role: PeerRole,
}

impl ManualDeliveryPolicy {
    pub fn new(role: PeerRole) -> Self {
        Self { role }
    }

    pub fn is_manual(payload: &Value) -> bool {
        payload.get("manual").and_then(Value::as_bool) == Some(true)
            || payload.get("source").and_then(Value::as_str) == Some("manual")
    }
}

impl Default for ManualDeliveryPolicy {
    fn default() -> Self {
        Self::new(PeerRole::agent())
    }
}

impl DeliveryPolicy for ManualDeliveryPolicy {
    fn required_peer_role(&self, _topic: &str, payload: &Value) -> Option<PeerRole> {
        Self::is_manual(payload).then(|| self.role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_flag_requires_agent() {
        let policy = ManualDeliveryPolicy::default();
        assert_eq!(
            policy.required_peer_role("t", &json!({"manual": true})),
            Some(PeerRole::agent())
        );
        assert_eq!(
            policy.required_peer_role("t", &json!({"source": "manual"})),
            Some(PeerRole::agent())
        );
    }

    #[test]
    fn test_unflagged_is_ungated() {
        let policy = ManualDeliveryPolicy::default();
        assert_eq!(policy.required_peer_role("t", &json!({"manual": false})), None);
        assert_eq!(policy.required_peer_role("t", &json!("manual")), None);
        assert_eq!(NoPeerGating.required_peer_role("t", &json!({"manual": true})), None);
    }
}
