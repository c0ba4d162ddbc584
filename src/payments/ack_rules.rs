//! Success predicates for gateway acknowledgments
//!
//! The gateway reports a captured payment in several shapes depending on the API
//! version and the card network. Rules are evaluated in order; the first match wins
//! and its name is recorded in the `ACK_OK` action.

use crate::payments::gateway::numeric_field;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRule {
    /// `params.respCode == "00"`
    ResponseCode,
    /// `actionCode == 0`
    ActionCode,
    /// `ErrorCode == "0"` or `ErrorCode == 0`
    ErrorCode,
    /// `OrderStatus == 2` (deposited)
    OrderStatus,
}

impl AckRule {
    pub const ORDERED: [AckRule; 4] = [
        AckRule::ResponseCode,
        AckRule::ActionCode,
        AckRule::ErrorCode,
        AckRule::OrderStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AckRule::ResponseCode => "params.respCode",
            AckRule::ActionCode => "actionCode",
            AckRule::ErrorCode => "ErrorCode",
            AckRule::OrderStatus => "OrderStatus",
        }
    }

    pub fn matches(&self, payload: &JsonValue) -> bool {
        match self {
            AckRule::ResponseCode => payload
                .get("params")
                .and_then(|p| p.get("respCode"))
                .and_then(|v| v.as_str())
                == Some("00"),
            AckRule::ActionCode => {
                payload.get("actionCode").and_then(|v| v.as_i64()) == Some(0)
            }
            AckRule::ErrorCode => numeric_field(payload, "ErrorCode") == Some(0),
            AckRule::OrderStatus => {
                payload.get("OrderStatus").and_then(|v| v.as_i64()) == Some(2)
            }
        }
    }
}

/// Return the first rule the payload satisfies, if any.
pub fn evaluate(payload: &JsonValue) -> Option<AckRule> {
    AckRule::ORDERED.into_iter().find(|rule| rule.matches(payload))
}
