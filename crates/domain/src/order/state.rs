//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Shipped ──► Delivered
///    │            │             │
///    └────────────┴─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order is being assembled, items can be added/removed.
    #[default]
    Pending,

    /// Order has been checked out and awaits shipment.
    Processing,

    /// Order has left the warehouse.
    Shipped,

    /// Order reached the customer (terminal state).
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Processing | Shipped, Cancelled)
        )
    }

    /// Returns true if items can be modified in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a shipment can be dispatched for this status.
    ///
    /// Pending orders are moved through Processing on the way.
    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 5] = [Pending, Processing, Shipped, Delivered, Cancelled];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), Pending);
    }

    #[test]
    fn test_forward_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
    }

    #[test]
    fn test_no_skipping_or_regression() {
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Shipped.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_cancel_allowed_before_delivery_only() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for from in [Delivered, Cancelled] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_can_ship() {
        assert!(Pending.can_ship());
        assert!(Processing.can_ship());
        assert!(!Shipped.can_ship());
        assert!(!Delivered.can_ship());
        assert!(!Cancelled.can_ship());
    }

    #[test]
    fn test_serialization_uses_upper_case_names() {
        let json = serde_json::to_string(&Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Processing);
    }
}
