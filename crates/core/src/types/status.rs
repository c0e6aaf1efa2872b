//! Status enums for session events and derived analytics.

use serde::{Deserialize, Serialize};

/// Action recorded on a session event.
///
/// Maps to the session store's `conversion_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    /// The user looked around without committing.
    #[serde(alias = "browsed")]
    Browse,
    /// The user left with an unfinished cart.
    #[serde(alias = "abandoned")]
    Abandon,
    /// The user completed a purchase.
    #[serde(alias = "converted")]
    Convert,
}

impl SessionAction {
    /// Whether this action ends a funnel trajectory.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Abandon | Self::Convert)
    }
}

impl std::fmt::Display for SessionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browse => write!(f, "browse"),
            Self::Abandon => write!(f, "abandon"),
            Self::Convert => write!(f, "convert"),
        }
    }
}

impl std::str::FromStr for SessionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browse" | "browsed" => Ok(Self::Browse),
            "abandon" | "abandoned" => Ok(Self::Abandon),
            "convert" | "converted" => Ok(Self::Convert),
            _ => Err(format!("invalid session action: {s}")),
        }
    }
}

/// Terminal state of a session trajectory in the conversion funnel.
///
/// `Browsed` -> {`Abandoned` | `Converted`}; all three are valid outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelState {
    Browsed,
    Abandoned,
    Converted,
}

impl FunnelState {
    /// All states, in funnel order.
    pub const ALL: [Self; 3] = [Self::Browsed, Self::Abandoned, Self::Converted];

    /// The state reached after observing `action`.
    #[must_use]
    pub const fn after(action: SessionAction) -> Self {
        match action {
            SessionAction::Browse => Self::Browsed,
            SessionAction::Abandon => Self::Abandoned,
            SessionAction::Convert => Self::Converted,
        }
    }
}

impl std::fmt::Display for FunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browsed => write!(f, "browsed"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::Converted => write!(f, "converted"),
        }
    }
}

/// Customer segment by order count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    /// Fewer than 3 orders.
    Low,
    /// 3 to 6 orders.
    Medium,
    /// 7 or more orders.
    High,
}

impl UserSegment {
    /// Classify a customer by their number of orders.
    #[must_use]
    pub const fn from_order_count(orders: u64) -> Self {
        match orders {
            0..3 => Self::Low,
            3..7 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl std::fmt::Display for UserSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Customer value segment attached to a CLV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClvSegment {
    NoSpend,
    LowValue,
    MediumValue,
    HighValue,
}

impl std::fmt::Display for ClvSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSpend => write!(f, "no_spend"),
            Self::LowValue => write!(f, "low_value"),
            Self::MediumValue => write!(f, "medium_value"),
            Self::HighValue => write!(f, "high_value"),
        }
    }
}
