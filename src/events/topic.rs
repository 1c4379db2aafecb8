//! # Named pub/sub topics.
//!
//! [`Topic`] enumerates the fixed topics published by the runtime plus one
//! templated per-entity topic (`supervisor:<id>`). There is no actor per
//! entity: the dynamic id rides inside the variant and the single bus fans
//! out to everyone, so subscribers filter by topic string.
//!
//! ## Wire names
//! ```text
//! DashboardUpdated  → "dashboard:updated"
//! SalesFeed         → "sales:feed"
//! Celebrations      → "celebrations:new"
//! SystemStatus      → "system:status"
//! ReturnsNew        → "returns:new"
//! Devolution        → "dashboard:devolucao"
//! Goals             → "dashboard:goals"
//! Supervisor(id)    → "supervisor:<id>"
//! ```

use std::fmt;

/// A pub/sub topic: fixed, or templated with an entity id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Full dashboard payload replaced.
    DashboardUpdated,
    /// Individual sale notifications.
    SalesFeed,
    /// Detected achievement celebrations.
    Celebrations,
    /// Pipeline status transitions (loading/ok/error).
    SystemStatus,
    /// Newly appeared return records.
    ReturnsNew,
    /// Devolution value strictly increased between cycles.
    Devolution,
    /// Real goal-achievement notifications.
    Goals,
    /// Per-entity refresh feed for one monitored supervisor.
    Supervisor(String),
}

impl Topic {
    /// Renders the topic's wire name.
    pub fn render(&self) -> String {
        match self {
            Topic::Supervisor(id) => format!("supervisor:{id}"),
            fixed => fixed.fixed_name().to_string(),
        }
    }

    /// Wire name for the fixed topics; `"supervisor"` for the templated one
    /// (use [`Topic::render`] when the id matters).
    pub fn fixed_name(&self) -> &'static str {
        match self {
            Topic::DashboardUpdated => "dashboard:updated",
            Topic::SalesFeed => "sales:feed",
            Topic::Celebrations => "celebrations:new",
            Topic::SystemStatus => "system:status",
            Topic::ReturnsNew => "returns:new",
            Topic::Devolution => "dashboard:devolucao",
            Topic::Goals => "dashboard:goals",
            Topic::Supervisor(_) => "supervisor",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Supervisor(id) => write!(f, "supervisor:{id}"),
            fixed => f.write_str(fixed.fixed_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(Topic::DashboardUpdated.render(), "dashboard:updated");
        assert_eq!(Topic::Devolution.render(), "dashboard:devolucao");
        assert_eq!(Topic::Goals.render(), "dashboard:goals");
        assert_eq!(Topic::Supervisor("42".into()).render(), "supervisor:42");
    }
}
