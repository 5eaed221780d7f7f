//! Domain routing rules.
//!
//! Maps a query name to an upstream pool class using an ordered
//! suffix-match rule list. Routing is pure: same name, same answer.

use serde::Deserialize;

/// The upstream pool class a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    Domestic,
    Foreign,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Domestic => "domestic",
            RouteClass::Foreign => "foreign",
        }
    }
}

/// One ordered routing rule: a domain suffix and the class it selects.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub suffix: String,
    pub action: RouteClass,
}

/// Ordered rule list; first suffix match wins.
pub struct Router {
    rules: Vec<RoutingRule>,
}

impl Router {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Route a query name. Names that match no rule go foreign.
    pub fn route(&self, name: &str) -> RouteClass {
        for rule in &self.rules {
            if name.ends_with(&rule.suffix) {
                return rule.action;
            }
        }
        RouteClass::Foreign
    }
}
