//! Fault-injection scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: All nodes healthy, result must equal the serial oracle
    Baseline,

    /// DST-002: One node answers after the call deadline
    NodeTimeout,

    /// DST-003: One node's replies arrive garbled
    ProtocolViolation,

    /// DST-004: A node joins and another leaves between configure and simulate
    Churn,

    /// DST-005: A partitioned node heals and is admitted at the next run
    Rejoin,

    /// DST-006: Every compute node is partitioned away
    TotalOutage,

    /// DST-007: The operator cancels mid-run
    Cancel,

    /// DST-008: A one-hour user token stops working after the hour
    TokenExpiry,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::NodeTimeout,
            ScenarioId::ProtocolViolation,
            ScenarioId::Churn,
            ScenarioId::Rejoin,
            ScenarioId::TotalOutage,
            ScenarioId::Cancel,
            ScenarioId::TokenExpiry,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::NodeTimeout => "node_timeout",
            ScenarioId::ProtocolViolation => "protocol_violation",
            ScenarioId::Churn => "churn",
            ScenarioId::Rejoin => "rejoin",
            ScenarioId::TotalOutage => "total_outage",
            ScenarioId::Cancel => "cancel",
            ScenarioId::TokenExpiry => "token_expiry",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Healthy cluster, distributed result equals serial integration",
            ScenarioId::NodeTimeout => "One node exceeds the call deadline, run degrades and completes",
            ScenarioId::ProtocolViolation => "One node replies with garbage, its range is dropped",
            ScenarioId::Churn => "Register and unregister between runs, repartition at boundary",
            ScenarioId::Rejoin => "Partitioned node heals and rejoins through admission",
            ScenarioId::TotalOutage => "All compute nodes unreachable, run fails with state intact",
            ScenarioId::Cancel => "Cancellation lands at the next step boundary",
            ScenarioId::TokenExpiry => "User token valid for one hour, rejected after 1h01m",
        }
    }

    /// Returns true if the scenario injects faults into compute nodes.
    pub fn is_faulty(&self) -> bool {
        matches!(
            self,
            ScenarioId::NodeTimeout
                | ScenarioId::ProtocolViolation
                | ScenarioId::Rejoin
                | ScenarioId::TotalOutage
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "dst-001" => Ok(ScenarioId::Baseline),
            "node_timeout" | "nodetimeout" | "timeout" | "dst-002" => Ok(ScenarioId::NodeTimeout),
            "protocol_violation" | "protocolviolation" | "dst-003" => Ok(ScenarioId::ProtocolViolation),
            "churn" | "dst-004" => Ok(ScenarioId::Churn),
            "rejoin" | "dst-005" => Ok(ScenarioId::Rejoin),
            "total_outage" | "totaloutage" | "outage" | "dst-006" => Ok(ScenarioId::TotalOutage),
            "cancel" | "dst-007" => Ok(ScenarioId::Cancel),
            "token_expiry" | "tokenexpiry" | "dst-008" => Ok(ScenarioId::TokenExpiry),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
