use serde::{Deserialize, Serialize};

/// Why the orchestrator process exited, mapped to the fixed exit-code table consumed by the
/// surrounding tooling.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Success,
    Generic,
    Lint,
    Type,
    Test,
    Coverage,
    Build,
    Dep,
    Config,
    Sim,
    ScenarioMissing,
    SchemaInvalid,
    PolicyViolation,
    ComplianceFail,
    AnchorDrift,
    MarginInsufficient,
    LimitPriceTrigger,
    ExperimentalGateFail,
    MaturityInsufficient,
    NightSessionError,
    ReportCancelExceed,
}

impl ExitReason {
    pub fn code(&self) -> i32 {
        match self {
            ExitReason::Success => 0,
            ExitReason::Generic => 1,
            ExitReason::Lint => 2,
            ExitReason::Type => 3,
            ExitReason::Test => 4,
            ExitReason::Coverage => 5,
            ExitReason::Build => 6,
            ExitReason::Dep => 7,
            ExitReason::Config => 8,
            ExitReason::Sim => 9,
            ExitReason::ScenarioMissing => 10,
            ExitReason::SchemaInvalid => 11,
            ExitReason::PolicyViolation => 12,
            ExitReason::ComplianceFail => 13,
            ExitReason::AnchorDrift => 14,
            ExitReason::MarginInsufficient => 15,
            ExitReason::LimitPriceTrigger => 16,
            ExitReason::ExperimentalGateFail => 17,
            ExitReason::MaturityInsufficient => 18,
            ExitReason::NightSessionError => 19,
            ExitReason::ReportCancelExceed => 20,
        }
    }
}
