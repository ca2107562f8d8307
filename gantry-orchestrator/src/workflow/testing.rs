//! Scripted activities for driving pipelines in tests

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::domain::activity::{
    ApprovalNotice, BuildRequest, DecisionNotice, DeployRequest, PublishRequest, RollbackReport,
    RollbackRequest, TestRequest,
};
use gantry_core::domain::deployment::DeploymentRecord;
use gantry_core::domain::phase::{Phase, PhaseResult};
use gantry_core::domain::pipeline::Environment;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::activity::{Activities, ActivityError};

/// Image every scripted deploy reports as the release it replaced
pub const PREVIOUS_IMAGE: &str = "registry.local/demo-app:v0.9.0";

/// Every call succeeds unless scripted otherwise
#[derive(Default)]
pub struct ScriptedActivities {
    /// Remaining failing attempts per phase
    failures: Mutex<HashMap<Phase, u32>>,
    failing_tests: Mutex<Option<String>>,
    failing_notifications: bool,
    /// Deploys to this environment always fail
    failing_environment: Option<Environment>,
    calls: Mutex<Vec<Phase>>,
    deploys: Mutex<Vec<DeployRequest>>,
    rollbacks: Mutex<Vec<RollbackRequest>>,
    notices: Mutex<Vec<ApprovalNotice>>,
    decisions: Mutex<Vec<DecisionNotice>>,
}

impl ScriptedActivities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `attempts` calls of a phase
    pub fn failing(self, phase: Phase, attempts: u32) -> Self {
        self.failures.lock().unwrap().insert(phase, attempts);
        self
    }

    pub fn with_failing_tests(self, diagnostic: &str) -> Self {
        *self.failing_tests.lock().unwrap() = Some(diagnostic.to_string());
        self
    }

    pub fn with_failing_notifications(mut self) -> Self {
        self.failing_notifications = true;
        self
    }

    pub fn with_failing_deploys_to(mut self, environment: Environment) -> Self {
        self.failing_environment = Some(environment);
        self
    }

    pub fn calls(&self) -> Vec<Phase> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, phase: Phase) -> usize {
        self.calls().into_iter().filter(|p| *p == phase).count()
    }

    pub fn deploys(&self) -> Vec<DeployRequest> {
        self.deploys.lock().unwrap().clone()
    }

    pub fn rollbacks(&self) -> Vec<RollbackRequest> {
        self.rollbacks.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<ApprovalNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn decisions(&self) -> Vec<DecisionNotice> {
        self.decisions.lock().unwrap().clone()
    }

    fn attempt(&self, phase: Phase) -> Result<(), ActivityError> {
        self.calls.lock().unwrap().push(phase);

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&phase) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ActivityError::Failed(format!("{} unavailable", phase)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Activities for ScriptedActivities {
    async fn build(&self, req: &BuildRequest) -> Result<PhaseResult, ActivityError> {
        self.attempt(Phase::Build)?;
        Ok(PhaseResult::succeeded(
            Phase::Build,
            Some(format!("sha256:{}-{}", req.image_name, req.tag)),
            5,
        ))
    }

    async fn test(&self, _req: &TestRequest) -> Result<PhaseResult, ActivityError> {
        self.attempt(Phase::Test)?;
        let failing = self.failing_tests.lock().unwrap().clone();
        match failing {
            Some(diagnostic) => Ok(PhaseResult::failed(Phase::Test, diagnostic, 5)),
            None => Ok(PhaseResult::succeeded(Phase::Test, None, 5)),
        }
    }

    async fn publish(&self, req: &PublishRequest) -> Result<PhaseResult, ActivityError> {
        self.attempt(Phase::Publish)?;
        Ok(PhaseResult::succeeded(
            Phase::Publish,
            Some(format!("sha256:{}", req.tag)),
            5,
        ))
    }

    async fn deploy(&self, req: &DeployRequest) -> Result<DeploymentRecord, ActivityError> {
        self.attempt(Phase::Deploy)?;
        if self.failing_environment == Some(req.environment) {
            return Err(ActivityError::Failed(format!(
                "{} cluster unreachable",
                req.environment
            )));
        }
        self.deploys.lock().unwrap().push(req.clone());
        Ok(DeploymentRecord {
            environment: req.environment,
            endpoint: format!("http://{}.demo-app.local:8080", req.environment),
            success: true,
            deployed_at: Utc::now(),
            previous_image: Some(PREVIOUS_IMAGE.to_string()),
        })
    }

    async fn rollback(&self, req: &RollbackRequest) -> Result<RollbackReport, ActivityError> {
        self.attempt(Phase::Rollback)?;
        self.rollbacks.lock().unwrap().push(req.clone());
        Ok(RollbackReport {
            success: true,
            message: "previous revision restored".to_string(),
        })
    }

    async fn notify_approval_request(&self, notice: &ApprovalNotice) -> Result<(), ActivityError> {
        if self.failing_notifications {
            return Err(ActivityError::Failed("chat webhook unreachable".to_string()));
        }
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }

    async fn notify_approval_decision(&self, notice: &DecisionNotice) -> Result<(), ActivityError> {
        if self.failing_notifications {
            return Err(ActivityError::Failed("chat webhook unreachable".to_string()));
        }
        self.decisions.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
