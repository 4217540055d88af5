//! Report DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{RunOutcome, RunReport};
use crate::error::FailureKind;

/// Lightweight per-service line of a run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub service: String,
    pub success: bool,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub tags: Vec<String>,
}

/// Run summary for listing and CI annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub head: String,
    pub outcome: RunOutcome,
    pub built: usize,
    pub failed: usize,
    pub services: Vec<ServiceSummary>,
}

impl From<&RunReport> for RunSummary {
    fn from(report: &RunReport) -> Self {
        let services: Vec<ServiceSummary> = report
            .results
            .iter()
            .map(|r| ServiceSummary {
                service: r.service.name.clone(),
                success: r.success,
                failure: r.failure,
                message: r.error.clone(),
                tags: r.tags.iter().cloned().collect(),
            })
            .collect();

        Self {
            run_id: report.run_id,
            head: report.head.to_string(),
            outcome: report.outcome,
            built: services.iter().filter(|s| s.success).count(),
            failed: services.iter().filter(|s| !s.success).count(),
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::build::BuildResult;
    use crate::domain::change::Revision;
    use crate::domain::matrix::BuildMatrix;
    use crate::domain::service::ServiceDescriptor;
    use crate::error::PipelineError;

    #[test]
    fn test_summary_conversion() {
        let frontend = ServiceDescriptor::from_path("src/frontend").unwrap();
        let cart = ServiceDescriptor::from_path("src/cartservice").unwrap();
        let results = vec![
            BuildResult::succeeded(frontend.clone(), ["acme/frontend:latest"]),
            BuildResult::failed(
                cart.clone(),
                &PipelineError::BuildFailed {
                    service: "cartservice".to_string(),
                    cause: "exit status 1".to_string(),
                },
            ),
        ];
        let report = RunReport::completed(
            Uuid::new_v4(),
            Revision::new("aaaaaaaa").unwrap(),
            Revision::new("bbbbbbbb").unwrap(),
            BuildMatrix::from(vec![frontend, cart]),
            results,
            chrono::Utc::now(),
        );

        let summary = RunSummary::from(&report);
        assert_eq!(summary.outcome, RunOutcome::PartialFailure);
        assert_eq!(summary.built, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.services[1].failure, Some(FailureKind::BuildFailed));
    }
}
