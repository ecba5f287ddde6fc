use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use expensa_core::anomaly::DetectorSettings;
use expensa_core::approvals::{StepDecision, Verdict};
use expensa_core::collaborators::{
    ExpenseStore, InMemoryUserDirectory, StaticPolicyProvider,
};
use expensa_core::domain::anomaly::AnomalyType;
use expensa_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expensa_core::domain::policy::{CompanyPolicy, QuorumRule, ThresholdRule};
use expensa_core::domain::user::{CompanyId, DirectoryUser, Role, UserId};
use expensa_core::errors::ApplicationError;
use expensa_core::notifications::{InMemoryNotificationChannel, NotificationKind};
use expensa_core::workflow::ExpenseWorkflow;
use expensa_db::{connect_with_settings, migrations, SqlExpenseRepository};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).single().expect("valid timestamp")
}

fn user(id: &str, role: Role, manager: Option<&str>) -> DirectoryUser {
    DirectoryUser {
        id: UserId(id.to_string()),
        company_id: CompanyId("acme".to_string()),
        display_name: id.to_string(),
        role,
        active: true,
        manager_id: manager.map(|id| UserId(id.to_string())),
    }
}

fn policy() -> CompanyPolicy {
    let mut policy = CompanyPolicy::new(CompanyId("acme".to_string()));
    policy.threshold_rules = vec![ThresholdRule {
        threshold: Decimal::new(500, 0),
        required_roles: vec![Role::Finance],
        quorum: QuorumRule::Any,
        percentage: None,
    }];
    policy
}

fn draft(id: &str, amount: Decimal, incurred_at: DateTime<Utc>) -> Expense {
    Expense::draft(
        ExpenseId(id.to_string()),
        CompanyId("acme".to_string()),
        UserId("emp-1".to_string()),
        amount,
        "Lodging",
        "Hotel Adlon",
        incurred_at,
        incurred_at,
    )
}

async fn workflow() -> (SqlExpenseRepository, InMemoryNotificationChannel, ExpenseWorkflow) {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let repository = SqlExpenseRepository::new(pool);
    let channel = InMemoryNotificationChannel::default();
    let workflow = ExpenseWorkflow::new(
        Arc::new(repository.clone()),
        Arc::new(repository.clone()),
        Arc::new(StaticPolicyProvider::new(vec![policy()])),
        Arc::new(InMemoryUserDirectory::new(vec![
            user("emp-1", Role::Employee, Some("mgr-1")),
            user("mgr-1", Role::Manager, None),
            user("fin-1", Role::Finance, None),
            user("fin-2", Role::Finance, None),
            user("adm-1", Role::Admin, None),
        ])),
        Arc::new(channel.clone()),
        DetectorSettings::default(),
    );
    (repository, channel, workflow)
}

#[tokio::test]
async fn any_quorum_finance_group_settles_on_first_approval() {
    let (repository, channel, workflow) = workflow().await;
    let id = ExpenseId("EXP-1".to_string());
    repository.save(&draft("EXP-1", Decimal::new(800, 0), now() - Duration::days(1)), 0).await.expect("seed");

    let submitted = workflow.submit(&id, now(), "req-1").await.expect("submit");
    assert_eq!(submitted.expense.approval_flow.steps.len(), 3);
    assert_eq!(submitted.expense.approval_flow.quorum_groups.len(), 1);

    for (approver, sequence) in [("mgr-1", 0), ("fin-2", 2)] {
        workflow
            .decide(
                &id,
                StepDecision {
                    approver_id: UserId(approver.to_string()),
                    sequence: Some(sequence),
                    verdict: Verdict::Approve,
                    comments: None,
                    decided_at: now() + Duration::hours(1),
                },
                "req-2",
            )
            .await
            .expect("decision");
    }

    let stored = repository.load(&id).await.expect("load");
    assert_eq!(stored.status, ExpenseStatus::Approved);
    assert_eq!(stored.version, 4);
    workflow.drain_notifications().await;
    assert_eq!(channel.kinds().last(), Some(&NotificationKind::ExpenseApproved));
}

#[tokio::test]
async fn prior_submissions_feed_duplicate_detection() {
    let (repository, _channel, workflow) = workflow().await;
    let incurred_at = now() - Duration::days(1);
    let mut earlier = draft("EXP-0", Decimal::new(800, 0), incurred_at - Duration::hours(3));
    earlier.status = ExpenseStatus::Approved;
    earlier.submitted_at = Some(incurred_at);
    repository.save(&earlier, 0).await.expect("seed history");
    repository.save(&draft("EXP-1", Decimal::new(800, 0), incurred_at), 0).await.expect("seed");

    let report =
        workflow.submit(&ExpenseId("EXP-1".to_string()), now(), "req-1").await.expect("submit");

    assert!(report
        .expense
        .anomalies
        .iter()
        .any(|finding| finding.anomaly_type == AnomalyType::Duplicate));
    let last = report.expense.approval_flow.steps.last().expect("steps");
    assert_eq!(last.approver_id.0, "adm-1");
}

#[tokio::test]
async fn submitting_twice_is_refused_without_touching_the_row() {
    let (repository, _channel, workflow) = workflow().await;
    let id = ExpenseId("EXP-1".to_string());
    repository.save(&draft("EXP-1", Decimal::new(800, 0), now() - Duration::days(1)), 0).await.expect("seed");
    workflow.submit(&id, now(), "req-1").await.expect("submit");

    let again = workflow.submit(&id, now(), "req-2").await;

    assert!(matches!(again, Err(ApplicationError::Domain(_))));
    assert_eq!(repository.load(&id).await.map(|expense| expense.version), Ok(2));
}
