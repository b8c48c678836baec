//! 申报状态机的端到端测试（假门户 + 假外部服务）

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use annual_returns_filer::config::Environment;
use annual_returns_filer::error::ErrorKind;
use annual_returns_filer::models::{ProgressEntry, WorkflowState};
use annual_returns_filer::services::PaymentStatus;
use annual_returns_filer::workflow::portal_steps::synthetic_reference;

use support::*;

fn states(entries: &[ProgressEntry]) -> Vec<WorkflowState> {
    entries.iter().map(|e| e.state).collect()
}

fn assert_ordered(entries: &[ProgressEntry]) {
    for pair in entries.windows(2) {
        assert!(pair[0].state <= pair[1].state, "状态倒退: {} -> {}", pair[0].state, pair[1].state);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

fn step_entry<'a>(entries: &'a [ProgressEntry], step: &str) -> Option<&'a ProgressEntry> {
    entries
        .iter()
        .find(|e| e.metadata.get("step").and_then(|v| v.as_str()) == Some(step))
}

#[tokio::test]
async fn test_happy_path_reaches_completed() {
    let harness = Harness::new(FakePortal::annual_returns());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.final_state, WorkflowState::Completed);
    assert_eq!(result.filing_reference.as_deref(), Some("AR-2024-000123"));
    assert!(!result.reference_synthetic);
    assert_eq!(result.submission_date, Some(fixed_now()));

    assert_ordered(&entries);
    let seen = states(&entries);
    for state in [
        WorkflowState::Pending,
        WorkflowState::Verification,
        WorkflowState::Preparation,
        WorkflowState::Filing,
        WorkflowState::Payment,
        WorkflowState::Submission,
        WorkflowState::Confirmation,
        WorkflowState::Completed,
    ] {
        assert!(seen.contains(&state), "缺少 {} 记录", state);
    }
    assert_eq!(seen.iter().filter(|s| **s == WorkflowState::Completed).count(), 1);
    assert!(!seen.contains(&WorkflowState::Failed));

    assert_eq!(harness.portal.value_of("company-number").as_deref(), Some("2021/123456/07"));
    assert_eq!(harness.portal.value_of("filing-type").as_deref(), Some("annual_returns"));
    assert_eq!(harness.portal.value_of("year-end").as_deref(), Some("2024-02-28"));
    assert_eq!(harness.portal.value_of("email").as_deref(), Some("finance@acme.co.za"));
    assert!(harness.portal.is_closed());
    assert_eq!(harness.sessions.opened.load(Ordering::SeqCst), 1);
    assert_eq!(harness.payments.calls.load(Ordering::SeqCst), 1);

    assert!(!result.screenshots.is_empty());
    assert!(harness.snapshots.labels().contains(&"click-submit-after".to_string()));

    let status = harness.status.states();
    assert_eq!(status.first(), Some(&WorkflowState::Pending));
    assert_eq!(status.last(), Some(&WorkflowState::Completed));
    assert_eq!(harness.status.final_result(), Some(result));
}

#[tokio::test]
async fn test_invalid_company_number_fails_preflight() {
    let harness = Harness::new(FakePortal::annual_returns());
    let mut request = acme_request();
    request.company_registration_number = "invalid".to_string();

    let (result, entries) = harness.flow().run_filing(&request).await;

    assert!(!result.success);
    assert_eq!(result.final_state, WorkflowState::Failed);
    assert_eq!(result.failed_state, Some(WorkflowState::Pending));
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));
    assert!(result.error_message.as_deref().unwrap_or_default().contains("格式"));

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, WorkflowState::Pending);
    assert_eq!(harness.lookup.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.sessions.opened.load(Ordering::SeqCst), 0);
    assert!(harness.portal.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_company_fails_verification() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    harness.lookup = Arc::new(FakeLookup::missing());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.failed_state, Some(WorkflowState::Verification));
    assert_eq!(result.error_kind, Some(ErrorKind::LookupFailed));
    assert!(!states(&entries).contains(&WorkflowState::Preparation));
    assert_eq!(harness.lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.sessions.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_confirmation_is_unrecoverable() {
    let portal = FakePortal::annual_returns().on_click("submit", Vec::new());
    let harness = Harness::new(portal);

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.failed_state, Some(WorkflowState::Submission));
    assert_eq!(result.error_kind, Some(ErrorKind::UnrecoverableUiState));
    assert_eq!(entries.last().map(|e| e.state), Some(WorkflowState::Submission));

    let confirmation = step_entry(&entries, "await-confirmation").unwrap();
    assert_eq!(confirmation.metadata["attempts"], 3);
    assert_eq!(confirmation.metadata["error_kind"], "timeout");
    assert!(harness.portal.is_closed());
}

#[tokio::test]
async fn test_missing_reference_is_synthesized_deterministically() {
    let portal = FakePortal::annual_returns()
        .on_click("submit", vec![Effect::Show(confirmation_banner())])
        .page_text("Thank you for filing with us.");
    let harness = Harness::new(portal);
    let flow = harness.flow();

    let (first, entries) = flow.run_filing(&acme_request()).await;
    let (second, _) = flow.run_filing(&acme_request()).await;

    let expected = synthetic_reference("202112345607", fixed_now().timestamp());
    assert!(first.success);
    assert!(first.reference_synthetic);
    assert_eq!(first.filing_reference.as_deref(), Some(expected.as_str()));
    assert_eq!(first.filing_reference, second.filing_reference);

    let extract = step_entry(&entries, "extract-reference").unwrap();
    assert!(extract.flag("reference_synthetic"));
    let completed = entries.last().unwrap();
    assert_eq!(completed.state, WorkflowState::Completed);
    assert!(completed.flag("reference_synthetic"));
}

#[tokio::test]
async fn test_slow_reference_read_falls_back_to_synthetic() {
    let mut harness = Harness::new(FakePortal::annual_returns().slow_reads(Duration::from_secs(30)));
    harness.config.step_timeout_ms = 400;

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert!(result.reference_synthetic);
    let expected = synthetic_reference("202112345607", fixed_now().timestamp());
    assert_eq!(result.filing_reference.as_deref(), Some(expected.as_str()));
    let extract = step_entry(&entries, "extract-reference").unwrap();
    assert!(extract.metadata.get("error_kind").is_none());
    assert_eq!(entries.last().unwrap().state, WorkflowState::Completed);
}

#[tokio::test]
async fn test_reference_falls_back_to_page_text() {
    let portal = FakePortal::annual_returns()
        .on_click("submit", vec![Effect::Show(confirmation_banner())])
        .page_text("Submission received. Reference REF-884512 issued.");
    let harness = Harness::new(portal);

    let (result, _) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success);
    assert!(!result.reference_synthetic);
    assert_eq!(result.filing_reference.as_deref(), Some("REF-884512"));
}

#[tokio::test]
async fn test_captcha_solved_on_second_attempt() {
    let mut harness = Harness::new(FakePortal::with_captcha());
    let solver = Arc::new(FakeSolver::answering(&["WRONG", CAPTCHA_ANSWER]));
    harness.solver = Some(solver.clone());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
    let captcha = step_entry(&entries, "captcha").unwrap();
    assert_eq!(captcha.metadata["attempts"], 2);
    assert_eq!(captcha.metadata["challenge"], "verified");
    assert_eq!(harness.portal.value_of("captcha-input"), None);
}

#[tokio::test]
async fn test_captcha_attempts_are_capped() {
    let mut harness = Harness::new(FakePortal::with_captcha());
    let solver = Arc::new(FakeSolver::answering(&["WRONG"]));
    harness.solver = Some(solver.clone());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.failed_state, Some(WorkflowState::Submission));
    assert_eq!(result.error_kind, Some(ErrorKind::UnrecoverableUiState));
    assert_eq!(solver.calls.load(Ordering::SeqCst), 3);
    let captcha = step_entry(&entries, "captcha").unwrap();
    assert_eq!(captcha.metadata["error_kind"], "challenge_rejected");
}

#[tokio::test]
async fn test_captcha_without_solver_fails() {
    let harness = Harness::new(FakePortal::with_captcha());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ExternalServiceError));
    let captcha = step_entry(&entries, "captcha").unwrap();
    assert_eq!(captcha.metadata["attempts"], 1);
}

#[tokio::test]
async fn test_payment_timeout_is_not_retried() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    harness.payments = Arc::new(FakePayments::new(PaymentStatus::TimedOut));

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.failed_state, Some(WorkflowState::Payment));
    assert_eq!(result.error_kind, Some(ErrorKind::ExternalServiceTimeout));
    assert_eq!(harness.payments.calls.load(Ordering::SeqCst), 1);
    assert!(!states(&entries).contains(&WorkflowState::Submission));
    assert_eq!(harness.portal.calls_starting_with("click submit"), 0);
    assert!(harness.portal.is_closed());
}

#[tokio::test]
async fn test_declined_payment() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    harness.payments = Arc::new(FakePayments::new(PaymentStatus::Declined("insufficient funds".into())));

    let (result, _) = harness.flow().run_filing(&acme_request()).await;

    assert_eq!(result.error_kind, Some(ErrorKind::PaymentDeclined));
    assert!(result.error_message.unwrap().contains("insufficient funds"));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new(FakePortal::annual_returns());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (result, entries) = harness
        .flow()
        .run_filing_with_cancel(&acme_request(), cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(result.failed_state, Some(WorkflowState::Pending));
    assert_eq!(entries.len(), 1);
    assert_eq!(harness.lookup.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_during_payment_lets_payment_finish() {
    let cancel = CancellationToken::new();
    let mut harness = Harness::new(FakePortal::annual_returns());
    harness.payments = Arc::new(FakePayments::cancelling(cancel.clone()));

    let (result, entries) = harness
        .flow()
        .run_filing_with_cancel(&acme_request(), cancel)
        .await;

    let payment = step_entry(&entries, "await-payment").unwrap();
    assert!(payment.metadata.get("error").is_none());
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(result.failed_state, Some(WorkflowState::Submission));
    assert_eq!(harness.portal.calls_starting_with("click submit"), 0);
    assert!(harness.portal.is_closed());
}

#[tokio::test]
async fn test_production_refuses_login_bypass() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    harness.config.environment = Environment::Production;

    let (result, _) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.failed_state, Some(WorkflowState::Filing));
    assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    assert_eq!(harness.portal.calls_starting_with("navigate"), 0);
    assert!(harness.portal.is_closed());
}

#[tokio::test]
async fn test_credential_login() {
    let portal = FakePortal::annual_returns()
        .element(
            FakeElement::new("username", "input")
                .matching("input[name=\"username\"]")
                .attr("name", "username"),
        )
        .element(
            FakeElement::new("password", "input")
                .matching("input[name=\"password\"]")
                .attr("type", "password"),
        )
        .element(
            FakeElement::new("login", "button")
                .matching("button[type=\"submit\"]")
                .text("Login"),
        )
        .on_click(
            "login",
            vec![
                Effect::Navigate("https://portal.test/dashboard".to_string()),
                Effect::Hide("login".to_string()),
            ],
        );
    let mut harness = Harness::new(portal);
    harness.config.environment = Environment::Production;
    harness.config.portal_username = Some("filer".to_string());
    harness.config.portal_password = Some("s3cret".to_string());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(harness.portal.value_of("username").as_deref(), Some("filer"));
    let login = step_entry(&entries, "authenticate").unwrap();
    assert_eq!(login.metadata["login_mode"], "credentials");
    assert_eq!(login.metadata["match"], "structural");
}

#[tokio::test]
async fn test_login_without_dashboard_is_rejected() {
    let portal = FakePortal::annual_returns()
        .element(FakeElement::new("username", "input").matching("input[name=\"username\"]"))
        .element(FakeElement::new("password", "input").matching("input[name=\"password\"]"))
        .element(
            FakeElement::new("login", "button")
                .matching("button[type=\"submit\"]")
                .text("Login"),
        );
    let mut harness = Harness::new(portal);
    harness.config.portal_username = Some("filer".to_string());
    harness.config.portal_password = Some("wrong".to_string());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert_eq!(result.failed_state, Some(WorkflowState::Filing));
    assert_eq!(result.error_kind, Some(ErrorKind::UnrecoverableUiState));
    let login = step_entry(&entries, "authenticate").unwrap();
    assert_eq!(login.metadata["error_kind"], "action_rejected");
    assert_eq!(harness.portal.calls_starting_with("click login"), 3);
}

#[tokio::test]
async fn test_missing_optional_fields_do_not_fail() {
    let portal = FakePortal::new()
        .element(
            FakeElement::new("annual-returns-link", "a")
                .matching("a[href*=\"annual-returns\"]")
                .text("File Annual Returns"),
        )
        .element(
            FakeElement::new("company-number", "input")
                .matching("input[name=\"company_registration\"]")
                .attr("name", "reg_no"),
        )
        .element(submit_button())
        .on_click(
            "submit",
            vec![
                Effect::Show(confirmation_banner()),
                Effect::Show(reference_label("Reference: AR-2024-000999")),
            ],
        );
    let harness = Harness::new(portal);

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.filing_reference.as_deref(), Some("AR-2024-000999"));
    let select = step_entry(&entries, "select-filing-type").unwrap();
    assert_eq!(select.metadata["intent"], "annual-returns-option");
    let phone = step_entry(&entries, "fill-phone").unwrap();
    assert!(phone.flag("optional"));
    assert_eq!(harness.portal.calls_starting_with("click annual-returns-link"), 1);
    assert_eq!(harness.portal.value_of("company-number").as_deref(), Some("2021/123456/07"));
}

#[tokio::test]
async fn test_notification_failure_keeps_success() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    let notifier = Arc::new(FakeNotifier::broken());
    harness.notifier = Some(notifier.clone());

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    let notify = step_entry(&entries, "notify").unwrap();
    assert_eq!(notify.state, WorkflowState::Confirmation);
    assert!(notify.flag("optional"));
    assert_eq!(entries.last().map(|e| e.state), Some(WorkflowState::Completed));
}

#[tokio::test]
async fn test_notification_sent_once_on_success() {
    let mut harness = Harness::new(FakePortal::annual_returns());
    let notifier = Arc::new(FakeNotifier::working());
    harness.notifier = Some(notifier.clone());

    let (result, _) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_snapshot_failures_are_ignored() {
    let harness = Harness::new(FakePortal::annual_returns().failing_snapshots());

    let (result, _) = harness.flow().run_filing(&acme_request()).await;

    assert!(result.success);
    assert!(result.screenshots.is_empty());
    assert!(harness.snapshots.labels().is_empty());
}

#[tokio::test]
async fn test_page_panic_still_closes_session() {
    let harness = Harness::new(FakePortal::annual_returns().panic_on_click("submit"));

    let (result, entries) = harness.flow().run_filing(&acme_request()).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Browser));
    assert_eq!(result.failed_state, Some(WorkflowState::Submission));
    assert!(harness.portal.is_closed());
    assert!(entries.last().unwrap().description.contains("异常"));
}
