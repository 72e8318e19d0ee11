mod common;

use std::sync::atomic::Ordering;

use common::*;
use radar_core::Source;
use radar_storage::Pool;

const QUIET_PAGE: &str = "QUIET-PAGE about us and our mission";

fn digest() -> Source {
    Source::email("Robotics Digest", ["*@news.example"])
}

fn careers() -> Source {
    Source::page("Motion Works Careers", "https://motion.example/careers")
}

fn mailbox() -> ScriptedMailbox {
    ScriptedMailbox::default()
        .message(
            "Robotics Weekly <digest@news.example>",
            "issue-9@news.example",
            "Residencies this week",
            "<p>MAIL-ISSUE Robotics Residency at Motion Works.</p>\
             <p><a href=\"https://motion.example/jobs/4\">Apply</a></p>",
        )
        .message(
            "Deals <promo@shop.example>",
            "sale-1@shop.example",
            "Big sale",
            "<p>MAIL-PROMO everything half off</p>",
        )
}

fn reasoner() -> ScriptedReasoner {
    ScriptedReasoner::default()
        .classify("MAIL-ISSUE", positive(0.9))
        .classify("MAIL-PROMO", positive(0.9))
        .extract(
            "MAIL-ISSUE",
            serde_json::json!([candidate_json(
                "Robotics Residency",
                "Motion Works",
                "https://motion.example/jobs/4"
            )])
            .to_string(),
        )
        .score("Robotics Residency", score_json("strong_apply", 0.9))
}

fn careers_page() -> ScriptedStrategy {
    ScriptedStrategy::new(Pool::Fetch).page(&careers().name, "https://motion.example/careers", QUIET_PAGE)
}

async fn harness(sources: Vec<Source>, mailbox: ScriptedMailbox) -> Harness {
    Harness::with_mailbox(sources, reasoner(), careers_page(), mailbox).await
}

#[tokio::test]
async fn email_sources_run_through_the_same_funnel_as_pages() {
    let (email, page) = (digest(), careers());
    let harness = harness(vec![email.clone(), page.clone()], mailbox()).await;

    let summary = harness.radar.run(false).await.expect("run");

    assert_eq!(summary.total_sources, 2);
    assert_eq!(summary.pages_fetched, 2, "promo sender filtered out");
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.opportunities_found, 1);

    let stored = &summary.opportunities[0];
    assert_eq!(stored.candidate.title(), "Robotics Residency");
    assert_eq!(stored.source_id, Some(email.id));
    assert!(stored.raw_content.starts_with("# Residencies this week\n\nFrom: Robotics Weekly"));

    assert_eq!(harness.reasoner.calls(), (2, 1, 1));
    assert_eq!(harness.checkpoint_error(&email).await, Some(None));
    assert_eq!(harness.checkpoint_error(&page).await, Some(None));
    let mailbox = harness.mailbox.as_ref().expect("mailbox");
    assert_eq!(mailbox.polls.load(Ordering::SeqCst), 1);

    let again = harness.radar.run(false).await.expect("second run");
    assert_eq!(again.unchanged_pages, 2);
    assert_eq!(again.opportunities_found, 0);
    assert_eq!(harness.reasoner.calls(), (2, 1, 1));
    assert_eq!(mailbox.polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn mailbox_failure_is_recorded_on_the_email_source_only() {
    let (email, page) = (digest(), careers());
    let harness = harness(
        vec![email.clone(), page.clone()],
        ScriptedMailbox::default().failing("authentication failed"),
    )
    .await;

    let summary = harness.run().await;

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.pages_fetched, 1);
    let error = harness.checkpoint_error(&email).await.expect("checkpointed");
    assert!(error.expect("error recorded").contains("authentication failed"));
    assert_eq!(harness.checkpoint_error(&page).await, Some(None));
}

#[tokio::test]
async fn email_sources_are_skipped_without_a_mailbox() {
    let (email, page) = (digest(), careers());
    let harness = Harness::plain(vec![email.clone(), page.clone()], reasoner(), careers_page()).await;

    let summary = harness.radar.run(false).await.expect("run");

    assert_eq!(summary.total_sources, 1);
    assert_eq!(harness.checkpoint_error(&email).await, None);
    assert_eq!(harness.checkpoint_error(&page).await, Some(None));
}

#[tokio::test]
async fn email_content_is_collected_for_batch_classification() {
    let harness = harness(vec![digest()], mailbox()).await;

    let job = harness
        .radar
        .submit_batch()
        .await
        .expect("submit")
        .expect("fresh email");

    assert_eq!(job.requests.len(), 1);
    assert_eq!(
        job.requests[0].source_url.as_deref(),
        Some("email:issue-9@news.example")
    );
    assert!(job.requests[0].content.contains("MAIL-ISSUE"));
    assert_eq!(harness.reasoner.calls(), (0, 0, 0));
}
