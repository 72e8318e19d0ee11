mod common;

use common::*;
use radar_core::{BatchStatus, Candidate, RequestType, Source};
use radar_pipeline::{Attribution, BatchManifest};
use radar_storage::{OpportunityStore, Pool};

fn five_sources() -> (Vec<Source>, ScriptedStrategy) {
    let mut strategy = ScriptedStrategy::new(Pool::Fetch);
    let mut sources = Vec::new();
    for i in 0..5 {
        let source = Source::page(format!("Board {i}"), format!("https://board{i}.example/"));
        strategy = strategy.page(
            &source.name,
            &format!("https://board{i}.example/"),
            &format!("PAGE-{i} listings for board {i}"),
        );
        sources.push(source);
    }
    (sources, strategy)
}

fn batch_reasoner() -> ScriptedReasoner {
    ScriptedReasoner::default()
        .extract(
            "PAGE-1",
            serde_json::json!([candidate_json("Compiler Fellowship", "Frontier Lab", "https://board1.example/f")])
                .to_string(),
        )
        .extract(
            "PAGE-3",
            serde_json::json!({"opportunities": [
                candidate_json("Robotics Residency", "Motion Works", "https://board3.example/r")
            ]})
            .to_string(),
        )
        .score("Compiler Fellowship", score_json("apply", 0.8))
        .score("Robotics Residency", score_json("strong_apply", 0.9))
}

#[tokio::test]
async fn positive_classifications_resume_the_funnel_exactly_once() {
    let (sources, strategy) = five_sources();
    let harness = Harness::plain(sources, batch_reasoner(), strategy).await;

    let job = harness
        .radar
        .submit_batch()
        .await
        .expect("submit")
        .expect("fresh content was collected");

    assert_eq!(job.requests.len(), 5);
    assert!(job.requests.iter().all(|r| r.request_type == RequestType::Classify));
    assert_eq!(job.status, BatchStatus::InProgress);
    assert_eq!(harness.reasoner.calls(), (0, 0, 0), "collection is offline");
    assert_eq!(harness.store.checkpoints().await.len(), 5);

    let uploads = harness.batch_client.uploads();
    assert_eq!(uploads.len(), 1);
    let lines: Vec<serde_json::Value> = uploads[0]
        .lines()
        .map(|l| serde_json::from_str(l).expect("manifest line"))
        .collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["method"], "POST");
    assert_eq!(lines[0]["url"], "/v1/chat/completions");
    assert!(lines[0]["custom_id"].as_str().expect("id").starts_with("classify_0_"));

    let mut output: Vec<String> = job
        .requests
        .iter()
        .map(|request| {
            let answer = if request.content.contains("PAGE-1") || request.content.contains("PAGE-3") {
                positive(0.85)
            } else {
                NOT_AN_OPPORTUNITY.to_string()
            };
            output_line(&request.custom_id, &answer)
        })
        .collect();
    output.push(output_line("classify_99_0", &positive(0.9)));
    output.push("not json".to_string());
    harness
        .batch_client
        .set_remote("completed", Some(output.join("\n")));

    let summaries = harness.radar.process_batches().await.expect("process");
    assert_eq!(summaries.len(), 1);
    let replay = &summaries[0];
    assert_eq!(replay.responses, 6);
    assert_eq!(replay.skipped, 2);
    assert_eq!(replay.positive, 2);
    assert_eq!(replay.opportunities.len(), 2);
    assert_eq!(harness.reasoner.calls(), (0, 2, 2));

    let stored = harness.store.opportunities().await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|o| o.source_id.is_some()));

    let again = harness.radar.process_batches().await.expect("second pass");
    assert!(again.is_empty());
    assert_eq!(harness.batch_client.downloads(), 1);
    assert_eq!(harness.reasoner.calls(), (0, 2, 2));

    let job = harness
        .store
        .get_batch_job(&job.batch_id)
        .await
        .expect("lookup")
        .expect("job");
    assert_eq!(job.status, BatchStatus::Completed);
    assert!(job.processed_at.is_some());
}

#[tokio::test]
async fn expired_job_fails_without_download() {
    let (sources, strategy) = five_sources();
    let harness = Harness::plain(sources, batch_reasoner(), strategy).await;

    let job = harness
        .radar
        .submit_batch()
        .await
        .expect("submit")
        .expect("job");
    harness.batch_client.set_remote("expired", None);

    let summaries = harness.radar.process_batches().await.expect("process");
    assert!(summaries.is_empty());
    assert_eq!(harness.batch_client.downloads(), 0);

    let stored = harness
        .store
        .get_batch_job(&job.batch_id)
        .await
        .expect("lookup")
        .expect("job");
    assert_eq!(stored.status, BatchStatus::Failed);
    assert!(harness.radar.batch_status().await.expect("status").is_empty());
}

#[tokio::test]
async fn in_progress_job_is_left_pending() {
    let (sources, strategy) = five_sources();
    let harness = Harness::plain(sources, batch_reasoner(), strategy).await;
    harness.radar.submit_batch().await.expect("submit").expect("job");

    harness.batch_client.set_remote("finalizing", None);
    assert!(harness.radar.process_batches().await.expect("process").is_empty());

    let pending = harness.radar.batch_status().await.expect("status");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, BatchStatus::InProgress);
    assert_eq!(harness.batch_client.downloads(), 0);
}

#[tokio::test]
async fn unchanged_content_is_not_collected() {
    let (sources, strategy) = five_sources();
    let harness = Harness::plain(sources, batch_reasoner(), strategy).await;
    for i in [0, 2, 4] {
        seen(&harness.store, &format!("PAGE-{i} listings for board {i}")).await;
    }

    let job = harness
        .radar
        .submit_batch()
        .await
        .expect("submit")
        .expect("two fresh pages");
    assert_eq!(job.requests.len(), 2);
    assert!(job.requests.iter().all(|r| r.source_url.is_some()));

    let nothing = harness.radar.submit_batch().await.expect("second submit");
    assert!(nothing.is_none());
    assert_eq!(harness.batch_client.uploads().len(), 1);
}

#[tokio::test]
async fn extract_and_score_responses_replay_through_shared_stages() {
    let harness = Harness::plain(Vec::new(), batch_reasoner(), ScriptedStrategy::new(Pool::Fetch)).await;

    let page = "https://board1.example/";
    let mut manifest = BatchManifest::with_tag(42);
    let extract_id = manifest.push(RequestType::Extract, None, Some(page), "PAGE-1 listings");
    let kernel: Candidate =
        serde_json::from_value(candidate_json("Kernel Hacking Grant", "Open Systems Fund", "https://fund.example/k"))
            .expect("candidate");
    let score_id = manifest
        .push_score(&kernel, &Attribution::new(None, Some(page), ""))
        .expect("score request");
    assert_eq!(extract_id, "extract_0_42");
    assert_eq!(score_id, "score_1_42");

    let job = harness
        .radar
        .batch()
        .submit(manifest, &profile())
        .await
        .expect("submit");

    let extraction = serde_json::json!([
        candidate_json("Compiler Fellowship", "Frontier Lab", "https://board1.example/f"),
        candidate_json("Careers at Frontier Lab", "Frontier Lab", "https://board1.example/"),
    ])
    .to_string();
    let output = [
        output_line(&extract_id, &extraction),
        output_line(&score_id, &score_json("maybe", 0.55)),
    ]
    .join("\n");
    harness.batch_client.set_remote("completed", Some(output));

    let summaries = harness.radar.process_batches().await.expect("process");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].batch_id, job.batch_id);
    assert_eq!(summaries[0].positive, 0);

    let mut titles: Vec<String> = summaries[0]
        .opportunities
        .iter()
        .map(|o| o.candidate.title().to_string())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Compiler Fellowship", "Kernel Hacking Grant"]);

    // The scored candidate arrived pre-scored; only the extracted one was scored live.
    assert_eq!(harness.reasoner.calls(), (0, 0, 1));
}
