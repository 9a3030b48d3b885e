use jobsync_core::models::{
    ImportErrorEntry, ImportType, NewImportRun, ProcessOutcome, RunStatus, TriggeredBy,
};
use jobsync_core::traits::{RunFilter, RunStore};
use jobsync_db::RunRepository;

use crate::common::setup_test_db;

fn new_run(feed_url: &str) -> NewImportRun {
    NewImportRun {
        feed_url: feed_url.to_string(),
        triggered_by: TriggeredBy::Manual,
        import_type: ImportType::Full,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn create_and_get_run() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let run = repo
        .create(new_run("https://jobs.example.com/feed"))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::InProgress);
    assert_eq!(run.total_fetched, 0);
    assert!(run.errors.is_empty());

    let fetched = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, run.id);
    assert_eq!(fetched.feed_url, "https://jobs.example.com/feed");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn counters_accumulate_and_errors_append() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let run = repo
        .create(new_run("https://jobs.example.com/feed"))
        .await
        .unwrap();
    repo.set_total_fetched(run.id, 3).await.unwrap();
    repo.increment_counters(run.id, ProcessOutcome::New)
        .await
        .unwrap();
    repo.increment_counters(run.id, ProcessOutcome::Updated)
        .await
        .unwrap();
    repo.append_error(run.id, ImportErrorEntry::new("title is required"))
        .await
        .unwrap();

    let run = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(run.total_fetched, 3);
    assert_eq!(run.new_count, 1);
    assert_eq!(run.updated_count, 1);
    assert_eq!(run.total_imported, 2);
    assert_eq!(run.failed_count, 1);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].reason, "title is required");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn complete_transitions_exactly_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let run = repo
        .create(new_run("https://jobs.example.com/feed"))
        .await
        .unwrap();

    assert!(repo.complete(run.id).await.unwrap());
    assert!(!repo.complete(run.id).await.unwrap());

    let run = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.end_time.is_some());
    assert!(run.duration_ms.is_some());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn terminal_run_rejects_counter_mutations() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let run = repo
        .create(new_run("https://jobs.example.com/feed"))
        .await
        .unwrap();
    repo.complete(run.id).await.unwrap();

    repo.increment_counters(run.id, ProcessOutcome::New)
        .await
        .unwrap();
    repo.append_error(run.id, ImportErrorEntry::new("late"))
        .await
        .unwrap();

    let run = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(run.total_imported, 0);
    assert_eq!(run.failed_count, 0);
    assert!(run.errors.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn mark_failed_stamps_end_time_and_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let run = repo
        .create(new_run("https://bad.example.com/feed"))
        .await
        .unwrap();
    repo.mark_failed(run.id, ImportErrorEntry::new("Request timed out after 30 seconds"))
        .await
        .unwrap();

    let run = repo.get(run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.end_time.is_some());
    assert_eq!(run.errors.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn list_filters_by_status_and_feed() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let a = repo.create(new_run("https://a.example.com/feed")).await.unwrap();
    repo.complete(a.id).await.unwrap();
    repo.create(new_run("https://b.example.com/feed")).await.unwrap();

    let (completed, total) = repo
        .list(&RunFilter {
            status: Some(RunStatus::Completed),
            ..RunFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, a.id);

    let (by_feed, total) = repo
        .list(&RunFilter {
            feed_contains: Some("b.example.com".into()),
            ..RunFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(by_feed[0].feed_url, "https://b.example.com/feed");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn list_paginates_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    for i in 0..5 {
        repo.create(new_run(&format!("https://feed{i}.example.com")))
            .await
            .unwrap();
    }

    let (page, total) = repo
        .list(&RunFilter {
            page: 2,
            per_page: 2,
            ..RunFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert!(page[0].start_time >= page[1].start_time);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn aggregate_stats_sum_counters() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let a = repo.create(new_run("https://a.example.com/feed")).await.unwrap();
    repo.increment_counters(a.id, ProcessOutcome::New).await.unwrap();
    repo.increment_counters(a.id, ProcessOutcome::New).await.unwrap();
    repo.complete(a.id).await.unwrap();

    let b = repo.create(new_run("https://b.example.com/feed")).await.unwrap();
    repo.mark_failed(b.id, ImportErrorEntry::new("dead feed"))
        .await
        .unwrap();

    let stats = repo.aggregate_stats().await.unwrap();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.completed_runs, 1);
    assert_eq!(stats.failed_runs, 1);
    assert_eq!(stats.total_new, 2);
    assert_eq!(stats.total_imported, 2);
}
