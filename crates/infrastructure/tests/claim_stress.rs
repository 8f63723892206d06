use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use media_jobs_core::{config::DatabaseConfig, JobKind, JobState, JobStore};
use media_jobs_infrastructure::{connect, SqliteJobStore};

/// N个并发认领者争抢M个任务时，每个任务恰好被一个认领者拿到
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_are_exclusive() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("claim_stress.db");
    let config = DatabaseConfig {
        url: format!("sqlite:{}", db_path.display()),
        max_connections: 8,
        min_connections: 1,
    };

    let pool = connect(&config).await.unwrap();
    SqliteJobStore::migrate(&pool).await.unwrap();
    let store = Arc::new(SqliteJobStore::new(pool, 3));

    const JOB_COUNT: usize = 50;
    const CLAIMERS: usize = 8;

    let mut job_ids = HashSet::new();
    for i in 0..JOB_COUNT {
        let job = store
            .enqueue(JobKind::RefreshMetadata, json!({"id": i}), Utc::now())
            .await
            .unwrap();
        job_ids.insert(job.id);
    }

    let mut handles = Vec::new();
    for _ in 0..CLAIMERS {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match store.claim_next(&[JobKind::RefreshMetadata], Utc::now()).await {
                    Ok(Some(job)) => claimed.push(job.id),
                    Ok(None) => break,
                    Err(e) => panic!("认领失败: {e}"),
                }
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            total += 1;
            assert!(seen.insert(id), "任务 {id} 被认领了不止一次");
        }
    }

    assert_eq!(total, JOB_COUNT);
    assert_eq!(seen, job_ids);

    for id in job_ids {
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempts, 1);
    }
}
