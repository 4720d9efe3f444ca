mod common;

use common::*;
use mailora_outreach::services::ingest_service::{EnqueueOptions, IngestService, LeadRow};

fn rows(n: usize) -> Vec<LeadRow> {
    (0..n)
        .map(|i| LeadRow {
            email: format!("lead{i}@prospect.io"),
            subject: None,
            message: format!("<p>Hello {i}</p>"),
        })
        .collect()
}

fn options(track_opens: bool) -> EnqueueOptions {
    EnqueueOptions {
        track_opens,
        tracking_base_url: "https://t.example.com".into(),
        send_interval_minutes: 10,
    }
}

#[tokio::test]
async fn batch_is_staggered_by_account_count() {
    let (pool, store, accounts) = stores().await;
    add_account(&accounts, "a@sender.com", 10).await;
    add_account(&accounts, "b@sender.com", 10).await;
    let ingest = IngestService::new(store.clone(), accounts);

    let campaign = ingest.create_campaign(Some("Q2"), noon()).await.unwrap();
    let report = ingest.enqueue_batch(campaign.id, &rows(5), &options(true), noon()).await.unwrap();
    assert_eq!(report.queued, 5);
    assert!(report.rejected.is_empty());

    let offsets: Vec<i64> = sqlx::query_scalar("SELECT scheduled_at FROM emails ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|at: i64| (at - noon().timestamp()) / 60)
        .collect();
    assert_eq!(offsets, vec![0, 0, 10, 10, 20]);

    let (uid, body): (String, String) = sqlx::query_as("SELECT uid, message FROM emails ORDER BY id LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(body.starts_with("<p>Hello 0</p>"));
    assert!(body.ends_with(&format!(
        r#"<img src="https://t.example.com/pixel.gif?uid={uid}" width="1" height="1">"#
    )));
}

#[tokio::test]
async fn no_accounts_staggers_every_row() {
    let (pool, store, accounts) = stores().await;
    let ingest = IngestService::new(store, accounts);
    let campaign = ingest.create_campaign(None, noon()).await.unwrap();
    assert_eq!(campaign.name, "Campaign 2024-05-01 12:00");

    ingest.enqueue_batch(campaign.id, &rows(3), &options(false), noon()).await.unwrap();
    let offsets: Vec<i64> = sqlx::query_scalar("SELECT scheduled_at FROM emails ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|at: i64| (at - noon().timestamp()) / 60)
        .collect();
    assert_eq!(offsets, vec![0, 10, 20]);

    let bodies: Vec<String> = sqlx::query_scalar("SELECT message FROM emails")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(bodies.iter().all(|b| !b.contains("pixel.gif")));
}

#[tokio::test]
async fn account_update_keeps_usage() {
    let (pool, store, accounts) = stores().await;
    let ingest = IngestService::new(store, accounts.clone());
    ingest.upsert_account(&new_account("a@sender.com", 10)).await.unwrap();
    set_usage(&pool, "a@sender.com", 4, "2024-05-01").await;

    let mut changed = new_account("a@sender.com", 25);
    changed.smtp_pass = "rotated".into();
    let account = ingest.upsert_account(&changed).await.unwrap();

    assert_eq!(account.daily_limit, 25);
    assert_eq!(account.sent_today, 4);
    assert_eq!(account.smtp_pass, "rotated");
    assert_eq!(accounts.count().await.unwrap(), 1);
}

#[tokio::test]
async fn invalid_account_is_rejected() {
    let (_pool, store, accounts) = stores().await;
    let ingest = IngestService::new(store, accounts);
    assert!(ingest.upsert_account(&new_account("not-an-address", 10)).await.is_err());
}
