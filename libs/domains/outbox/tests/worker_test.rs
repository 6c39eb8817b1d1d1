//! End-to-end delivery scenarios against the in-memory stores.

use chrono::{TimeDelta, Utc};
use domain_outbox::providers::Scripted;
use domain_outbox::{
    AuditAction, AuditSink, BatchReport, Clock, DeliveryError, InMemoryAuditSink,
    InMemoryOutboxStore, InMemoryPreferenceStore, InMemoryTemplateStore, ManualClock,
    MissingTemplatePolicy, NewOutboxEntry, OutboxEntry, OutboxProcessor, OutboxStatus,
    OutboxStore, OutboxWorker, PreferenceStore, ProcessorSettings, Reconciler, RecordingProvider,
    RetryPolicy, SystemClock, WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Stack {
    store: InMemoryOutboxStore,
    audit: InMemoryAuditSink,
    prefs: InMemoryPreferenceStore,
    provider: RecordingProvider,
    clock: ManualClock,
    worker: OutboxWorker,
    reconciler: Reconciler,
}

fn stack_with(config: WorkerConfig) -> Stack {
    let store = InMemoryOutboxStore::new();
    let audit = InMemoryAuditSink::new();
    let prefs = InMemoryPreferenceStore::new();
    let provider = RecordingProvider::new();
    let clock = ManualClock::new(Utc::now());

    let processor = Arc::new(OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::new(InMemoryTemplateStore::with_defaults()),
        Arc::new(prefs.clone()),
        Arc::new(audit.clone()),
        Arc::new(provider.clone()),
        Arc::new(clock.clone()),
        RetryPolicy::default(),
        ProcessorSettings::from(&config),
    ));
    let worker = OutboxWorker::new(
        Arc::new(store.clone()),
        processor.clone(),
        Arc::new(clock.clone()),
        &config,
    );
    let reconciler = Reconciler::new(
        Arc::new(store.clone()),
        processor,
        Arc::new(clock.clone()),
        &config,
    );

    Stack {
        store,
        audit,
        prefs,
        provider,
        clock,
        worker,
        reconciler,
    }
}

fn stack() -> Stack {
    stack_with(WorkerConfig {
        send_timeout: Duration::from_millis(100),
        ..WorkerConfig::default()
    })
}

fn invite(to: &str) -> NewOutboxEntry {
    NewOutboxEntry::new(to, "invite", 1)
        .with_name("Ana")
        .with_value("name", "Ana")
        .with_value("hospital_name", "St. Mary's")
        .with_value("invite_url", "https://lms.example.org/i/abc")
}

impl Stack {
    async fn enqueue(&self, entry: NewOutboxEntry) -> OutboxEntry {
        self.store.enqueue(entry, self.clock.now()).await.unwrap()
    }

    async fn reload(&self, entry: &OutboxEntry) -> OutboxEntry {
        self.store.get(entry.id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_first_attempt_success() {
    let s = stack();
    let entry = s.enqueue(invite("nurse@example.org")).await;

    let report = s.worker.run_once().await.unwrap();
    assert_eq!(report.sent, 1);

    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Sent);
    assert_eq!(entry.attempts, 1);
    assert!(entry.sent_at.is_some());
    assert!(entry.provider_message_id.is_some());

    let audit = s.audit.records_for(entry.id).await.unwrap();
    let sent: Vec<_> = audit.iter().filter(|r| r.action == AuditAction::Sent).collect();
    assert_eq!(sent.len(), 1);

    let delivered = s.provider.sent().await;
    assert_eq!(delivered[0].subject, "You're invited to St. Mary's Continuing Education");
    assert!(delivered[0].html.contains("https://lms.example.org/i/abc"));
}

#[tokio::test]
async fn test_four_failures_follow_backoff_then_cancel() {
    let s = stack();
    for _ in 0..4 {
        s.provider
            .push(Scripted::Fail(DeliveryError::transient("503 service unavailable")))
            .await;
    }
    let entry = s.enqueue(invite("nurse@example.org")).await;
    let expected = [60, 300, 1800];

    for (k, delay) in expected.iter().enumerate() {
        let attempt_at = s.clock.now();
        assert_eq!(s.worker.run_once().await.unwrap().retried, 1);

        let current = s.reload(&entry).await;
        assert_eq!(current.status, OutboxStatus::Failed);
        assert_eq!(current.attempts, k as i32 + 1);
        assert_eq!(current.scheduled_at, attempt_at + TimeDelta::seconds(*delay));

        // Not reclaimed before the backoff expires
        s.clock.advance(TimeDelta::seconds(*delay - 1));
        assert_eq!(s.worker.run_once().await.unwrap().claimed, 0);
        s.clock.advance(TimeDelta::seconds(1));
    }

    let cancelled_at = s.reload(&entry).await.scheduled_at;
    assert_eq!(s.worker.run_once().await.unwrap().cancelled, 1);
    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Cancelled);
    assert_eq!(entry.attempts, 4);
    assert_eq!(entry.scheduled_at, cancelled_at);
    assert!(entry.sent_at.is_none());

    // Cancelled entries are never claimed again
    s.clock.advance(TimeDelta::days(30));
    assert_eq!(s.worker.run_once().await.unwrap(), BatchReport::default());
    assert_eq!(s.provider.calls().await, 4);

    let actions: Vec<_> = s
        .audit
        .records_for(entry.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Failed,
            AuditAction::Failed,
            AuditAction::Failed,
            AuditAction::Cancelled
        ]
    );
}

#[tokio::test]
async fn test_batch_of_one_takes_oldest_schedule_first() {
    let s = stack_with(WorkerConfig {
        batch_size: 1,
        ..WorkerConfig::default()
    });
    let now = s.clock.now();
    let later = s
        .enqueue(invite("later@example.org").scheduled_for(now - TimeDelta::minutes(1)))
        .await;
    let earlier = s
        .enqueue(invite("earlier@example.org").scheduled_for(now - TimeDelta::minutes(5)))
        .await;

    s.worker.run_once().await.unwrap();
    assert_eq!(s.reload(&earlier).await.status, OutboxStatus::Sent);
    assert_eq!(s.reload(&later).await.status, OutboxStatus::Pending);
}

#[tokio::test]
async fn test_future_entries_wait_for_their_schedule() {
    let s = stack();
    let entry = s
        .enqueue(invite("nurse@example.org").scheduled_for(s.clock.now() + TimeDelta::hours(1)))
        .await;

    assert_eq!(s.worker.run_once().await.unwrap().claimed, 0);
    s.clock.advance(TimeDelta::hours(1));
    assert_eq!(s.worker.run_once().await.unwrap().sent, 1);
    assert_eq!(s.reload(&entry).await.status, OutboxStatus::Sent);
}

#[tokio::test]
async fn test_opted_out_recipient_is_skipped() {
    let s = stack();
    s.prefs.set_opt_out("nurse@example.org", true).await.unwrap();
    let entry = s.enqueue(invite("NURSE@example.org")).await;

    assert_eq!(s.worker.run_once().await.unwrap().skipped, 1);
    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Skipped);
    assert_eq!(entry.attempts, 0);
    assert!(entry.provider_message_id.is_none());
    assert_eq!(s.provider.calls().await, 0);
}

#[tokio::test]
async fn test_missing_template_is_cancelled_with_cause() {
    let s = stack();
    let entry = s
        .enqueue(NewOutboxEntry::new("nurse@example.org", "invite", 99))
        .await;

    assert_eq!(s.worker.run_once().await.unwrap().cancelled, 1);
    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Cancelled);
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("invite v99"));

    let audit = s.audit.records_for(entry.id).await.unwrap();
    assert_eq!(audit[0].action, AuditAction::Cancelled);
    assert_eq!(audit[0].metadata["cause"], "template_not_found");
}

#[tokio::test]
async fn test_missing_template_retry_policy_uses_backoff() {
    let s = stack_with(WorkerConfig {
        missing_template: MissingTemplatePolicy::Retry,
        ..WorkerConfig::default()
    });
    let entry = s
        .enqueue(NewOutboxEntry::new("nurse@example.org", "no_such_template", 1))
        .await;

    s.worker.run_once().await.unwrap();
    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Failed);
    assert_eq!(entry.scheduled_at, s.clock.now() + TimeDelta::seconds(60));
}

#[tokio::test]
async fn test_provider_timeout_is_retryable() {
    let s = stack();
    s.provider.push(Scripted::Stall(Duration::from_secs(30))).await;
    let entry = s.enqueue(invite("nurse@example.org")).await;

    let report = tokio::time::timeout(Duration::from_secs(5), s.worker.run_once())
        .await
        .expect("send timeout should bound the batch")
        .unwrap();
    assert_eq!(report.retried, 1);

    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Failed);
    assert!(entry.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_panic_in_one_entry_does_not_abort_batch() {
    let s = stack();
    s.provider.push(Scripted::Panic("provider exploded")).await;
    let first = s.enqueue(invite("first@example.org")).await;
    s.clock.advance(TimeDelta::seconds(1));
    let second = s.enqueue(invite("second@example.org")).await;

    let report = s.worker.run_once().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.sent, 1);

    let first = s.reload(&first).await;
    assert_eq!(first.status, OutboxStatus::Failed);
    assert_eq!(first.attempts, 1);
    assert!(first.last_error.unwrap().contains("provider exploded"));
    assert_eq!(s.reload(&second).await.status, OutboxStatus::Sent);
}

#[tokio::test]
async fn test_mark_sent_is_idempotent() {
    let s = stack();
    let entry = s.enqueue(invite("nurse@example.org")).await;
    s.worker.run_once().await.unwrap();
    let sent = s.reload(&entry).await;

    s.clock.advance(TimeDelta::minutes(5));
    let again = s
        .store
        .mark_sent(entry.id, "other-id", sent.attempts + 1, s.clock.now())
        .await
        .unwrap();
    assert!(!again);
    assert_eq!(s.reload(&entry).await, sent);
}

#[tokio::test]
async fn test_status_invariant_for_sent_fields() {
    let s = stack();
    s.provider.push(Scripted::Fail(DeliveryError::permanent("bad mailbox"))).await;
    s.prefs.set_opt_out("skip@example.org", true).await.unwrap();
    s.enqueue(invite("fail@example.org")).await;
    s.enqueue(invite("skip@example.org")).await;
    s.enqueue(invite("ok@example.org")).await;
    s.enqueue(NewOutboxEntry::new("gone@example.org", "retired", 1)).await;

    s.worker.run_once().await.unwrap();

    for entry in s.store.all().await {
        let both = entry.sent_at.is_some() && entry.provider_message_id.is_some();
        assert_eq!(both, entry.status == OutboxStatus::Sent, "{entry:?}");
    }
}

#[tokio::test]
async fn test_reconciler_recovers_crashed_claim() {
    let s = stack();
    let entry = s.enqueue(invite("nurse@example.org")).await;
    // A worker claimed it and died
    assert!(s.store.mark_sending(entry.id, s.clock.now()).await.unwrap());

    s.clock.advance(TimeDelta::minutes(5));
    assert_eq!(s.reconciler.reconcile_once().await.unwrap(), 0);

    s.clock.advance(TimeDelta::minutes(6));
    assert_eq!(s.reconciler.reconcile_once().await.unwrap(), 1);
    let reclaimed = s.reload(&entry).await;
    assert_eq!(reclaimed.status, OutboxStatus::Failed);
    assert_eq!(reclaimed.attempts, 1);

    s.clock.advance(TimeDelta::seconds(60));
    assert_eq!(s.worker.run_once().await.unwrap().sent, 1);
    let entry = s.reload(&entry).await;
    assert_eq!(entry.status, OutboxStatus::Sent);
    assert_eq!(entry.attempts, 2);
}

#[tokio::test]
async fn test_shutdown_during_send_finishes_in_flight_entry() {
    let s = stack_with(WorkerConfig {
        poll_interval: Duration::from_millis(20),
        ..WorkerConfig::default()
    });
    s.provider.push(Scripted::Stall(Duration::from_millis(300))).await;
    let in_flight = s.enqueue(invite("first@example.org")).await;
    let (tx, rx) = watch::channel(false);

    let worker = s.worker;
    let handle = tokio::spawn(async move { worker.run(rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(s.provider.calls().await, 1);
    assert_eq!(s.store.get(in_flight.id).await.unwrap().unwrap().status, OutboxStatus::Sending);
    let waiting = s
        .store
        .enqueue(invite("second@example.org"), s.clock.now())
        .await
        .unwrap();
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();

    let finished = s.store.get(in_flight.id).await.unwrap().unwrap();
    assert_eq!(finished.status, OutboxStatus::Sent);
    assert_eq!(finished.claimed_at, None);
    assert_eq!(
        s.store.get(waiting.id).await.unwrap().unwrap().status,
        OutboxStatus::Pending
    );
    assert_eq!(s.provider.calls().await, 1);
}

#[tokio::test]
async fn test_reconciler_leaves_queued_batch_entries_alone() {
    let config = WorkerConfig {
        batch_size: 5,
        send_timeout: Duration::from_millis(150),
        stale_claim_after: Duration::from_millis(200),
        ..WorkerConfig::default()
    };
    let store = InMemoryOutboxStore::new();
    let audit = InMemoryAuditSink::new();
    let provider = RecordingProvider::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    for _ in 0..3 {
        provider.push(Scripted::Stall(Duration::from_millis(120))).await;
    }
    let mut queued = Vec::new();
    for i in 0..5 {
        queued.push(
            store
                .enqueue(invite(&format!("n{i}@example.org")), clock.now())
                .await
                .unwrap(),
        );
    }

    let processor = Arc::new(OutboxProcessor::new(
        Arc::new(store.clone()),
        Arc::new(InMemoryTemplateStore::with_defaults()),
        Arc::new(InMemoryPreferenceStore::new()),
        Arc::new(audit.clone()),
        Arc::new(provider.clone()),
        clock.clone(),
        RetryPolicy::default(),
        ProcessorSettings::from(&config),
    ));
    let worker = OutboxWorker::new(
        Arc::new(store.clone()),
        processor.clone(),
        clock.clone(),
        &config,
    );
    let reconciler = Reconciler::new(Arc::new(store.clone()), processor, clock, &config);

    // Sweep while the third send is running and the last two are still queued
    let sweep = async {
        tokio::time::sleep(Duration::from_millis(260)).await;
        reconciler.reconcile_once().await.unwrap()
    };
    let (report, reclaimed) = tokio::join!(worker.run_once(), sweep);

    let report = report.unwrap();
    assert_eq!(reclaimed, 0);
    assert_eq!(report.claimed, 5);
    assert_eq!(report.sent, 5);
    assert_eq!(report.superseded, 0);
    assert_eq!(provider.calls().await, 5);
    for entry in &queued {
        let entry = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Sent);
        assert_eq!(entry.attempts, 1);
        let actions: Vec<_> = audit
            .records_for(entry.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Sent]);
    }
}
