use super::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const CADENCE: Duration = Duration::from_secs(5);

/// Instants of `id`'s progress events, stopping at `limit` events or the terminal event
async fn progress_instants(
    mut rx: broadcast::Receiver<Event>,
    id: crate::types::JobId,
    limit: usize,
) -> (Vec<Instant>, Option<Event>) {
    let mut instants = Vec::new();
    while instants.len() < limit {
        let event = tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("job went quiet")
            .unwrap();
        if event.job_id() != Some(id) {
            continue;
        }
        match event {
            Event::Progress { .. } => instants.push(Instant::now()),
            e if e.is_terminal() => return (instants, Some(e)),
            _ => {}
        }
    }
    (instants, None)
}

fn assert_steady(instants: &[Instant]) {
    assert!(instants.len() >= 2, "too few progress events: {}", instants.len());
    for pair in instants.windows(2) {
        assert_eq!(pair[1] - pair[0], CADENCE, "progress gap drifted");
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_status_channel_does_not_slow_polling_or_cancel() {
    let engine = Arc::new(FakeEngine::new());
    for n in 0..5 {
        engine.plan(&magnet(n), TransferPlan::never_completing());
    }
    let channel = Arc::new(RecordingChannel::new());
    channel.slow_status(Duration::from_secs(10));
    let (orchestrator, _temp) =
        create_test_orchestrator(engine.clone(), channel.clone(), None).await;
    let watched_events = orchestrator.subscribe();
    let mut events = orchestrator.subscribe();

    let watched = orchestrator
        .start_job(request(magnet(0), Destination::DirectReturn))
        .await
        .unwrap();
    for n in 1..5 {
        orchestrator
            .start_job(request(magnet(n), Destination::DirectReturn))
            .await
            .unwrap();
    }

    // 21 polls span 100 seconds at a 5 second cadence
    let (instants, ended) = progress_instants(watched_events, watched, 21).await;
    assert!(ended.is_none());
    assert_eq!(instants.len(), 21);
    assert_eq!(instants[20] - instants[0], Duration::from_secs(100));
    assert_steady(&instants);

    let requested = Instant::now();
    orchestrator.cancel(watched).await.unwrap();
    let event = wait_for_terminal(&mut events, watched).await;

    assert!(matches!(event, Event::Cancelled { .. }), "{event:?}");
    assert!(requested.elapsed() < Duration::from_secs(1));
    assert_eq!(orchestrator.jobs().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_leaves_other_transfer_untouched() {
    let engine = Arc::new(FakeEngine::new());
    engine.plan(
        &magnet(1),
        TransferPlan::completing_after(1)
            .named("broken.iso")
            .metadata_after(2),
    );
    engine.plan(&magnet(2), TransferPlan::completing_after(12).named("healthy.iso"));
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_artifacts();
    let storage = Arc::new(FakeStorage::new());
    let (orchestrator, _temp) =
        create_test_orchestrator(engine, channel.clone(), Some(storage.clone())).await;
    let healthy_events = orchestrator.subscribe();
    let mut events = orchestrator.subscribe();

    let healthy = orchestrator
        .start_job(request(magnet(2), Destination::RemoteUpload))
        .await
        .unwrap();
    let collector = tokio::spawn(progress_instants(healthy_events, healthy, usize::MAX));
    let broken = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await
        .unwrap();

    let failed = wait_for_terminal(&mut events, broken).await;
    assert!(matches!(failed, Event::Failed { .. }), "{failed:?}");
    let job = orchestrator.job(healthy).await.unwrap();
    assert_eq!(job.state, JobState::Transferring);
    assert!(!job.cancel_requested);
    assert!(job.progress.unwrap().percent < 100);

    let (instants, ended) = collector.await.unwrap();
    match ended {
        Some(Event::Completed {
            reference: DeliveryReference::Url(url),
            ..
        }) => assert_eq!(url, "https://storage.test/healthy.iso"),
        other => panic!("expected upload completion, got {other:?}"),
    }
    assert_eq!(instants.len(), 12);
    assert_steady(&instants);
    assert_eq!(storage.uploads(), vec!["healthy.iso"]);
    let records = orchestrator.errors().drain_all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, Some(broken));
}

#[tokio::test(start_paused = true)]
async fn test_progress_cadence_holds_while_other_jobs_block_or_stop() {
    let engine = Arc::new(FakeEngine::new());
    engine.plan(&magnet(1), TransferPlan::completing_after(1).named("held.iso"));
    engine.plan(&magnet(2), TransferPlan::completing_after(12).named("steady.iso"));
    engine.plan(&magnet(3), TransferPlan::never_completing());
    let channel = Arc::new(RecordingChannel::new());
    channel.hold_artifacts();
    let (orchestrator, _temp) = create_test_orchestrator(
        engine,
        channel.clone(),
        Some(Arc::new(FakeStorage::new())),
    )
    .await;
    let steady_events = orchestrator.subscribe();
    let mut events = orchestrator.subscribe();

    let steady = orchestrator
        .start_job(request(magnet(2), Destination::RemoteUpload))
        .await
        .unwrap();
    let collector = tokio::spawn(progress_instants(steady_events, steady, usize::MAX));
    let held = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await
        .unwrap();
    let stopped = orchestrator
        .start_job(request(magnet(3), Destination::DirectReturn))
        .await
        .unwrap();

    channel.artifact_started().await;
    assert_eq!(
        orchestrator.job(held).await.unwrap().state,
        JobState::Delivering
    );
    tokio::time::sleep(Duration::from_secs(12)).await;
    orchestrator.cancel(stopped).await.unwrap();
    let cancelled = wait_for_terminal(&mut events, stopped).await;
    assert!(matches!(cancelled, Event::Cancelled { .. }));

    let (instants, ended) = collector.await.unwrap();
    assert!(matches!(ended, Some(Event::Completed { .. })), "{ended:?}");
    assert_eq!(instants.len(), 12);
    assert_steady(&instants);

    // the held delivery was waiting the whole time
    assert_eq!(
        orchestrator.job(held).await.unwrap().state,
        JobState::Delivering
    );
    channel.release_artifacts();
    let delivered = wait_for_terminal(&mut events, held).await;
    assert!(matches!(delivered, Event::Completed { .. }), "{delivered:?}");
}
