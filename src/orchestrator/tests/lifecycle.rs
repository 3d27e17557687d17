use super::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_jobs_and_rejects_new_ones() {
    let engine = Arc::new(FakeEngine::new());
    engine.plan(&magnet(1), TransferPlan::never_completing());
    let (orchestrator, _temp) =
        create_test_orchestrator(engine.clone(), Arc::new(RecordingChannel::new()), None).await;
    let mut events = orchestrator.subscribe();

    let id = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await
        .unwrap();
    wait_for_event(&mut events, id, |e| matches!(e, Event::Progress { .. })).await;

    orchestrator.shutdown().await.unwrap();

    assert!(!orchestrator.is_accepting());
    assert!(orchestrator.jobs().await.is_empty());
    assert!(!work_dir(&orchestrator, id).exists());
    assert_eq!(engine.removed(), vec!["fake-1"]);
    let result = orchestrator
        .start_job(request(magnet(2), Destination::DirectReturn))
        .await;
    assert!(matches!(result, Err(Error::ShuttingDown)));

    let mut saw_cancelled = false;
    loop {
        match events.recv().await.unwrap() {
            Event::Cancelled { id: cancelled } if cancelled == id => saw_cancelled = true,
            Event::Shutdown => break,
            _ => {}
        }
    }
    assert!(saw_cancelled, "job ends cancelled before the shutdown event");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_delivery_finish() {
    let channel = Arc::new(RecordingChannel::new());
    channel.hold_artifacts();
    let (orchestrator, _temp) =
        create_test_orchestrator(Arc::new(FakeEngine::new()), channel.clone(), None).await;
    let mut events = orchestrator.subscribe();

    let id = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await
        .unwrap();
    channel.artifact_started().await;

    let shutdown = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.shutdown().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    channel.release_artifacts();
    shutdown.await.unwrap().unwrap();

    let event = wait_for_terminal(&mut events, id).await;
    assert!(matches!(event, Event::Completed { .. }), "{event:?}");
    assert_eq!(channel.artifacts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_refused_when_shutdown_closes_registry_first() {
    let engine = Arc::new(FakeEngine::new());
    let (orchestrator, _temp) =
        create_test_orchestrator(engine.clone(), Arc::new(RecordingChannel::new()), None).await;

    // shutdown's stop-all lands after start_job passed its accepting check
    orchestrator.registry.close().await;
    assert!(orchestrator.is_accepting());
    let result = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await;

    assert!(matches!(result, Err(Error::ShuttingDown)));
    assert!(orchestrator.jobs().await.is_empty());
    assert!(engine.added().is_empty(), "no transfer started");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_no_jobs_is_immediate_and_repeatable() {
    let (orchestrator, _temp) = create_test_orchestrator(
        Arc::new(FakeEngine::new()),
        Arc::new(RecordingChannel::new()),
        None,
    )
    .await;
    let started = tokio::time::Instant::now();

    orchestrator.shutdown().await.unwrap();
    orchestrator.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_error_notifier_flushes_delivery_failures_on_shutdown() {
    let channel = Arc::new(RecordingChannel::new());
    channel.fail_artifacts();
    let (orchestrator, _temp) =
        create_test_orchestrator(Arc::new(FakeEngine::new()), channel.clone(), None).await;
    let notifier = orchestrator.start_error_notifier();
    let mut events = orchestrator.subscribe();

    let id = orchestrator
        .start_job(request(magnet(1), Destination::DirectReturn))
        .await
        .unwrap();
    wait_for_terminal(&mut events, id).await;
    orchestrator.shutdown().await.unwrap();
    notifier.await.unwrap();

    let notices = channel.owner_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains(&format!("job {id}: delivery failed")));
    assert!(orchestrator.errors().is_empty());
}

#[tokio::test]
async fn test_remove_stale_artifacts() {
    let (orchestrator, _temp) = create_test_orchestrator(
        Arc::new(FakeEngine::new()),
        Arc::new(RecordingChannel::new()),
        None,
    )
    .await;
    let config = orchestrator.get_config();
    let stale = config.download.download_dir.join("job_41");
    std::fs::create_dir_all(stale.join("nested")).unwrap();
    std::fs::write(stale.join("nested/part.bin"), b"x").unwrap();
    let keep = config.download.download_dir.join("notes.txt");
    std::fs::write(&keep, b"keep").unwrap();
    let descriptor = config.download.descriptor_inbox().join("old.torrent");
    std::fs::write(&descriptor, b"d").unwrap();

    let removed = orchestrator.remove_stale_artifacts().await.unwrap();

    assert_eq!(removed, 2);
    assert!(!stale.exists());
    assert!(!descriptor.exists());
    assert!(keep.exists());
}
