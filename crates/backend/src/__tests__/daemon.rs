//! Main loop E2E tests: a whole run from store open to store close.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;
  use tokio::task::JoinHandle;
  use tokio_util::sync::CancellationToken;

  use crate::{
    Daemon, DaemonError, RunSummary, RuntimeConfig, ShutdownTrigger,
    __tests__::helpers::{DispatchTestContext, RecordingProcessor, wait_for},
    domain::JobList,
    ipc::{Client, IpcError, Message, Reply, codes},
  };

  fn start(
    config: RuntimeConfig,
    processor: RecordingProcessor,
  ) -> (JoinHandle<Result<RunSummary, DaemonError>>, CancellationToken) {
    let interrupt = CancellationToken::new();
    let daemon = Daemon::new(config, Arc::new(processor));
    let join = tokio::spawn(daemon.run_until(interrupt.clone()));
    (join, interrupt)
  }

  /// The control socket is bound last before the pool starts, so once it
  /// exists the scheduler is serving.
  async fn wait_until_running(ctx: &DispatchTestContext) {
    let control = ctx.control_socket();
    let up = wait_for(Duration::from_secs(5), || {
      let control = control.clone();
      async move { control.exists() }
    })
    .await;
    assert!(up, "daemon should bind its control socket");
  }

  async fn finish(join: JoinHandle<Result<RunSummary, DaemonError>>) -> RunSummary {
    tokio::time::timeout(Duration::from_secs(10), join)
      .await
      .expect("daemon should stop")
      .expect("daemon task")
      .expect("daemon run")
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_done_ends_run_cleanly() {
    let ctx = DispatchTestContext::new();
    let processor = RecordingProcessor::new();
    let (join, _interrupt) = start(ctx.runtime_config(2), processor.clone());
    wait_until_running(&ctx).await;

    let mut producer = ctx.connect().await;
    producer.enqueue("report.txt").await.expect("enqueue");
    let processed = wait_for(Duration::from_secs(5), || {
      let processor = processor.clone();
      async move { processor.seen().len() == 1 }
    })
    .await;
    assert!(processed, "a worker should process report.txt");
    drop(producer);

    let mut control = Client::connect(&ctx.control_socket()).await.expect("connect control");
    control.done(Some("finished")).await.expect("done");

    let summary = finish(join).await;
    assert_eq!(
      summary.trigger,
      ShutdownTrigger::Done {
        status: Some("finished".to_string())
      }
    );
    let queue = summary.queue.expect("final stats");
    assert_eq!(queue.total, 1);
    assert_eq!(queue.pending, 0);
    assert_eq!(summary.jobs, 1);
    assert_eq!(summary.worker_timeouts, 0);

    assert!(!ctx.scheduler_socket().exists());
    assert!(!ctx.control_socket().exists());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_exit_on_drain_stops_after_last_job() {
    let ctx = DispatchTestContext::new();

    // Queue everything up front so the pool cannot drain a partial queue.
    {
      let store = ctx.open_store();
      for name in ["one.txt", "two.txt", "three.txt"] {
        store.append(name).expect("append");
      }
      store.close();
    }

    let processor = RecordingProcessor::new();
    let config = RuntimeConfig {
      exit_on_drain: true,
      ..ctx.runtime_config(3)
    };
    let (join, _interrupt) = start(config, processor.clone());

    let summary = finish(join).await;
    assert_eq!(
      summary.trigger,
      ShutdownTrigger::Done {
        status: Some("drained".to_string())
      }
    );

    let mut seen = processor.seen();
    seen.sort();
    assert_eq!(seen, vec!["one.txt", "three.txt", "two.txt"]);
    assert_eq!(summary.queue.expect("final stats").pending, 0);
  }

  /// An empty path already in the store is processed and finished like any
  /// other job, so it cannot keep the drain notice from firing.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_exit_on_drain_with_stored_empty_path() {
    let ctx = DispatchTestContext::new();

    {
      let mut list = JobList::new();
      list.push("");
      list.push("x.txt");
      let store = ctx.open_store();
      store.save(&list).expect("save");
      store.close();
    }

    let processor = RecordingProcessor::new();
    let config = RuntimeConfig {
      exit_on_drain: true,
      ..ctx.runtime_config(1)
    };
    let (join, _interrupt) = start(config, processor.clone());

    let summary = finish(join).await;
    assert_eq!(
      summary.trigger,
      ShutdownTrigger::Done {
        status: Some("drained".to_string())
      }
    );
    assert_eq!(processor.seen(), vec!["", "x.txt"]);
    assert_eq!(summary.jobs, 2);
    assert_eq!(summary.queue.expect("final stats").pending, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_interrupt_counts_as_done() {
    let ctx = DispatchTestContext::new();
    let (join, interrupt) = start(ctx.runtime_config(1), RecordingProcessor::new());
    wait_until_running(&ctx).await;

    interrupt.cancel();

    let summary = finish(join).await;
    assert_eq!(summary.trigger, ShutdownTrigger::Interrupted);
    assert_eq!(summary.jobs, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_control_endpoint_rejects_other_messages() {
    let ctx = DispatchTestContext::new();
    let (join, _interrupt) = start(ctx.runtime_config(1), RecordingProcessor::new());
    wait_until_running(&ctx).await;

    let mut control = Client::connect(&ctx.control_socket()).await.expect("connect control");
    let reply = control.call(&Message::job_request()).await.expect("call");
    assert!(matches!(reply, Reply::Error { code: codes::METHOD_NOT_FOUND, .. }));

    control.done(None).await.expect("done on the same connection");
    let summary = finish(join).await;
    assert_eq!(summary.trigger, ShutdownTrigger::Done { status: None });
  }

  /// Work left in the queue at shutdown is still there on the next run.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_unclaimed_jobs_carry_over_runs() {
    let ctx = DispatchTestContext::new();

    {
      let store = ctx.open_store();
      store.append("left-over.txt").expect("append");
      store.close();
    }

    let processor = RecordingProcessor::new();
    let (join, _interrupt) = start(ctx.runtime_config(1), processor.clone());
    wait_until_running(&ctx).await;

    let processed = wait_for(Duration::from_secs(5), || {
      let processor = processor.clone();
      async move { !processor.seen().is_empty() }
    })
    .await;
    assert!(processed);
    assert_eq!(processor.seen(), vec!["left-over.txt"]);

    let mut control = Client::connect(&ctx.control_socket()).await.expect("connect control");
    control.done(None).await.expect("done");
    finish(join).await;
  }

  #[tokio::test]
  async fn test_unusable_data_dir_is_fatal() {
    let ctx = DispatchTestContext::new();
    let not_a_dir = ctx.data_dir.path().join("file");
    std::fs::write(&not_a_dir, b"occupied").expect("write file");

    let config = RuntimeConfig {
      data_dir: not_a_dir,
      ..ctx.runtime_config(1)
    };
    let result = Daemon::new(config, Arc::new(RecordingProcessor::new()))
      .run_until(CancellationToken::new())
      .await;

    assert!(matches!(result, Err(DaemonError::StoreOpen(_))));
  }

  /// A failed bind releases the store so the next run can open it.
  #[tokio::test]
  async fn test_bind_failure_releases_store() {
    let ctx = DispatchTestContext::new();
    let blocker = ctx.socket_dir.path().join("blocker");
    std::fs::write(&blocker, b"occupied").expect("write file");

    let config = RuntimeConfig {
      scheduler_socket: blocker.join("scheduler.sock"),
      ..ctx.runtime_config(1)
    };
    let result = Daemon::new(config, Arc::new(RecordingProcessor::new()))
      .run_until(CancellationToken::new())
      .await;

    match result {
      Err(DaemonError::Bind { source, .. }) => assert!(matches!(source, IpcError::Io(_))),
      other => panic!("expected bind error, got {:?}", other.map(|s| s.trigger)),
    }

    ctx.open_store().close();
  }
}
