//! Scheduler endpoint E2E tests over a real Unix socket and `redb` store.

#[cfg(test)]
mod tests {
  use std::{
    collections::BTreeSet,
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
  };

  use futures::{SinkExt, StreamExt};
  use pretty_assertions::assert_eq;
  use tokio::net::UnixStream;
  use tokio_util::codec::{Framed, LengthDelimitedCodec};

  use crate::{
    __tests__::helpers::DispatchTestContext,
    codec,
    ipc::{Client, IpcError, Message, Reply, codes},
    scheduler::SchedulerConfig,
  };

  // ==========================================================================
  // Protocol
  // ==========================================================================

  /// Enqueue a.txt, b.txt; three job requests hand out a, b, then nothing.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_jobs_are_handed_out_in_enqueue_order() {
    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut client = ctx.connect().await;

    client.enqueue("a.txt").await.expect("enqueue a");
    client.enqueue("b.txt").await.expect("enqueue b");

    assert_eq!(client.request_job().await.expect("request"), Some("a.txt".to_string()));
    assert_eq!(client.request_job().await.expect("request"), Some("b.txt".to_string()));
    assert_eq!(client.request_job().await.expect("request"), None);

    let raw = client.call(&Message::job_request()).await.expect("raw request");
    assert_eq!(raw, Reply::NoJob);

    scheduler.stop().await.close();
  }

  /// After shutdown, open connections are closed and no reply ever comes.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_shutdown_closes_connections() {
    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut worker = ctx.connect().await;
    let producer = ctx.connect().await;

    producer.shutdown().await.expect("shutdown");

    let result = tokio::time::timeout(Duration::from_secs(2), worker.request_job())
      .await
      .expect("request should fail fast, not hang");
    assert!(
      matches!(result, Err(IpcError::Closed) | Err(IpcError::Io(_))),
      "expected closed connection, got {:?}",
      result
    );

    tokio::time::timeout(Duration::from_secs(2), scheduler.stopped.cancelled())
      .await
      .expect("scheduler thread should exit");
    assert!(scheduler.handle.is_stopped());

    let store = scheduler.join.await.expect("scheduler thread");
    scheduler.server.await.expect("endpoint task");
    assert!(!ctx.scheduler_socket().exists(), "socket should be removed");
    assert!(Client::connect(&ctx.scheduler_socket()).await.is_err());
    store.close();
  }

  /// Undecodable frames and unknown types get error replies on the same
  /// connection, which keeps working afterwards.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_malformed_frames_keep_connection_alive() {
    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;

    let stream = UnixStream::connect(ctx.scheduler_socket()).await.expect("connect");
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    framed
      .send(bytes::Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]))
      .await
      .expect("send garbage");
    let frame = framed.next().await.expect("reply").expect("read reply");
    let reply: Reply = codec::decode(&frame).expect("decode reply");
    assert!(matches!(reply, Reply::Error { code: codes::INVALID_REQUEST, .. }));

    let unknown = codec::encode(&Message::default().with("type", "reticulate")).expect("encode");
    framed.send(bytes::Bytes::from(unknown)).await.expect("send unknown");
    let frame = framed.next().await.expect("reply").expect("read reply");
    let reply: Reply = codec::decode(&frame).expect("decode reply");
    assert!(matches!(reply, Reply::Error { code: codes::METHOD_NOT_FOUND, .. }));

    let enqueue = codec::encode(&Message::enqueue("still-works.txt")).expect("encode");
    framed.send(bytes::Bytes::from(enqueue)).await.expect("send enqueue");
    let frame = framed.next().await.expect("reply").expect("read reply");
    let reply: Reply = codec::decode(&frame).expect("decode reply");
    assert_eq!(reply, Reply::Ack);

    let store = scheduler.stop().await;
    assert_eq!(store.stats().expect("stats").pending, 1);
    store.close();
  }

  /// Missing `path` is an error reply, not a crash.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_missing_path_is_rejected() {
    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut client = ctx.connect().await;

    let reply = client
      .call(&Message::default().with("type", "enqueue"))
      .await
      .expect("call");
    assert!(matches!(reply, Reply::Error { code: codes::INVALID_PARAMS, .. }));

    let err = client
      .call(&Message::default().with("type", "job_finished"))
      .await
      .expect("call")
      .into_result()
      .unwrap_err();
    assert!(matches!(err, IpcError::Rpc { code: codes::INVALID_PARAMS, .. }));

    // An empty path would be indistinguishable from no path at all
    let err = client.enqueue("").await.unwrap_err();
    assert!(matches!(err, IpcError::Rpc { code: codes::INVALID_PARAMS, .. }));
    assert_eq!(client.request_job().await.expect("request"), None);
    assert_eq!(client.status().await.expect("status").queue.total, 0);

    scheduler.stop().await.close();
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_status_reports_queue_and_bookkeeping() {
    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut client = ctx.connect().await;

    client.enqueue("one.txt").await.expect("enqueue");
    client.enqueue("two.txt").await.expect("enqueue");
    let path = client.request_job().await.expect("request").expect("a job");

    let status = client.status().await.expect("status");
    assert_eq!(status.queue.total, 2);
    assert_eq!(status.queue.pending, 1);
    assert_eq!(status.in_flight, 1);
    assert_eq!(status.finished, 0);

    client.job_finished(&path).await.expect("finished");
    let status = client.status().await.expect("status");
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.finished, 1);

    scheduler.stop().await.close();
  }

  // ==========================================================================
  // Durability
  // ==========================================================================

  /// Unclaimed jobs survive a scheduler restart on the same data dir.
  #[tokio::test(flavor = "multi_thread")]
  async fn test_pending_jobs_survive_restart() {
    let ctx = DispatchTestContext::new();

    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut client = ctx.connect().await;
    client.enqueue("first.txt").await.expect("enqueue");
    client.enqueue("second.txt").await.expect("enqueue");
    assert_eq!(client.request_job().await.expect("request"), Some("first.txt".to_string()));
    drop(client);
    scheduler.stop().await.close();

    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let mut client = ctx.connect().await;
    assert_eq!(client.request_job().await.expect("request"), Some("second.txt".to_string()));
    assert_eq!(client.request_job().await.expect("request"), None);
    drop(client);
    scheduler.stop().await.close();
  }

  // ==========================================================================
  // Concurrency
  // ==========================================================================

  /// Producers and consumers on separate connections at the same time:
  /// every enqueued path is handed out exactly once.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_enqueue_and_claim_lose_nothing() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 25;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let ctx = DispatchTestContext::new();
    let scheduler = ctx.start_scheduler(SchedulerConfig::default()).await;
    let claimed = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
      let mut client = ctx.connect().await;
      producers.push(tokio::spawn(async move {
        for i in 0..PER_PRODUCER {
          client.enqueue(&format!("p{}-{}.txt", p, i)).await.expect("enqueue");
        }
      }));
    }

    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
      let mut client = ctx.connect().await;
      let claimed = Arc::clone(&claimed);
      consumers.push(tokio::spawn(async move {
        let mut got = Vec::new();
        while claimed.load(Ordering::SeqCst) < TOTAL {
          match client.request_job().await.expect("request") {
            Some(path) => {
              claimed.fetch_add(1, Ordering::SeqCst);
              got.push(path);
            }
            None => tokio::time::sleep(Duration::from_millis(5)).await,
          }
        }
        got
      }));
    }

    for producer in producers {
      producer.await.expect("producer");
    }

    let mut all = Vec::new();
    for consumer in consumers {
      let got = tokio::time::timeout(Duration::from_secs(10), consumer)
        .await
        .expect("consumers should finish")
        .expect("consumer");
      all.extend(got);
    }

    let unique: BTreeSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), TOTAL, "no path may be handed out twice");
    assert_eq!(unique.len(), TOTAL, "every path must be handed out");

    let expected: BTreeSet<_> = (0..PRODUCERS)
      .flat_map(|p| (0..PER_PRODUCER).map(move |i| format!("p{}-{}.txt", p, i)))
      .collect();
    assert_eq!(unique, expected);

    let store = scheduler.stop().await;
    let stats = store.stats().expect("stats");
    assert_eq!(stats.total, TOTAL);
    assert_eq!(stats.pending, 0);
    store.close();
  }
}
