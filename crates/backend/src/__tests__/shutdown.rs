//! Live-phase concurrency and graceful shutdown scenarios.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;

  use crate::{
    __tests__::helpers::{
      Answer, BlockingChecker, ScriptedChecker, acme_record, pipeline_options, wait_for, wait_for_published,
    },
    bus::{MemoryBus, MessageBus},
    pipeline::{Pipeline, PipelineState},
  };

  const SOURCE: &str = "github.repositories";

  // ==========================================================================
  // Graceful Shutdown
  // ==========================================================================

  /// Test: K in-flight units all publish exactly once before Stop returns.
  #[tokio::test]
  async fn test_stop_waits_for_in_flight_units() {
    let bus = MemoryBus::new();
    let checker = BlockingChecker::new();
    let mut pipeline = Pipeline::start_with(Arc::new(bus.clone()), Arc::new(checker.clone()), pipeline_options())
      .await
      .expect("start pipeline");

    for name in ["a", "b", "c"] {
      bus.publish(SOURCE, acme_record(name)).await.unwrap();
    }
    assert!(checker.wait_started(3).await, "three units should be in flight");
    assert_eq!(pipeline.stats().in_flight, 3);

    let mut state = pipeline.watch_state();
    let stop = tokio::spawn(async move {
      let result = pipeline.stop().await;
      (pipeline, result)
    });

    state
      .wait_for(|s| *s == PipelineState::Stopping)
      .await
      .expect("state channel open");

    // Arrives after Stop began: must never reach the checker
    let _ = bus.publish(SOURCE, acme_record("late")).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stop.is_finished(), "Stop must wait for in-flight units");
    assert!(bus.published("repos.valid").is_empty());
    assert!(!bus.is_closed());

    checker.release(3);
    let (pipeline, result) = tokio::time::timeout(Duration::from_secs(5), stop)
      .await
      .expect("stop finishes")
      .expect("stop task");
    result.expect("stop succeeds");

    let mut published = bus.published("repos.valid");
    published.sort();
    let mut expected = vec![acme_record("a"), acme_record("b"), acme_record("c")];
    expected.sort();
    assert_eq!(published, expected);

    assert_eq!(checker.started(), 3);
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(pipeline.stats().in_flight, 0);
    assert!(bus.is_closed());
  }

  /// Test: Stop twice is a no-op the second time.
  #[tokio::test]
  async fn test_stop_is_idempotent() {
    let bus = MemoryBus::new();
    let mut pipeline = Pipeline::start_with(
      Arc::new(bus.clone()),
      Arc::new(ScriptedChecker::new(Answer::Exists)),
      pipeline_options(),
    )
    .await
    .expect("start pipeline");

    pipeline.stop().await.unwrap();
    pipeline.stop().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(bus.subscriber_count(SOURCE), 0);
    assert!(bus.is_closed());
  }

  /// Test: a live subscription that ends on its own surfaces as interrupted.
  #[tokio::test]
  async fn test_lost_subscription_interrupts() {
    let bus = MemoryBus::new();
    let mut pipeline = Pipeline::start_with(
      Arc::new(bus.clone()),
      Arc::new(ScriptedChecker::new(Answer::Exists)),
      pipeline_options(),
    )
    .await
    .expect("start pipeline");
    assert!(!pipeline.is_interrupted());

    // Connection loss: the bus goes away underneath the pipeline
    bus.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), pipeline.interrupted())
      .await
      .expect("pipeline reports the lost subscription");
    assert!(pipeline.is_interrupted());

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Closed);
  }

  /// Test: a normal stop never reports an interruption.
  #[tokio::test]
  async fn test_stop_is_not_an_interruption() {
    let bus = MemoryBus::new();
    let mut pipeline = Pipeline::start_with(
      Arc::new(bus.clone()),
      Arc::new(ScriptedChecker::new(Answer::Exists)),
      pipeline_options(),
    )
    .await
    .expect("start pipeline");

    pipeline.stop().await.unwrap();

    assert!(!pipeline.is_interrupted());
    assert!(
      tokio::time::timeout(Duration::from_millis(100), pipeline.interrupted())
        .await
        .is_err()
    );
  }

  // ==========================================================================
  // Live Routing
  // ==========================================================================

  /// Test: each live message is routed exactly once by its check result.
  #[tokio::test]
  async fn test_live_routing() {
    let bus = MemoryBus::new();
    let checker = ScriptedChecker::new(Answer::Missing)
      .with("good", Answer::Exists)
      .with("flaky", Answer::Fail);
    let mut pipeline = Pipeline::start_with(Arc::new(bus.clone()), Arc::new(checker), pipeline_options())
      .await
      .expect("start pipeline");

    for name in ["good", "bad", "flaky"] {
      bus.publish(SOURCE, acme_record(name)).await.unwrap();
    }

    assert!(wait_for_published(&bus, "repos.invalid", 2).await);
    assert!(wait_for_published(&bus, "repos.valid", 1).await);
    pipeline.stop().await.unwrap();

    assert_eq!(bus.published("repos.valid"), vec![acme_record("good")]);
    let mut invalid = bus.published("repos.invalid");
    invalid.sort();
    let mut expected = vec![acme_record("bad"), acme_record("flaky")];
    expected.sort();
    assert_eq!(invalid, expected);

    let stats = pipeline.stats();
    assert_eq!(stats.valid, 1);
    assert_eq!(stats.invalid, 2);
    assert_eq!(stats.failed, 0);
  }

  /// Test: a publish failure is counted and its unit still completes.
  #[tokio::test]
  async fn test_publish_failure_does_not_leak_in_flight() {
    let bus = MemoryBus::new();
    bus.fail_publishes_to("repos.valid");
    let mut pipeline = Pipeline::start_with(
      Arc::new(bus.clone()),
      Arc::new(ScriptedChecker::new(Answer::Exists)),
      pipeline_options(),
    )
    .await
    .expect("start pipeline");

    bus.publish(SOURCE, acme_record("demo")).await.unwrap();

    let stats_ok = wait_for(Duration::from_secs(5), || {
      let stats = pipeline.stats();
      async move { stats.failed == 1 && stats.in_flight == 0 }
    })
    .await;
    assert!(stats_ok, "publish failure should be counted with nothing left in flight");

    tokio::time::timeout(Duration::from_secs(5), pipeline.stop())
      .await
      .expect("stop does not hang")
      .unwrap();
  }

  /// Test: the in-flight cap holds back further deliveries until a unit finishes.
  #[tokio::test]
  async fn test_max_in_flight_caps_concurrency() {
    let bus = MemoryBus::new();
    let checker = BlockingChecker::new();
    let mut options = pipeline_options();
    options.max_in_flight = 2;

    let mut pipeline = Pipeline::start_with(Arc::new(bus.clone()), Arc::new(checker.clone()), options)
      .await
      .expect("start pipeline");

    for name in ["a", "b", "c", "d", "e"] {
      bus.publish(SOURCE, acme_record(name)).await.unwrap();
    }

    assert!(checker.wait_started(2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(checker.started(), 2);
    assert_eq!(pipeline.stats().in_flight, 2);

    checker.release(5);
    assert!(wait_for_published(&bus, "repos.valid", 5).await);
    assert_eq!(checker.started(), 5);

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.stats().processed, 5);
  }
}
