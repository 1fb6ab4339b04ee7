//! Run controller: stepwise execution, status transitions, faults,
//! cancellation, checkpoint autosave.

mod common;

use std::sync::Arc;

use common::*;
use meshflow::event_bus::Event;
use meshflow::executor::{handler_fn, HandlerError, HandlerOutcome};
use meshflow::graphs::GraphBuilder;
use meshflow::runtimes::{
    Checkpointer, InMemoryCheckpointer, RunController, RunError, RunStatus, RuntimeConfig,
};
use serde_json::json;

#[tokio::test]
async fn stepwise_run_reports_each_superstep() {
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "start", forward("mid")))
        .add_executor(executor("b", "mid", output()))
        .add_edge("a", "b")
        .with_entry("a", "start")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let run_id = controller.start_run(json!("x")).await.unwrap();

    let first = controller.run_step(&run_id).await.unwrap();
    assert_eq!(first.step, 0);
    assert_eq!(first.invoked, vec!["a".into()]);
    assert_eq!(first.status, RunStatus::Idle);

    let second = controller.run_step(&run_id).await.unwrap();
    assert_eq!(second.step, 1);
    assert_eq!(second.invoked, vec!["b".into()]);
    assert_eq!(second.status, RunStatus::Completed);

    assert_eq!(controller.outputs(&run_id).unwrap(), vec![json!("x")]);

    // Stepping a completed run is a no-op.
    let after = controller.run_step(&run_id).await.unwrap();
    assert!(after.invoked.is_empty());
    assert_eq!(after.status, RunStatus::Completed);
}

#[tokio::test]
async fn one_invocation_per_executor_per_step() {
    // Two messages target "sink" in the same step; only one is delivered,
    // the other waits for the next step.
    let seed = handler_fn(|_, _| async {
        Ok(HandlerOutcome::new()
            .with_message("item", json!(1))
            .with_message("item", json!(2)))
    });
    let graph = GraphBuilder::new()
        .add_executor(executor("seed", "go", seed))
        .add_executor(executor("sink", "item", output()))
        .add_edge("seed", "sink")
        .with_entry("seed", "go")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let run_id = controller.start_run(json!(null)).await.unwrap();
    controller.run_step(&run_id).await.unwrap(); // seed emits two items

    let step = controller.run_step(&run_id).await.unwrap();
    assert_eq!(step.invoked, vec!["sink".into()]);
    assert_eq!(step.status, RunStatus::Idle); // second item still queued

    let step = controller.run_step(&run_id).await.unwrap();
    assert_eq!(step.invoked, vec!["sink".into()]);
    assert_eq!(step.status, RunStatus::Completed);
    assert_eq!(controller.outputs(&run_id).unwrap(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn handler_failure_faults_the_run_and_commits_nothing() {
    use meshflow::state::{Scope, StateWrite};

    let seed = handler_fn(|_, _| async {
        Ok(HandlerOutcome::new().with_message("work", json!(null)))
    });
    // Writes then fails: the write must not survive the aborted step.
    let faulty = handler_fn(|_, _| async {
        let _buffered = HandlerOutcome::new().with_write(StateWrite::global("k", json!(1)));
        Err::<HandlerOutcome, _>(HandlerError::validation("synthetic failure"))
    });
    let graph = GraphBuilder::new()
        .add_executor(executor("seed", "go", seed))
        .add_executor(executor("faulty", "work", faulty))
        .add_edge("seed", "faulty")
        .with_entry("seed", "go")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let mut stream = controller.event_bus().subscribe();
    let run_id = controller.start_run(json!(null)).await.unwrap();
    controller.run_step(&run_id).await.unwrap();

    let err = controller.run_step(&run_id).await.unwrap_err();
    assert!(matches!(err, RunError::Scheduler(_)));
    assert_eq!(controller.status(&run_id).unwrap(), RunStatus::Faulted);

    let view = controller.state_view(&run_id).unwrap();
    assert_eq!(view.get(&Scope::Global, "k"), None);

    let mut faulted = None;
    while let Some(event) = stream.try_next() {
        if let Event::RunFaulted {
            executor,
            step,
            error,
        } = event
        {
            faulted = Some((executor, step, error));
        }
    }
    let (executor, step, error) = faulted.expect("RunFaulted event");
    assert_eq!(executor, "faulty".into());
    assert_eq!(step, 1);
    assert!(error.contains("synthetic failure"));

    // Faulted runs are never retried automatically.
    let report = controller.run_step(&run_id).await.unwrap();
    assert!(report.invoked.is_empty());
    assert_eq!(report.status, RunStatus::Faulted);
}

#[tokio::test]
async fn cancellation_is_observed_between_steps() {
    // An infinite ping-pong loop; cancel stops it at a step boundary.
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "ping", forward("ping")))
        .add_executor(executor("b", "ping", forward("ping")))
        .add_edge("a", "b")
        .add_edge("b", "a")
        .with_entry("a", "ping")
        .build()
        .unwrap();

    let handle = graph.start(json!(null)).await.unwrap();
    handle.cancel();
    let report = handle.join().await.unwrap();
    assert!(report.cancelled);
}

#[tokio::test]
async fn autosave_checkpoints_every_step() {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let config = RuntimeConfig::new()
        .with_checkpointer(checkpointer.clone())
        .with_autosave(true);
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "start", forward("mid")))
        .add_executor(executor("b", "mid", output()))
        .add_edge("a", "b")
        .with_runtime_config(config)
        .with_entry("a", "start")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let run_id = controller.start_run(json!("x")).await.unwrap();
    controller.run_step(&run_id).await.unwrap();

    let checkpoint = checkpointer.load_latest(&run_id).await.unwrap();
    assert_eq!(checkpoint.step, 1);
    assert_eq!(checkpoint.state.queue.len(), 1);

    controller.run_step(&run_id).await.unwrap();
    let checkpoint = checkpointer.load_latest(&run_id).await.unwrap();
    assert_eq!(checkpoint.step, 2);
    assert_eq!(checkpoint.state.status, RunStatus::Completed);
    assert_eq!(checkpoint.state.outputs, vec![json!("x")]);
}

#[tokio::test]
async fn unknown_run_id_is_rejected() {
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "start", output()))
        .with_entry("a", "start")
        .build()
        .unwrap();
    let mut controller = RunController::new(Arc::new(graph));
    assert!(matches!(
        controller.run_step("ghost").await,
        Err(RunError::RunNotFound { .. })
    ));
}

#[tokio::test]
async fn event_stream_is_ordered_and_restartable() {
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "start", forward("mid")))
        .add_executor(executor("b", "mid", output()))
        .add_edge("a", "b")
        .with_entry("a", "start")
        .build()
        .unwrap();

    let handle = graph.start(json!("x")).await.unwrap();
    let stream = handle.events();
    handle.join().await.unwrap();

    let mut stream = stream;
    let first_pass = {
        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }
        events
    };
    stream.restart();
    let mut second_pass = Vec::new();
    while let Some(e) = stream.next().await {
        second_pass.push(e);
    }
    assert_eq!(first_pass, second_pass);

    // Invocation precedes completion for each executor.
    let invoked_pos = first_pass
        .iter()
        .position(|e| matches!(e, Event::ExecutorInvoked { executor, .. } if *executor == "b".into()))
        .unwrap();
    let completed_pos = first_pass
        .iter()
        .position(|e| matches!(e, Event::ExecutorCompleted { executor, .. } if *executor == "b".into()))
        .unwrap();
    assert!(invoked_pos < completed_pos);
}
