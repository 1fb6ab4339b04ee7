//! Loop constructs expressed with plain edges, switches and scopes:
//! foreach, break, continue, goto, and the writer/critic/summary
//! revision loop.

mod common;

use std::sync::Arc;

use common::*;
use meshflow::control::ScopeCommand;
use meshflow::executor::{handler_fn, ExecutorSpec, Handler, HandlerOutcome};
use meshflow::graphs::{GraphBuilder, SwitchCase};
use meshflow::runtimes::{RunController, RunStatus};
use meshflow::state::{Scope, StateWrite};
use serde_json::json;

fn loop_count(ctx: &meshflow::executor::ExecutorContext) -> u64 {
    ctx.state
        .get(&Scope::loop_scope("l"), "count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

fn has_more(env: &meshflow::message::Envelope) -> bool {
    env.payload["idx"].as_u64() < env.payload["n"].as_u64()
}

/// Tail gate: advances the index, discards the iteration scope, and routes
/// back to the head or out of the loop.
fn gate() -> Arc<dyn Handler> {
    handler_fn(|env, _| async move {
        let idx = env.payload["idx"].as_u64().unwrap_or(0);
        let n = env.payload["n"].as_u64().unwrap_or(0);
        Ok(HandlerOutcome::new()
            .with_message("item", json!({"idx": idx + 1, "n": n}))
            .with_scope_command(ScopeCommand::ExitIteration("l".into())))
    })
}

/// Exit executor: reports the loop-scoped count and tears the loop down.
fn done() -> Arc<dyn Handler> {
    handler_fn(|_, ctx| async move {
        Ok(HandlerOutcome::new()
            .with_output(json!(loop_count(&ctx)))
            .with_scope_command(ScopeCommand::ExitLoop("l".into())))
    })
}

#[tokio::test]
async fn foreach_runs_the_body_once_per_item() {
    let driver = handler_fn(|env, _| async move {
        let n = env.payload["n"].as_u64().unwrap_or(0);
        Ok(HandlerOutcome::new().with_message("item", json!({"idx": 0, "n": n})))
    });
    let worker = handler_fn(|env, ctx| async move {
        Ok(HandlerOutcome::new()
            .with_write(StateWrite::new(
                Scope::loop_scope("l"),
                "count",
                json!(loop_count(&ctx) + 1),
            ))
            .with_write(StateWrite::new(
                Scope::iteration("l"),
                "scratch",
                env.payload.clone(),
            ))
            .with_message("advance", env.payload.clone()))
    });

    let graph = GraphBuilder::new()
        .add_executor(executor("driver", "items", driver))
        .add_executor(executor("worker", "item", worker))
        .add_executor(executor("gate", "advance", gate()))
        .add_executor(executor("done", "item", done()))
        .add_switch(
            "driver",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .add_edge("worker", "gate")
        .add_switch(
            "gate",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .with_entry("driver", "items")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let run_id = controller.start_run(json!({"n": 4})).await.unwrap();
    let report = controller.run_until_settled(&run_id, None).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.outputs, vec![json!(4)]);
    // The iteration scope was discarded every time around; the loop scope
    // was torn down at the end.
    let view = controller.state_view(&run_id).unwrap();
    assert_eq!(view.get(&Scope::iteration("l"), "scratch"), None);
    assert_eq!(view.get(&Scope::loop_scope("l"), "count"), None);
}

#[tokio::test]
async fn foreach_with_zero_items_skips_the_body() {
    let driver = handler_fn(|env, _| async move {
        let n = env.payload["n"].as_u64().unwrap_or(0);
        Ok(HandlerOutcome::new().with_message("item", json!({"idx": 0, "n": n})))
    });
    let worker = handler_fn(|env, _| async move {
        Ok(HandlerOutcome::new().with_message("advance", env.payload.clone()))
    });
    let graph = GraphBuilder::new()
        .add_executor(executor("driver", "items", driver))
        .add_executor(executor("worker", "item", worker))
        .add_executor(executor("gate", "advance", gate()))
        .add_executor(executor("done", "item", done()))
        .add_switch(
            "driver",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .add_edge("worker", "gate")
        .add_switch(
            "gate",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .with_entry("driver", "items")
        .build()
        .unwrap();

    let handle = graph.start(json!({"n": 0})).await.unwrap();
    let stream = handle.events();
    let report = handle.join().await.unwrap();
    let events = collect_events(stream).await;
    assert_eq!(report.outputs, vec![json!(0)]);
    assert_eq!(invocation_count(&events, "worker"), 0);
}

#[tokio::test]
async fn break_leaves_the_loop_early() {
    // Worker breaks when it reaches idx == 2: processed items are 0 and 1.
    let driver = handler_fn(|env, _| async move {
        let n = env.payload["n"].as_u64().unwrap_or(0);
        Ok(HandlerOutcome::new().with_message("item", json!({"idx": 0, "n": n})))
    });
    let worker = handler_fn(|env, ctx| async move {
        let idx = env.payload["idx"].as_u64().unwrap_or(0);
        if idx == 2 {
            return Ok(HandlerOutcome::new().with_message("loop.break", env.payload.clone()));
        }
        Ok(HandlerOutcome::new()
            .with_write(StateWrite::new(
                Scope::loop_scope("l"),
                "count",
                json!(loop_count(&ctx) + 1),
            ))
            .with_message("advance", env.payload.clone()))
    });
    let after = handler_fn(|_, ctx| async move {
        Ok(HandlerOutcome::new()
            .with_output(json!(loop_count(&ctx)))
            .with_scope_command(ScopeCommand::ExitLoop("l".into())))
    });

    let graph = GraphBuilder::new()
        .add_executor(executor("driver", "items", driver))
        .add_executor(executor("worker", "item", worker))
        .add_executor(executor("gate", "advance", gate()))
        .add_executor(executor("after", "loop.break", after))
        .add_executor(executor("done", "item", done()))
        .add_switch(
            "driver",
            vec![SwitchCase::new("worker", has_more)],
        )
        .add_switch(
            "worker",
            vec![
                SwitchCase::new("gate", |env| env.tag == "advance".into()),
                SwitchCase::new("after", |env| env.tag == "loop.break".into()),
            ],
        )
        .add_switch(
            "gate",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .with_entry("driver", "items")
        .build()
        .unwrap();

    let handle = graph.start(json!({"n": 10})).await.unwrap();
    let stream = handle.events();
    let report = handle.join().await.unwrap();
    let events = collect_events(stream).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.outputs, vec![json!(2)]);
    assert_eq!(invocation_count(&events, "worker"), 3);
    assert_eq!(invocation_count(&events, "done"), 0);
}

#[tokio::test]
async fn continue_skips_an_iteration_body() {
    // Odd items jump straight to the gate without counting.
    let driver = handler_fn(|env, _| async move {
        let n = env.payload["n"].as_u64().unwrap_or(0);
        Ok(HandlerOutcome::new().with_message("item", json!({"idx": 0, "n": n})))
    });
    let worker = handler_fn(|env, ctx| async move {
        let idx = env.payload["idx"].as_u64().unwrap_or(0);
        if idx % 2 == 1 {
            return Ok(HandlerOutcome::new().with_message("advance", env.payload.clone()));
        }
        Ok(HandlerOutcome::new()
            .with_write(StateWrite::new(
                Scope::loop_scope("l"),
                "count",
                json!(loop_count(&ctx) + 1),
            ))
            .with_message("advance", env.payload.clone()))
    });

    let graph = GraphBuilder::new()
        .add_executor(executor("driver", "items", driver))
        .add_executor(executor("worker", "item", worker))
        .add_executor(executor("gate", "advance", gate()))
        .add_executor(executor("done", "item", done()))
        .add_switch(
            "driver",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .add_edge("worker", "gate")
        .add_switch(
            "gate",
            vec![
                SwitchCase::new("worker", has_more),
                SwitchCase::new("done", |env| !has_more(env)),
            ],
        )
        .with_entry("driver", "items")
        .build()
        .unwrap();

    let handle = graph.start(json!({"n": 5})).await.unwrap();
    let stream = handle.events();
    let report = handle.join().await.unwrap();
    let events = collect_events(stream).await;

    // Items 0, 2, 4 counted; 1 and 3 skipped.
    assert_eq!(report.outputs, vec![json!(3)]);
    assert_eq!(invocation_count(&events, "worker"), 5);
}

#[tokio::test]
async fn goto_jumps_over_executors_and_unwinds_iteration_scope() {
    // "a" writes iteration-scoped scratch, then jumps straight to "c",
    // discarding the scope on the way out; "b" is never reached.
    let a = handler_fn(|_, _| async {
        Ok(HandlerOutcome::new()
            .with_write(StateWrite::new(Scope::iteration("zone"), "tmp", json!(1)))
            .with_scope_command(ScopeCommand::ExitIteration("zone".into()))
            .with_message("jump", json!("went around")))
    });
    let graph = GraphBuilder::new()
        .add_executor(executor("a", "start", a))
        .add_executor(executor("b", "normal", output()))
        .add_executor(executor("c", "jump", output()))
        .add_switch(
            "a",
            vec![
                SwitchCase::new("b", |env| env.tag == "normal".into()),
                SwitchCase::new("c", |env| env.tag == "jump".into()),
            ],
        )
        .with_entry("a", "start")
        .build()
        .unwrap();

    let mut controller = RunController::new(Arc::new(graph));
    let mut stream = controller.event_bus().subscribe();
    let run_id = controller.start_run(json!(null)).await.unwrap();
    controller.run_step(&run_id).await.unwrap();

    let view = controller.state_view(&run_id).unwrap();
    assert_eq!(view.get(&Scope::iteration("zone"), "tmp"), None);

    let report = controller.run_until_settled(&run_id, None).await.unwrap();
    assert_eq!(report.outputs, vec![json!("went around")]);
    let mut events = Vec::new();
    while let Some(e) = stream.try_next() {
        events.push(e);
    }
    assert_eq!(invocation_count(&events, "b"), 0);
    assert_eq!(invocation_count(&events, "c"), 1);
}

#[tokio::test]
async fn writer_critic_summary_settles_after_three_revisions() {
    let writer = handler_fn(|_, ctx| async move {
        let revision = ctx
            .state
            .get(&Scope::loop_scope("review"), "revision")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        Ok(HandlerOutcome::new()
            .with_write(StateWrite::new(
                Scope::loop_scope("review"),
                "revision",
                json!(revision),
            ))
            .with_message("draft", json!({"text": format!("draft v{revision}"), "revision": revision})))
    });
    let critic = handler_fn(|env, _| async move {
        let revision = env.payload["revision"].as_u64().unwrap_or(0);
        if revision >= 3 {
            Ok(HandlerOutcome::new().with_message("review.approved", env.payload.clone()))
        } else {
            Ok(HandlerOutcome::new().with_message("review.rejected", env.payload.clone()))
        }
    });
    let summary = handler_fn(|env, _| async move {
        Ok(HandlerOutcome::new()
            .with_output(json!({"final": env.payload["text"]}))
            .with_scope_command(ScopeCommand::ExitLoop("review".into())))
    });

    let graph = GraphBuilder::new()
        .add_executor(
            ExecutorSpec::new("writer")
                .on("topic", writer.clone())
                .on("review.rejected", writer),
        )
        .add_executor(executor("critic", "draft", critic))
        .add_executor(executor("summary", "review.approved", summary))
        .add_edge("writer", "critic")
        .add_switch(
            "critic",
            vec![
                SwitchCase::new("writer", |env| env.tag == "review.rejected".into()),
                SwitchCase::new("summary", |env| env.tag == "review.approved".into()),
            ],
        )
        .with_entry("writer", "topic")
        .build()
        .unwrap();

    let handle = graph.start(json!({"topic": "launch post"})).await.unwrap();
    let stream = handle.events();
    let report = handle.join().await.unwrap();
    let events = collect_events(stream).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.outputs, vec![json!({"final": "draft v3"})]);
    assert_eq!(invocation_count(&events, "writer"), 3);
    assert_eq!(invocation_count(&events, "critic"), 3);
    assert_eq!(invocation_count(&events, "summary"), 1);
    // The final output is exactly what Summary produced.
    assert_eq!(output_payloads(&events), report.outputs);
}
