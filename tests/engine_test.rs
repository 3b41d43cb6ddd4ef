//! Queue engine behavior against the in-memory store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use taskq::engine::{CLAIM_WINDOW, EnqueueHook, Engine};
use taskq::error::{Error, Result};
use taskq::model::{
    CancelMode, ClaimFilter, Direction, Finalize, ListQuery, NewTask, OrderBy, SortColumn, State,
    Task, TaskId,
};
use taskq::store::memory::MemoryTaskStore;

fn engine() -> Engine {
    Engine::new(Arc::new(MemoryTaskStore::new()), vec![])
}

fn finished(log: &str) -> Finalize {
    Finalize {
        log: log.to_string(),
        state: State::Finished,
        success: true,
        result: json!({"ok": true}),
        runtime: 1.25,
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_creates_queued_unassigned_task() {
    let engine = engine();
    let task = engine
        .enqueue(
            NewTask::new("bags.extract.topics")
                .configuration(json!({"x": 1}))
                .priority(100)
                .description("extract"),
        )
        .await
        .unwrap();

    assert_eq!(task.state, State::Queued);
    assert_eq!(task.assigned_to, "");
    assert_eq!(task.log, "");
    assert_eq!(task.result, json!({}));
    assert!(!task.success);
    assert_eq!(task.runtime, None);
    assert_eq!(task.priority, 100);
}

#[tokio::test]
async fn duplicate_enqueue_names_the_existing_task() {
    let engine = engine();
    let a = engine
        .enqueue(NewTask::new("bags.extract").configuration(json!({"x": 1})).priority(100))
        .await
        .unwrap();

    let err = engine
        .enqueue(NewTask::new("bags.extract").configuration(json!({"x": 1})))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Duplicate { existing } if existing == a.id),
        "got {err:?}"
    );
}

#[tokio::test]
async fn dedup_ignores_key_order_but_not_task_type() {
    let engine = engine();
    engine
        .enqueue(NewTask::new("a.b").configuration(json!({"x": 1, "y": [1, 2]})))
        .await
        .unwrap();

    let reordered = engine
        .enqueue(NewTask::new("a.b").configuration(json!({"y": [1, 2], "x": 1})))
        .await;
    assert!(matches!(reordered, Err(Error::Duplicate { .. })));

    let other_type = engine
        .enqueue(NewTask::new("a.c").configuration(json!({"x": 1, "y": [1, 2]})))
        .await;
    assert!(other_type.is_ok());
}

#[tokio::test]
async fn same_config_can_be_enqueued_again_once_terminal() {
    let engine = engine();
    let first = engine.enqueue(NewTask::new("a.b")).await.unwrap();
    engine.cancel(first.id, CancelMode::Queued).await.unwrap();

    let second = engine.enqueue(NewTask::new("a.b")).await.unwrap();
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn invalid_task_type_is_rejected() {
    let engine = engine();
    let err = engine.enqueue(NewTask::new("not a type")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

struct Recorder {
    seen: Mutex<Vec<TaskId>>,
}

#[async_trait]
impl EnqueueHook for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn after_enqueue(&self, task: &Task) -> Result<()> {
        self.seen.lock().unwrap().push(task.id);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EnqueueHook for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn after_enqueue(&self, _task: &Task) -> Result<()> {
        Err(Error::Other("hook exploded".into()))
    }
}

#[tokio::test]
async fn hooks_run_in_order_and_failures_do_not_fail_enqueue() {
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    let hooks: Vec<Arc<dyn EnqueueHook>> = vec![
        Arc::new(Failing) as Arc<dyn EnqueueHook>,
        recorder.clone() as Arc<dyn EnqueueHook>,
    ];
    let engine = Engine::new(Arc::new(MemoryTaskStore::new()), hooks);

    let task = engine.enqueue(NewTask::new("a.b")).await.unwrap();
    // Duplicates never reach the hooks.
    let _ = engine.enqueue(NewTask::new("a.b")).await;

    assert_eq!(*recorder.seen.lock().unwrap(), vec![task.id]);
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_marks_task_running_and_assigned() {
    let engine = engine();
    let task = engine.enqueue(NewTask::new("a.b")).await.unwrap();

    let claimed = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.state, State::Running);
    assert_eq!(claimed.assigned_to, "w1");
}

#[tokio::test]
async fn empty_queue_yields_none() {
    let engine = engine();
    assert!(engine.claim("w1", &ClaimFilter::any()).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_worker_name_is_rejected() {
    let engine = engine();
    let err = engine.claim("", &ClaimFilter::any()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn two_workers_racing_for_one_task() {
    let engine = Arc::new(engine());
    let task = engine.enqueue(NewTask::new("a.b")).await.unwrap();

    let e1 = Arc::clone(&engine);
    let e2 = Arc::clone(&engine);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { e1.claim("w1", &ClaimFilter::any()).await }),
        tokio::spawn(async move { e2.claim("w2", &ClaimFilter::any()).await }),
    );
    let r1 = r1.unwrap().unwrap();
    let r2 = r2.unwrap().unwrap();

    let winners: Vec<_> = [r1, r2].into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, task.id);
}

#[tokio::test]
async fn concurrent_claims_never_share_a_task() {
    let engine = Arc::new(engine());
    for n in 0..10 {
        engine
            .enqueue(NewTask::new("a.b").configuration(json!({ "n": n })))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..25 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .claim(&format!("worker-{w}"), &ClaimFilter::any())
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            ids.push(task.id);
        }
    }
    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "a task was handed out twice");
    assert!(ids.len() <= 10);
}

#[tokio::test]
async fn worker_gets_its_own_task_back() {
    let engine = engine();
    engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 1})))
        .await
        .unwrap();
    engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 2})).priority(10))
        .await
        .unwrap();

    let first = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    let again = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(first.id, again.id);

    let other = engine.claim("w2", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn claim_prefers_higher_priority() {
    let engine = engine();
    let low = engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 1})).priority(1))
        .await
        .unwrap();
    let high = engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 2})).priority(50))
        .await
        .unwrap();

    let first = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    let second = engine.claim("w2", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(first.id, high.id);
    assert_eq!(second.id, low.id);
}

#[tokio::test]
async fn claim_respects_task_types_and_labels() {
    let engine = engine();
    let gpu = engine
        .enqueue(NewTask::new("sim.run").worker_labels(["gpu"]).priority(10))
        .await
        .unwrap();
    let plain = engine.enqueue(NewTask::new("bags.extract")).await.unwrap();

    let cpu_only = ClaimFilter {
        task_types: vec!["sim.run".into()],
        labels: vec![],
    };
    assert!(engine.claim("cpu", &cpu_only).await.unwrap().is_none());

    let extract_only = ClaimFilter {
        task_types: vec!["bags.extract".into()],
        labels: vec![],
    };
    let got = engine.claim("cpu", &extract_only).await.unwrap().unwrap();
    assert_eq!(got.id, plain.id);

    let gpu_worker = ClaimFilter {
        task_types: vec![],
        labels: vec!["gpu".into(), "big".into()],
    };
    let got = engine.claim("gpu", &gpu_worker).await.unwrap().unwrap();
    assert_eq!(got.id, gpu.id);
}

#[tokio::test]
async fn claim_looks_past_a_window_of_unclaimable_tasks() {
    let engine = engine();
    // Fill more than one window with tasks this worker may not take, but
    // they are filtered before the window is cut.
    for n in 0..(CLAIM_WINDOW * 2) {
        engine
            .enqueue(
                NewTask::new("sim.run")
                    .configuration(json!({ "n": n }))
                    .worker_labels(["gpu"])
                    .priority(100),
            )
            .await
            .unwrap();
    }
    let target = engine.enqueue(NewTask::new("sim.run")).await.unwrap();

    let got = engine.claim("cpu", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(got.id, target.id);
}

// ---------------------------------------------------------------------------
// Priority boost
// ---------------------------------------------------------------------------

#[tokio::test]
async fn boosted_task_is_claimed_next() {
    let engine = engine();
    let mut ids = Vec::new();
    for (n, priority) in [3, 7, 1, 9, 4].into_iter().enumerate() {
        let task = engine
            .enqueue(
                NewTask::new("a.b")
                    .configuration(json!({ "n": n }))
                    .priority(priority),
            )
            .await
            .unwrap();
        ids.push(task.id);
    }
    let lowest = ids[2];

    let boosted = engine.priority_boost(lowest).await.unwrap();
    assert_eq!(boosted.priority, 10);

    let next = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(next.id, lowest);
}

#[tokio::test]
async fn boost_unknown_task_is_not_found() {
    let engine = engine();
    assert!(matches!(
        engine.priority_boost(TaskId(404)).await,
        Err(Error::NotFound(TaskId(404)))
    ));
}

#[tokio::test]
async fn boost_past_the_largest_priority_is_rejected() {
    let engine = engine();
    let top = engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 1})).priority(i32::MAX))
        .await
        .unwrap();
    let other = engine
        .enqueue(NewTask::new("a.b").configuration(json!({"n": 2})))
        .await
        .unwrap();

    assert!(matches!(
        engine.priority_boost(other.id).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(engine.get(other.id).await.unwrap().priority, 0);

    let next = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(next.id, top.id);
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_queued_task_is_immediate() {
    let engine = engine();
    let task = engine.enqueue(NewTask::new("a.b")).await.unwrap();

    let cancelled = engine.cancel(task.id, CancelMode::Queued).await.unwrap();
    assert_eq!(cancelled.state, State::Cancelled);
    assert_eq!(cancelled.assigned_to, "");
    assert!(engine.claim("w1", &ClaimFilter::any()).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_running_task_only_requests() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();

    let requested = engine.cancel(task.id, CancelMode::Running).await.unwrap();
    assert_eq!(requested.state, State::CancellationRequested);
    assert_eq!(requested.assigned_to, "w1");

    // The owner still gets it back on reattach.
    let again = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    assert_eq!(again.state, State::CancellationRequested);

    let done = engine
        .finalize(
            task.id,
            Finalize {
                state: State::Cancelled,
                success: false,
                ..finished("")
            },
        )
        .await
        .unwrap();
    assert_eq!(done.state, State::Cancelled);
}

#[tokio::test]
async fn cancel_with_mismatched_mode_changes_nothing() {
    let engine = engine();
    let queued = engine.enqueue(NewTask::new("a.b")).await.unwrap();

    let same = engine.cancel(queued.id, CancelMode::Running).await.unwrap();
    assert_eq!(same.state, State::Queued);

    let claimed = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    let same = engine.cancel(claimed.id, CancelMode::Queued).await.unwrap();
    assert_eq!(same.state, State::Running);
}

#[tokio::test]
async fn cancel_terminal_task_is_a_no_op() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    engine.finalize(task.id, finished("done")).await.unwrap();

    let same = engine.cancel(task.id, CancelMode::Any).await.unwrap();
    assert_eq!(same.state, State::Finished);
}

// ---------------------------------------------------------------------------
// Logs and finalize
// ---------------------------------------------------------------------------

#[tokio::test]
async fn patch_log_appends_in_order() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();

    for part in ["a", "b", "c"] {
        engine.patch_log(task.id, part).await.unwrap();
    }
    assert_eq!(engine.get(task.id).await.unwrap().log, "abc");
}

#[tokio::test]
async fn patch_log_unknown_task_is_not_found() {
    let engine = engine();
    assert!(matches!(
        engine.patch_log(TaskId(9), "x").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn finalize_records_outcome() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    engine.patch_log(task.id, "partial").await.unwrap();

    let done = engine.finalize(task.id, finished("partial output")).await.unwrap();
    assert_eq!(done.state, State::Finished);
    assert!(done.success);
    assert_eq!(done.result, json!({"ok": true}));
    assert_eq!(done.runtime, Some(1.25));
    assert_eq!(done.log, "partial output");
}

#[tokio::test]
async fn finalize_never_shrinks_log() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    engine.patch_log(task.id, "a long streamed log").await.unwrap();

    let done = engine.finalize(task.id, finished("short")).await.unwrap();
    assert_eq!(done.log, "a long streamed log");
}

#[tokio::test]
async fn finalize_twice_returns_first_outcome() {
    let engine = engine();
    engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let task = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();

    let first = engine.finalize(task.id, finished("one")).await.unwrap();
    let second = engine
        .finalize(
            task.id,
            Finalize {
                success: false,
                ..finished("two, longer")
            },
        )
        .await
        .unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn finalize_rejects_illegal_transitions() {
    let engine = engine();
    let queued = engine.enqueue(NewTask::new("a.b")).await.unwrap();
    let err = engine.finalize(queued.id, finished("")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: State::Queued,
            to: State::Finished
        }
    ));

    let running = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    let err = engine
        .finalize(
            running.id,
            Finalize {
                state: State::Cancelled,
                ..finished("")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: State::Running,
            to: State::Cancelled
        }
    ));

    let err = engine
        .finalize(
            running.id,
            Finalize {
                state: State::Running,
                ..finished("")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = engine
        .finalize(
            running.id,
            Finalize {
                runtime: -1.0,
                ..finished("")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn seeded() -> (Engine, Vec<TaskId>) {
    let engine = engine();
    let mut ids = Vec::new();
    for (n, priority) in [5, 1, 9].into_iter().enumerate() {
        let task = engine
            .enqueue(
                NewTask::new("a.b")
                    .configuration(json!({ "n": n }))
                    .priority(priority),
            )
            .await
            .unwrap();
        ids.push(task.id);
    }
    // ids[2] (priority 9) runs, then finishes; ids[0] (priority 5) runs.
    let t = engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    engine.finalize(t.id, finished("")).await.unwrap();
    engine.claim("w1", &ClaimFilter::any()).await.unwrap().unwrap();
    (engine, ids)
}

#[tokio::test]
async fn list_filters_by_bucket() {
    let (engine, ids) = seeded().await;

    let running = engine
        .list(&ListQuery {
            running: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(running.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[0]]);

    let finished_or_queued = engine
        .list(&ListQuery {
            finished: true,
            queued: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        finished_or_queued.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[1], ids[2]]
    );

    let all = engine.list(&ListQuery::default()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn list_orders_and_paginates() {
    let (engine, ids) = seeded().await;

    let by_priority = engine
        .list(&ListQuery {
            ordering: OrderBy::parse_list("priority:desc").unwrap(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        by_priority.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[2], ids[0], ids[1]]
    );

    let page = engine
        .list(&ListQuery {
            ordering: vec![OrderBy::new(SortColumn::Priority, Direction::Asc)],
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[0]);
}
