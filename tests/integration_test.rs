//! Integration tests for toolgate
//!
//! Drive the dispatcher end to end through the public API.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use toolgate::tools::builtin::register_builtins;
use toolgate::tools::{AutoApprove, AutoDeny};
use toolgate::{
    ApprovalConfig, DispatchConfig, Dispatcher, Event, EventEmitter, EventStream, EventType,
    RetryPolicy, Tool, ToolCall, ToolError, ToolRegistry,
};

/// Tool that counts invocations and returns its `n` argument after `delay_ms`
fn counting_tool(name: &str, invocations: Arc<AtomicUsize>) -> Tool {
    Tool::from_fn(name, format!("{} tool", name), move |_cancel, args| {
        let invocations = invocations.clone();
        async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            let args: Value = serde_json::from_str(&args)?;
            if let Some(ms) = args.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok::<Value, ToolError>(args.get("n").cloned().unwrap_or(Value::Null))
        }
    })
}

fn dispatcher_with(config: DispatchConfig) -> (Dispatcher, EventStream) {
    let (emitter, stream) = EventEmitter::new();
    (Dispatcher::new(config, emitter), stream)
}

fn kinds(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

fn count(events: &[Event], kind: EventType) -> usize {
    events.iter().filter(|e| e.event_type == kind).count()
}

#[tokio::test]
async fn test_mixed_batch_allowed_denied_unknown() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(counting_tool("A", invocations.clone())).unwrap();
    registry.register(counting_tool("B", invocations.clone())).unwrap();

    let config = DispatchConfig::new(registry)
        .with_approval(ApprovalConfig::for_tools(["B"]).with_handler(AutoDeny));
    let (dispatcher, mut stream) = dispatcher_with(config);

    let calls = vec![
        ToolCall::new("1", "A").with_arg("n", "alpha"),
        ToolCall::new("2", "B").with_arg("n", "beta"),
        ToolCall::new("3", "C"),
    ];
    let results = dispatcher.execute_batch(&calls).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].content, "alpha");
    assert!(results[1].content.contains("denied"));
    assert!(results[2].content.contains("not found"));
    assert!(results[2].content.contains("C"));
    assert_eq!(
        results.iter().map(|r| r.tool_call_id.as_str()).collect::<Vec<_>>(),
        vec!["1", "2", "3"]
    );

    let events = stream.drain();
    assert_eq!(count(&events, EventType::ExecutionError), 0);
    assert_eq!(count(&events, EventType::ApprovalDenied), 1);
    assert_eq!(count(&events, EventType::ToolNotFound), 1);
    assert_eq!(
        kinds(&events),
        vec![
            EventType::ExecutionStarted,
            EventType::ExecutionSuccess,
            EventType::ApprovalRequested,
            EventType::ApprovalDenied,
            EventType::ToolNotFound,
        ]
    );

    // Only A ran
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_keep_input_order() {
    for parallel in [false, true] {
        for n in [0usize, 1, 7, 20] {
            let invocations = Arc::new(AtomicUsize::new(0));
            let registry = ToolRegistry::new()
                .with_tool(counting_tool("work", invocations.clone()))
                .unwrap();
            let mut config = DispatchConfig::new(registry);
            if parallel {
                config = config.with_parallel(3);
            }
            let (dispatcher, _stream) = dispatcher_with(config);

            // Later calls finish first
            let calls: Vec<ToolCall> = (0..n)
                .map(|i| {
                    ToolCall::new(format!("call-{}", i), "work")
                        .with_arg("n", i as u64)
                        .with_arg("delay_ms", ((n - i) * 3) as u64)
                })
                .collect();

            let results = dispatcher.execute_batch(&calls).await;
            assert_eq!(results.len(), n, "parallel={} n={}", parallel, n);
            for (i, result) in results.iter().enumerate() {
                assert_eq!(result.tool_call_id, format!("call-{}", i));
                assert_eq!(result.content, i.to_string());
            }
            assert_eq!(invocations.load(Ordering::SeqCst), n);
        }
    }
}

#[tokio::test]
async fn test_unknown_tool_never_invokes_handlers() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = ToolRegistry::new()
        .with_tool(counting_tool("known", invocations.clone()))
        .unwrap();
    let (dispatcher, mut stream) = dispatcher_with(DispatchConfig::new(registry).with_parallel(2));

    let calls = vec![ToolCall::new("x", "mystery_tool"), ToolCall::new("y", "other_missing")];
    let results = dispatcher.execute_batch(&calls).await;

    assert!(results[0].content.contains("mystery_tool"));
    assert!(results[1].content.contains("other_missing"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(count(&stream.drain(), EventType::ToolNotFound), 2);
}

#[tokio::test]
async fn test_missing_approval_handler_always_denies() {
    let policies = vec![
        ApprovalConfig::all(),
        ApprovalConfig::for_tools(["guarded"]),
        ApprovalConfig {
            all_tools: true,
            ..ApprovalConfig::for_tools(["guarded"])
        },
    ];

    for approval in policies {
        let invocations = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new()
            .with_tool(counting_tool("guarded", invocations.clone()))
            .unwrap();
        let (dispatcher, mut stream) =
            dispatcher_with(DispatchConfig::new(registry).with_approval(approval));

        let results = dispatcher.execute_batch(&[ToolCall::new("1", "guarded")]).await;

        assert!(results[0].content.contains("no approval handler configured"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        let events = stream.drain();
        assert_eq!(
            kinds(&events),
            vec![EventType::ApprovalRequested, EventType::ApprovalDenied]
        );
    }
}

#[tokio::test]
async fn test_approval_decisions() {
    // (approval config, expect handler to run)
    let cases: Vec<(ApprovalConfig, bool)> = vec![
        (ApprovalConfig::all().with_handler(AutoApprove), true),
        (ApprovalConfig::all().with_handler(AutoDeny), false),
        (
            ApprovalConfig::all().with_handler_fn(|_req| async {
                Err(ToolError::Approval("approver crashed".to_string()))
            }),
            false,
        ),
    ];

    for (approval, should_run) in cases {
        let invocations = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new()
            .with_tool(counting_tool("op", invocations.clone()))
            .unwrap();
        let (dispatcher, mut stream) =
            dispatcher_with(DispatchConfig::new(registry).with_approval(approval));

        let results = dispatcher
            .execute_batch(&[ToolCall::new("1", "op").with_arg("n", "done")])
            .await;
        let events = stream.drain();

        if should_run {
            assert_eq!(results[0].content, "done");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            assert_eq!(count(&events, EventType::ApprovalGranted), 1);
        } else {
            assert!(results[0].content.starts_with("Error: "));
            assert_eq!(invocations.load(Ordering::SeqCst), 0);
            assert_eq!(count(&events, EventType::ApprovalDenied), 1);
            assert_eq!(count(&events, EventType::ExecutionStarted), 0);
        }
    }
}

#[tokio::test]
async fn test_approval_request_fields() {
    let registry = ToolRegistry::new()
        .with_tool(counting_tool("write", Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let config = DispatchConfig::new(registry)
        .with_conversation_id("conv-42")
        .with_approval(ApprovalConfig::for_tools(["write"]).with_handler(AutoApprove));
    let (dispatcher, mut stream) = dispatcher_with(config);

    dispatcher
        .execute_batch(&[ToolCall::new("w1", "write").with_arg("path", "notes.txt")])
        .await;

    let events = stream.drain();
    let requested = events
        .iter()
        .find(|e| e.event_type == EventType::ApprovalRequested)
        .unwrap();
    assert_eq!(requested.get("conversation_id"), Some(&json!("conv-42")));
    assert_eq!(requested.get("call_id"), Some(&json!("w1")));
    assert_eq!(requested.get("description"), Some(&json!("write tool")));
    assert_eq!(requested.get("arguments"), Some(&json!({"path": "notes.txt"})));
}

#[tokio::test]
async fn test_panicking_approver_is_a_denial() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = ToolRegistry::new()
        .with_tool(counting_tool("guarded", invocations.clone()))
        .unwrap();
    let approval = ApprovalConfig::all().with_handler_fn(|_req| async {
        if true {
            panic!("approver exploded");
        }
        Ok(true)
    });
    let (dispatcher, mut stream) =
        dispatcher_with(DispatchConfig::new(registry).with_approval(approval));

    let results = dispatcher.execute_batch(&[ToolCall::new("1", "guarded")]).await;

    assert!(results[0].content.contains("denied"));
    assert!(results[0].content.contains("approval handler panicked: approver exploded"));
    assert!(!results[0].content.contains("tool handler panicked"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(
        kinds(&stream.drain()),
        vec![EventType::ApprovalRequested, EventType::ApprovalDenied]
    );
    assert_eq!(dispatcher.stats().denied, 1);
}

#[tokio::test]
async fn test_handler_timeout_error_is_a_plain_failure() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let upstream = Tool::from_fn("upstream", "Calls a slow service", move |_c, _a| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Err::<Value, ToolError>(ToolError::Timeout { duration_ms: 3 })
        }
    });

    let config = DispatchConfig::new(ToolRegistry::new().with_tool(upstream).unwrap())
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)).with_jitter(false));
    let (dispatcher, mut stream) = dispatcher_with(config);

    let results = dispatcher.execute_batch(&[ToolCall::new("1", "upstream")]).await;

    // No per-call timeout configured: the handler's own error is retried like any failure
    assert_eq!(results[0].content, "Error: tool call timed out after 3ms");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.stats().retry_attempts, 1);
    let error = stream.drain().pop().unwrap();
    assert_eq!(error.get("cause"), Some(&json!("failure")));
}

#[tokio::test]
async fn test_retry_until_success() {
    const SUCCEED_ON: usize = 3;
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let flaky = Tool::from_fn("flaky", "Fails a few times", move |_c, _a| {
        let seen = seen.clone();
        async move {
            let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < SUCCEED_ON {
                Err(ToolError::execution(format!("attempt {} failed", attempt)))
            } else {
                Ok(json!({ "attempt": attempt }))
            }
        }
    });

    let config = DispatchConfig::new(ToolRegistry::new().with_tool(flaky).unwrap())
        .with_retry(RetryPolicy::new(5, Duration::from_millis(2)).with_jitter(false));
    let (dispatcher, mut stream) = dispatcher_with(config);

    let results = dispatcher.execute_batch(&[ToolCall::new("1", "flaky")]).await;

    assert_eq!(results[0].content, r#"{"attempt":3}"#);
    assert_eq!(invocations.load(Ordering::SeqCst), SUCCEED_ON);
    assert_eq!(dispatcher.stats().retry_attempts, 2);

    // Retries are internal: one start, one terminal event
    assert_eq!(
        kinds(&stream.drain()),
        vec![EventType::ExecutionStarted, EventType::ExecutionSuccess]
    );
}

#[tokio::test]
async fn test_retry_exhaustion_reports_last_error() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let broken = Tool::from_fn("broken", "Always fails", move |_c, _a| {
        let seen = seen.clone();
        async move {
            let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<Value, ToolError>(ToolError::execution(format!("attempt {} failed", attempt)))
        }
    });

    let config = DispatchConfig::new(ToolRegistry::new().with_tool(broken).unwrap())
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)).with_jitter(false));
    let (dispatcher, mut stream) = dispatcher_with(config);

    let results = dispatcher.execute_batch(&[ToolCall::new("1", "broken")]).await;

    assert_eq!(results[0].content, "Error: attempt 2 failed");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let error = stream.drain().pop().unwrap();
    assert_eq!(error.event_type, EventType::ExecutionError);
    assert_eq!(error.get("cause"), Some(&json!("failure")));
}

#[tokio::test]
async fn test_timeout_is_reported_as_timeout() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry).unwrap();
    let config = DispatchConfig::new(registry).with_timeout(Duration::from_millis(50));
    let (dispatcher, mut stream) = dispatcher_with(config);

    let started = Instant::now();
    let results = dispatcher
        .execute_batch(&[ToolCall::new("1", "sleep").with_arg("ms", 10_000)])
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(results[0].content.contains("timed out after 50ms"));

    let error = stream.drain().pop().unwrap();
    assert_eq!(error.get("cause"), Some(&json!("timeout")));
}

#[tokio::test]
async fn test_timeout_covers_all_attempts() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = invocations.clone();
    let slow_fail = Tool::from_fn("slow_fail", "Fails slowly", move |_c, _a| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<Value, ToolError>(ToolError::execution("nope"))
        }
    });

    let config = DispatchConfig::new(ToolRegistry::new().with_tool(slow_fail).unwrap())
        .with_retry(RetryPolicy::new(100, Duration::from_millis(1)).with_jitter(false))
        .with_timeout(Duration::from_millis(100));
    let (dispatcher, _stream) = dispatcher_with(config);

    let results = dispatcher.execute_batch(&[ToolCall::new("1", "slow_fail")]).await;

    assert!(results[0].content.contains("timed out"));
    // Per-call budget, not per attempt: only a handful of attempts fit
    assert!(invocations.load(Ordering::SeqCst) <= 5);
}

#[tokio::test]
async fn test_approval_wait_not_counted_against_timeout() {
    let registry = ToolRegistry::new()
        .with_tool(counting_tool("quick", Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let approval = ApprovalConfig::all().with_handler_fn(|_req| async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(true)
    });
    let config = DispatchConfig::new(registry)
        .with_approval(approval)
        .with_timeout(Duration::from_millis(50));
    let (dispatcher, _stream) = dispatcher_with(config);

    let results = dispatcher
        .execute_batch(&[ToolCall::new("1", "quick").with_arg("n", "ok")])
        .await;
    assert_eq!(results[0].content, "ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_respects_concurrency_bound() {
    const K: usize = 3;
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tool = {
        let current = current.clone();
        let peak = peak.clone();
        Tool::from_fn("overlap", "Records overlap", move |_c, _a| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    };

    let config = DispatchConfig::new(ToolRegistry::new().with_tool(tool).unwrap()).with_parallel(K);
    let (dispatcher, _stream) = dispatcher_with(config);

    let calls: Vec<ToolCall> = (0..12)
        .map(|i| ToolCall::new(i.to_string(), "overlap"))
        .collect();
    let results = dispatcher.execute_batch(&calls).await;

    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r.content == "null"));
    let observed = peak.load(Ordering::SeqCst);
    assert!(observed <= K, "observed {} concurrent handlers", observed);
    assert!(observed >= 2, "parallel mode never overlapped");
    assert!(dispatcher.stats().peak_in_flight <= K);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_events_one_terminal_per_call() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry).unwrap();
    let config = DispatchConfig::new(registry).with_parallel(4);
    let (dispatcher, mut stream) = dispatcher_with(config);

    let calls: Vec<ToolCall> = (0..8)
        .map(|i| ToolCall::new(format!("c{}", i), "sleep").with_arg("ms", (8 - i) * 2))
        .collect();
    dispatcher.execute_batch(&calls).await;

    let events = stream.drain();
    for call in &calls {
        let terminal = events
            .iter()
            .filter(|e| e.call_id() == Some(call.id.as_str()) && e.event_type.is_terminal())
            .count();
        assert_eq!(terminal, 1, "call {}", call.id);
    }
}

#[tokio::test]
async fn test_ambient_cancellation_mid_batch() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry).unwrap();
    let config = DispatchConfig::new(registry).with_parallel(2);
    let (dispatcher, mut stream) = dispatcher_with(config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let calls: Vec<ToolCall> = (0..4)
        .map(|i| ToolCall::new(i.to_string(), "sleep").with_arg("ms", 10_000))
        .collect();
    let started = Instant::now();
    let results = dispatcher.execute(&cancel, &calls).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(results.len(), 4);
    for result in &results {
        assert_eq!(result.content, "Error: tool call cancelled");
    }

    let events = stream.drain();
    let errors: Vec<&Event> = events
        .iter()
        .filter(|e| e.event_type == EventType::ExecutionError)
        .collect();
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.get("cause") == Some(&json!("cancelled"))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_panic_is_contained() {
    let boom = Tool::from_fn("boom", "Panics", |_c, _a| async {
        if true {
            panic!("kaboom");
        }
        Ok(Value::Null)
    });
    let mut registry = ToolRegistry::new().with_tool(boom).unwrap();
    register_builtins(&mut registry).unwrap();
    let (dispatcher, mut stream) = dispatcher_with(DispatchConfig::new(registry).with_parallel(2));

    let calls = vec![
        ToolCall::new("1", "echo").with_arg("v", 1),
        ToolCall::new("2", "boom"),
        ToolCall::new("3", "echo").with_arg("v", 3),
    ];
    let results = dispatcher.execute_batch(&calls).await;

    assert_eq!(results[0].content, r#"{"v":1}"#);
    assert!(results[1].content.contains("kaboom"));
    assert_eq!(results[2].content, r#"{"v":3}"#);

    let panic_event = stream
        .drain()
        .into_iter()
        .find(|e| e.event_type == EventType::ExecutionError)
        .unwrap();
    assert_eq!(panic_event.get("cause"), Some(&json!("panic")));
}

#[tokio::test]
async fn test_single_call_same_under_both_modes() {
    let mut outputs = Vec::new();
    for parallel in [false, true] {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        let mut config = DispatchConfig::new(registry);
        if parallel {
            config = config.with_parallel(4);
        }
        let (dispatcher, mut stream) = dispatcher_with(config);

        let results = dispatcher
            .execute_batch(&[ToolCall::new("1", "echo").with_arg("k", "v")])
            .await;
        outputs.push((results, kinds(&stream.drain())));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn test_registry_changes_between_batches() {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry).unwrap();

    let first = Dispatcher::new(DispatchConfig::new(registry.clone()), EventEmitter::disabled());
    let call = ToolCall::new("1", "echo");
    assert_eq!(first.execute_batch(&[call.clone()]).await[0].content, "{}");

    registry.unregister("echo");
    let second = Dispatcher::new(DispatchConfig::new(registry), EventEmitter::disabled());
    assert!(second.execute_batch(&[call]).await[0].content.contains("not found"));
}
