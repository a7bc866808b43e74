//! End-to-end request lifecycle against the in-memory fabric.

use bytes::Bytes;
use queue::{encode, Job, Queue, QueueError, QueueOptions, Reply, RequestContext};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use transport::{MemoryTransport, Transport};

const RESULT_WAIT: Duration = Duration::from_secs(5);

fn queue_on(transport: &MemoryTransport, options: QueueOptions) -> Queue {
    Queue::with_transport(options, Arc::new(transport.clone())).unwrap()
}

#[tokio::test]
async fn finished_reply_resolves_the_request() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let _worker = queue
        .process(|job: Job| async move { Ok(json!({"echo": job.request})) })
        .await
        .unwrap();

    let handle = queue.request(json!({"work": 1})).await.unwrap();
    let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
    assert_eq!(response, json!({"echo": {"work": 1}}));
}

#[tokio::test]
async fn progress_arrives_in_order_before_the_result() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let _worker = queue
        .process(|job: Job| async move {
            job.progress(json!(10)).await.map_err(|e| e.to_string())?;
            job.progress(json!(40)).await.map_err(|e| e.to_string())?;
            Ok(json!("done"))
        })
        .await
        .unwrap();

    let mut handle = queue.request(json!({})).await.unwrap();
    assert_eq!(handle.next_progress().await, Some(json!(10)));
    assert_eq!(handle.next_progress().await, Some(json!(40)));
    let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
    assert_eq!(response, json!("done"));
}

#[tokio::test]
async fn null_progress_becomes_an_empty_string() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let _worker = queue
        .process(|job: Job| async move {
            job.progress(Value::Null).await.map_err(|e| e.to_string())?;
            Ok(Value::Null)
        })
        .await
        .unwrap();

    let mut handle = queue.request(json!({})).await.unwrap();
    assert_eq!(handle.next_progress().await, Some(json!("")));
}

#[tokio::test]
async fn handler_error_text_reaches_the_caller_verbatim() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let _worker = queue
        .process(|_job: Job| async move { Err::<Value, _>("handling error".into()) })
        .await
        .unwrap();

    let handle = queue.request(json!({})).await.unwrap();
    let error = timeout(RESULT_WAIT, handle.result())
        .await
        .unwrap()
        .unwrap_err();
    match error {
        QueueError::App(message) => assert_eq!(message, "handling error"),
        other => panic!("expected app error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn request_times_out_when_no_worker_claims_it() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let handle = queue.request(json!({})).await.unwrap();
    let error = handle.result().await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Timeout for queue request to channel: myChannel"
    );
}

#[tokio::test(start_paused = true)]
async fn keep_alive_expires_when_a_worker_claims_and_goes_silent() {
    let transport = MemoryTransport::new();
    let queue = queue_on(
        &transport,
        QueueOptions::new("myChannel").with_timeout(Duration::from_secs(1)),
    );

    // a worker that claims the job and then dies
    let mut sub = transport
        .subscribe("myChannel", Some("myChannel"))
        .await
        .unwrap();
    let fabric = transport.clone();
    tokio::spawn(async move {
        let message = sub.next().await.unwrap();
        let reply_to = message.reply_to.unwrap();
        fabric
            .publish(&reply_to, encode(&Reply::received()).unwrap())
            .await
            .unwrap();
    });

    let handle = queue.request(json!({})).await.unwrap();
    let error = handle.result().await.unwrap_err();
    assert!(
        matches!(&error, QueueError::KeepAliveExpired { .. }),
        "{error}"
    );
}

#[tokio::test(start_paused = true)]
async fn keep_alive_signals_outlast_the_response_timeout() {
    let transport = MemoryTransport::new();
    let queue = queue_on(
        &transport,
        QueueOptions::new("myChannel").with_timeout(Duration::from_secs(1)),
    );

    // a slow worker: claims immediately, pulses every second, finishes
    // long after the one-second response timeout would have fired
    let mut sub = transport
        .subscribe("myChannel", Some("myChannel"))
        .await
        .unwrap();
    let fabric = transport.clone();
    tokio::spawn(async move {
        let message = sub.next().await.unwrap();
        let reply_to = message.reply_to.unwrap();
        fabric
            .publish(&reply_to, encode(&Reply::received()).unwrap())
            .await
            .unwrap();
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            fabric
                .publish(&reply_to, encode(&Reply::keep_alive()).unwrap())
                .await
                .unwrap();
        }
        fabric
            .publish(&reply_to, encode(&Reply::finished(json!("slow result"))).unwrap())
            .await
            .unwrap();
    });

    let handle = queue.request(json!({})).await.unwrap();
    let response = handle.result().await.unwrap();
    assert_eq!(response, json!("slow result"));
}

#[tokio::test]
async fn unparseable_reply_rejects_the_request() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let mut sub = transport
        .subscribe("myChannel", Some("myChannel"))
        .await
        .unwrap();
    let fabric = transport.clone();
    tokio::spawn(async move {
        let message = sub.next().await.unwrap();
        let reply_to = message.reply_to.unwrap();
        fabric
            .publish(&reply_to, Bytes::from_static(b"%%% not base64 %%%"))
            .await
            .unwrap();
    });

    let handle = queue.request(json!({})).await.unwrap();
    let error = timeout(RESULT_WAIT, handle.result())
        .await
        .unwrap()
        .unwrap_err();
    match error {
        QueueError::Malformed { channel, raw } => {
            assert_eq!(channel, "myChannel");
            assert_eq!(raw, "%%% not base64 %%%");
        }
        other => panic!("expected malformed error, got {other}"),
    }
}

#[tokio::test]
async fn replies_without_a_recognized_status_are_discarded() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let mut sub = transport
        .subscribe("myChannel", Some("myChannel"))
        .await
        .unwrap();
    let fabric = transport.clone();
    tokio::spawn(async move {
        let message = sub.next().await.unwrap();
        let reply_to = message.reply_to.unwrap();
        // decodable, but not a reply this protocol knows; must not settle
        fabric
            .publish(
                &reply_to,
                encode(&json!({"status": "no-existing-status"})).unwrap(),
            )
            .await
            .unwrap();
        fabric
            .publish(&reply_to, encode(&json!({"other": "shape"})).unwrap())
            .await
            .unwrap();
        fabric
            .publish(&reply_to, encode(&Reply::finished(json!("response"))).unwrap())
            .await
            .unwrap();
    });

    let handle = queue.request(json!({})).await.unwrap();
    let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
    assert_eq!(response, json!("response"));
}

#[tokio::test]
async fn late_duplicate_replies_do_not_resettle() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let mut sub = transport
        .subscribe("myChannel", Some("myChannel"))
        .await
        .unwrap();
    let fabric = transport.clone();
    tokio::spawn(async move {
        let message = sub.next().await.unwrap();
        let reply_to = message.reply_to.unwrap();
        fabric
            .publish(&reply_to, encode(&Reply::finished(json!("first"))).unwrap())
            .await
            .unwrap();
        // a buggy worker completing twice; both land on a settled request
        fabric
            .publish(&reply_to, encode(&Reply::finished(json!("second"))).unwrap())
            .await
            .unwrap();
        fabric
            .publish(&reply_to, encode(&Reply::error("late failure")).unwrap())
            .await
            .unwrap();
    });

    let handle = queue.request(json!({})).await.unwrap();
    let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
    assert_eq!(response, json!("first"));
}

#[tokio::test]
async fn request_context_propagates_to_the_handler() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel"));

    let _worker = queue
        .process(|job: Job| async move {
            Ok(json!({"seen_id": job.context.request_id()}))
        })
        .await
        .unwrap();

    let context = RequestContext::with_request_id("abc-123");
    let handle = queue
        .request_with_context(json!({}), &context)
        .await
        .unwrap();
    let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
    assert_eq!(response, json!({"seen_id": "abc-123"}));
}

#[tokio::test]
async fn notifications_broadcast_to_every_listener() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("events"));

    let (first_tx, mut first_rx) = tokio::sync::mpsc::unbounded_channel();
    let _first = queue
        .subscribe(move |data, _context| {
            let tx = first_tx.clone();
            async move {
                let _ = tx.send(data);
            }
        })
        .await
        .unwrap();

    let (second_tx, mut second_rx) = tokio::sync::mpsc::unbounded_channel();
    let _second = queue
        .subscribe(move |data, _context| {
            let tx = second_tx.clone();
            async move {
                let _ = tx.send(data);
            }
        })
        .await
        .unwrap();

    queue.publish(json!({"event": "created"})).await.unwrap();

    let seen = timeout(RESULT_WAIT, first_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, json!({"event": "created"}));
    let seen = timeout(RESULT_WAIT, second_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, json!({"event": "created"}));
}

#[tokio::test]
async fn notification_listeners_leave_request_jobs_to_workers() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("myChannel").with_workers(2));

    let _worker = queue
        .process(|_job: Job| async move { Ok(json!("handled")) })
        .await
        .unwrap();

    // a listener on the same channel observes but must not claim jobs
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _listener = queue
        .subscribe(move |data, _context| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(data);
            }
        })
        .await
        .unwrap();

    for round in 0..2 {
        let handle = queue.request(json!({"round": round})).await.unwrap();
        let response = timeout(RESULT_WAIT, handle.result()).await.unwrap().unwrap();
        assert_eq!(response, json!("handled"));
        let seen = timeout(RESULT_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(seen, json!({"round": round}));
    }
}

#[tokio::test]
async fn published_notifications_reach_the_listener_with_context() {
    let transport = MemoryTransport::new();
    let queue = queue_on(&transport, QueueOptions::new("events"));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _listener = queue
        .subscribe(move |data, context| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((data, context.request_id().map(str::to_string)));
            }
        })
        .await
        .unwrap();

    let context = RequestContext::with_request_id("notify-1");
    queue
        .publish_with_context(json!({"event": "created"}), &context)
        .await
        .unwrap();

    let (data, request_id) = timeout(RESULT_WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(data, json!({"event": "created"}));
    assert_eq!(request_id.as_deref(), Some("notify-1"));
}
