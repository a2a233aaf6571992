//! End-to-end endpoint tests over the in-process cluster

use cascade_rpc::{handler_fn, stateful_handler_fn, EndpointConfig, EndpointError, LocalCluster};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sum_handler() -> cascade_rpc::HandlerFactory {
    handler_fn(|(a, b): (i32, i32)| async move { Ok(a + b) })
}

#[tokio::test]
async fn test_sum_endpoint() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    server.new_endpoint("sum", sum_handler()).await.unwrap();

    let endpoint = client.get_endpoint("sum").await.unwrap();
    let response: i32 = endpoint.call(&(10, 20)).await.unwrap();
    assert_eq!(response, 30);

    server.shutdown();
    client.shutdown();
}

#[tokio::test]
async fn test_duplicate_name_fails_without_breaking_original() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    server.new_endpoint("sum", sum_handler()).await.unwrap();
    let err = server.new_endpoint("sum", sum_handler()).await.unwrap_err();
    assert!(matches!(err, EndpointError::DuplicateName(_)));

    // The original endpoint still answers.
    let endpoint = client.get_endpoint("sum").await.unwrap();
    let response: i32 = endpoint.call(&(1, 2)).await.unwrap();
    assert_eq!(response, 3);
}

#[tokio::test]
async fn test_get_unknown_endpoint() {
    let cluster = LocalCluster::new();
    let _server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    let err = client.get_endpoint("missing").await.unwrap_err();
    assert!(matches!(err, EndpointError::NotFound(_)));
}

#[tokio::test]
async fn test_handler_failure_reaches_caller() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    server
        .new_endpoint(
            "div",
            handler_fn(|(a, b): (i32, i32)| async move {
                if b == 0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            }),
        )
        .await
        .unwrap();

    let endpoint = client.get_endpoint("div").await.unwrap();
    let ok: i32 = endpoint.call(&(10, 2)).await.unwrap();
    assert_eq!(ok, 5);

    match endpoint.call::<_, i32>(&(1, 0)).await {
        Err(EndpointError::Handler(msg)) => assert_eq!(msg, "division by zero"),
        other => panic!("expected handler failure, got {other:?}"),
    }

    // The worker survived the failure.
    let ok: i32 = endpoint.call(&(9, 3)).await.unwrap();
    assert_eq!(ok, 3);
}

#[tokio::test]
async fn test_concurrent_calls_correlate() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(4));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    // Later requests answer faster, so responses come back out of order.
    server
        .new_endpoint(
            "echo",
            handler_fn(|n: u64| async move {
                tokio::time::sleep(Duration::from_millis(64u64.saturating_sub(n))).await;
                Ok(n)
            }),
        )
        .await
        .unwrap();

    let endpoint = client.get_endpoint("echo").await.unwrap();
    let calls: Vec<_> = (0..32u64)
        .map(|n| (n, endpoint.call_async::<u64, u64>(&n).unwrap()))
        .collect();
    for (n, call) in calls {
        assert_eq!(call.await.unwrap(), n);
    }
}

#[tokio::test]
async fn test_requests_fan_out_across_workers() {
    let cluster = LocalCluster::new();
    let workers = 4;
    let requests = 32u64;
    let server = cluster.add_member(EndpointConfig::with_workers(workers));

    // Each worker's handler context registers itself, so per-worker
    // servicing counts are observable from the outside. The client joins
    // only after creation so the endpoint lives on the server alone.
    let counters: Arc<parking_lot::Mutex<Vec<Arc<AtomicUsize>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let registry = counters.clone();
    server
        .new_endpoint(
            "count",
            stateful_handler_fn(
                move || {
                    let counter = Arc::new(AtomicUsize::new(0));
                    registry.lock().push(counter.clone());
                    counter
                },
                |counter: Arc<AtomicUsize>, n: u64| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                },
            ),
        )
        .await
        .unwrap();

    let client = cluster.add_member(EndpointConfig::with_workers(2));
    let endpoint = client.get_endpoint("count").await.unwrap();
    for n in 0..requests {
        let echoed: u64 = endpoint.call(&n).await.unwrap();
        assert_eq!(echoed, n);
    }

    // One proxy, one serving member: the dispatcher's round robin must
    // have spread the requests evenly over every worker queue.
    let counts: Vec<usize> = counters
        .lock()
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .collect();
    assert_eq!(counts.len(), workers);
    let per_worker = (requests as usize) / workers;
    assert!(
        counts.iter().all(|&c| c == per_worker),
        "uneven fan-out: {counts:?}"
    );
}

#[tokio::test]
async fn test_duplicate_response_dropped() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    server.new_endpoint("sum", sum_handler()).await.unwrap();
    let endpoint = client.get_endpoint("sum").await.unwrap();

    let call = endpoint.call_async::<_, i32>(&(2, 3)).unwrap();
    let request_id = call.request_id();
    assert_eq!(call.await.unwrap(), 5);

    // Simulated duplicate delivery of the settled response.
    let duplicate = cascade_rpc::wire::ResponsePacket {
        endpoint_id: endpoint.endpoint_id(),
        request_id,
        success: true,
        payload: bytes::Bytes::from(bincode::serialize(&5i32).unwrap()),
    };
    assert!(matches!(
        endpoint.handle_response(duplicate),
        Err(EndpointError::UnknownRequest(_))
    ));

    // And the endpoint still works.
    let again: i32 = endpoint.call(&(4, 4)).await.unwrap();
    assert_eq!(again, 8);
}

#[tokio::test]
async fn test_destroy_fails_in_flight_calls() {
    let cluster = LocalCluster::new();
    let server = cluster.add_member(EndpointConfig::with_workers(2));
    let client = cluster.add_member(EndpointConfig::with_workers(2));

    server
        .new_endpoint(
            "stall",
            handler_fn(|_: u64| async move {
                std::future::pending::<()>().await;
                Ok(0u64)
            }),
        )
        .await
        .unwrap();

    let endpoint = client.get_endpoint("stall").await.unwrap();
    let call = endpoint.call_async::<u64, u64>(&1).unwrap();

    endpoint.destroy();
    endpoint.destroy();

    assert!(matches!(call.await, Err(EndpointError::ProxyDestroyed)));
    assert!(matches!(
        endpoint.call_async::<u64, u64>(&1),
        Err(EndpointError::ProxyDestroyed)
    ));
}

#[tokio::test]
async fn test_three_member_round_robin() {
    let cluster = LocalCluster::new();
    let a = cluster.add_member(EndpointConfig::with_workers(2));
    let b = cluster.add_member(EndpointConfig::with_workers(2));
    let c = cluster.add_member(EndpointConfig::with_workers(2));

    // Created from a: dispatchers live on a, b, and c; a's proxy routes
    // over the two other members.
    let endpoint = a.new_endpoint("sum", sum_handler()).await.unwrap();
    for i in 0..10 {
        let sum: i32 = endpoint.call(&(i, i)).await.unwrap();
        assert_eq!(sum, i * 2);
    }

    // b can reach it as well, through its own proxy.
    let from_b = b.get_endpoint("sum").await.unwrap();
    let sum: i32 = from_b.call(&(20, 22)).await.unwrap();
    assert_eq!(sum, 42);

    drop(c);
}
