// End-to-end pipeline behavior against a well-behaved stub application.
use bytes::Bytes;
use keel_client::{BlockHeader, Client, QueryParams, Response, Validator, CODE_OK};
use keel_test_harness::{AppBehavior, StubApp};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

async fn started_client(behavior: AppBehavior) -> (StubApp, Client) {
    let app = StubApp::spawn(behavior).await.expect("stub app");
    let client = Client::new(&app.addr(), true).expect("client");
    client.start().await.expect("start");
    (app, client)
}

#[tokio::test]
async fn async_pipeline_with_explicit_flush() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    let first = client.echo_async("a").await.expect("enqueue");
    let second = client.echo_async("b").await.expect("enqueue");
    client.flush().await.expect("flush");

    // Flush completing implies every earlier request is answered.
    assert!(first.is_done());
    assert!(second.is_done());
    assert_eq!(
        first.response(),
        Some(Response::Echo {
            message: "a".to_string()
        })
    );
    assert_eq!(
        second.response(),
        Some(Response::Echo {
            message: "b".to_string()
        })
    );
    client.stop();
}

#[tokio::test]
async fn timer_driven_flush_completes_without_explicit_flush() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    // No flush issued: the 20ms throttle timer injects one.
    let handle = client.echo_async("x").await.expect("enqueue");
    timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("timer must flush the pipeline");
    assert_eq!(
        handle.response(),
        Some(Response::Echo {
            message: "x".to_string()
        })
    );
    client.stop();
}

#[tokio::test]
async fn responses_arrive_in_submission_order() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    let handles = vec![
        client.echo_async("one").await.expect("enqueue"),
        client.echo_async("two").await.expect("enqueue"),
        client.echo_async("three").await.expect("enqueue"),
    ];
    client.flush().await.expect("flush");

    let expected = ["one", "two", "three"];
    for (handle, expected) in handles.iter().zip(expected) {
        assert_eq!(
            handle.response(),
            Some(Response::Echo {
                message: expected.to_string()
            })
        );
    }
    client.stop();
}

#[tokio::test]
async fn every_operation_round_trips() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    assert_eq!(client.echo("hello").await.expect("echo"), "hello");

    let info = client.info("0.1.0").await.expect("info");
    assert_eq!(info.version, "0.1.0");

    let log = client.set_option("key", "value").await.expect("set_option");
    assert_eq!(log, "key=value");

    let delivered = client
        .deliver_tx(Bytes::from_static(b"tx-1"))
        .await
        .expect("deliver_tx");
    assert!(delivered.is_ok());
    assert_eq!(delivered.data, Bytes::from_static(b"tx-1"));

    let checked = client
        .check_tx(Bytes::from_static(b"tx-2"))
        .await
        .expect("check_tx");
    assert_eq!(checked.code, CODE_OK);

    let committed = client.commit().await.expect("commit");
    assert!(committed.is_ok());

    let queried = client
        .query(QueryParams {
            data: Bytes::from_static(b"lookup"),
            path: "/store".to_string(),
            height: 7,
            prove: false,
        })
        .await
        .expect("query");
    assert_eq!(queried.value, Bytes::from_static(b"lookup"));
    assert_eq!(queried.height, 7);

    client
        .init_chain(vec![Validator {
            pub_key: Bytes::from_static(b"key"),
            power: 10,
        }])
        .await
        .expect("init_chain");

    client
        .begin_block(
            Bytes::from_static(b"block-hash"),
            BlockHeader {
                chain_id: "test-chain".to_string(),
                height: 1,
                time: 0,
                num_txs: 0,
                app_hash: Bytes::new(),
            },
        )
        .await
        .expect("begin_block");

    let updates = client.end_block(1).await.expect("end_block");
    assert!(updates.is_empty());

    assert!(client.error().is_none());
    client.stop();
}

#[tokio::test]
async fn response_listener_sees_pairs_in_order() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    let seen: Arc<Mutex<Vec<(&'static str, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_cb = seen.clone();
    client.set_response_callback(move |request, response| {
        seen_in_cb
            .lock()
            .unwrap()
            .push((request.kind(), response.kind()));
    });

    client.echo("observed").await.expect("echo");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("Echo", "Echo"), ("Flush", "Flush")]);
    client.stop();
}

#[tokio::test]
async fn per_request_callback_fires_with_the_response() {
    let (_app, client) = started_client(AppBehavior::Normal).await;

    let handle = client.echo_async("cb").await.expect("enqueue");
    let got: Arc<Mutex<Option<Response>>> = Arc::new(Mutex::new(None));
    let got_in_cb = got.clone();
    handle.set_callback(Arc::new(move |response| {
        *got_in_cb.lock().unwrap() = Some(response.clone());
    }));

    client.flush().await.expect("flush");
    assert_eq!(
        got.lock().unwrap().clone(),
        Some(Response::Echo {
            message: "cb".to_string()
        })
    );
    client.stop();
}
