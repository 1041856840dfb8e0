//! Realtime client tests against a local event-stream server.
//!
//! The server speaks just enough HTTP/1.1: `GET /api/realtime` gets a
//! `text/event-stream` response whose socket is handed to the test, and every
//! other request is recorded as a subscription body and answered with 204.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tasktide::realtime::client::RealtimeClient;
use tasktide::realtime::connection::ConnectionState;
use tasktide::realtime::{Realtime, RecordEvent};
use tasktide::store::Session;
use tasktide::sync::SubscriptionManager;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

type Timeline = Arc<Mutex<Vec<String>>>;

/// What the server saw, in arrival order.
enum Seen {
    /// An open event stream. Write frames to it; drop it to cut the stream.
    Stream(TcpStream),
    Subscribe(Value),
}

async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    (head, body)
}

/// Start the server. Requests are appended to `timeline` as `GET`/`POST`
/// before they are answered.
async fn serve(timeline: Timeline) -> (String, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let timeline = timeline.clone();
            tokio::spawn(async move {
                let (head, body) = read_request(&mut socket).await;
                if head.starts_with("GET /api/realtime") {
                    timeline.lock().unwrap().push("GET".to_string());
                    socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\n\
                              Content-Type: text/event-stream\r\n\
                              Cache-Control: no-cache\r\n\
                              Connection: close\r\n\r\n",
                        )
                        .await
                        .unwrap();
                    let _ = tx.send(Seen::Stream(socket));
                } else {
                    timeline.lock().unwrap().push("POST".to_string());
                    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    let _ = tx.send(Seen::Subscribe(body));
                    socket
                        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                        .await
                        .unwrap();
                    let _ = socket.shutdown().await;
                }
            });
        }
    });
    (url, rx)
}

async fn next(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("server saw nothing within 5s")
        .expect("server stopped")
}

async fn next_stream(seen: &mut mpsc::UnboundedReceiver<Seen>) -> TcpStream {
    match next(seen).await {
        Seen::Stream(stream) => stream,
        Seen::Subscribe(body) => panic!("expected an event stream, got subscription {}", body),
    }
}

async fn next_subscription(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Value {
    match next(seen).await {
        Seen::Subscribe(body) => body,
        Seen::Stream(_) => panic!("expected a subscription, got an event stream"),
    }
}

async fn send_frame(stream: &mut TcpStream, event: &str, data: Value) {
    let frame = format!("event: {}\ndata: {}\n\n", event, data);
    stream.write_all(frame.as_bytes()).await.unwrap();
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not met within 2s");
}

fn snapshot(timeline: &Timeline) -> Vec<String> {
    timeline.lock().unwrap().clone()
}

fn client(url: &str) -> Arc<RealtimeClient> {
    Arc::new(RealtimeClient::new(
        reqwest::Client::new(),
        url,
        Arc::new(Session::new()),
    ))
}

#[tokio::test]
async fn test_subscribes_dispatches_and_reposts_topics() {
    let timeline = Timeline::default();
    let (url, mut seen) = serve(timeline.clone()).await;
    let client = client(&url);

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    let _todos = client.watch(
        "todos",
        Arc::new(move |_: &RecordEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let _task = client.spawn();

    let mut stream = next_stream(&mut seen).await;
    send_frame(&mut stream, "PB_CONNECT", json!({"clientId": "c1"})).await;
    assert_eq!(
        next_subscription(&mut seen).await,
        json!({"clientId": "c1", "subscriptions": ["todos/*"]})
    );

    let record = json!({"id": "r1", "collectionName": "todos"});
    send_frame(
        &mut stream,
        "todos/*",
        json!({"action": "create", "record": record}),
    )
    .await;
    send_frame(
        &mut stream,
        "todos/*",
        json!({"action": "update", "record": record}),
    )
    .await;
    eventually(|| events.load(Ordering::SeqCst) == 2).await;
    assert_eq!(*client.state().borrow(), ConnectionState::Connected);

    let _comments = client.watch("comments", Arc::new(|_: &RecordEvent| {}));
    assert_eq!(
        next_subscription(&mut seen).await,
        json!({"clientId": "c1", "subscriptions": ["comments/*", "todos/*"]})
    );
    assert_eq!(events.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot(&timeline), ["GET", "POST", "POST"]);
}

#[tokio::test]
async fn test_refresh_follows_resubscribe_after_reconnect() {
    let timeline = Timeline::default();
    let (url, mut seen) = serve(timeline.clone()).await;
    let client = client(&url);

    let log = timeline.clone();
    let manager = Arc::new(SubscriptionManager::new(
        client.clone(),
        Arc::new(move || log.lock().unwrap().push("REFRESH".to_string())),
    ));
    manager.watch("todos");
    manager.listen_for_signals();
    let _task = client.spawn();

    let mut first = next_stream(&mut seen).await;
    send_frame(&mut first, "PB_CONNECT", json!({"clientId": "c1"})).await;
    next_subscription(&mut seen).await;
    eventually(|| timeline.lock().unwrap().len() == 3).await;
    assert_eq!(snapshot(&timeline), ["GET", "POST", "REFRESH"]);

    drop(first);
    let mut second = next_stream(&mut seen).await;
    // Losing the stream alone must not refresh: nothing is subscribed yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(snapshot(&timeline), ["GET", "POST", "REFRESH", "GET"]);

    send_frame(&mut second, "PB_CONNECT", json!({"clientId": "c2"})).await;
    assert_eq!(
        next_subscription(&mut seen).await,
        json!({"clientId": "c2", "subscriptions": ["todos/*"]})
    );
    eventually(|| timeline.lock().unwrap().len() == 6).await;
    assert_eq!(
        snapshot(&timeline),
        ["GET", "POST", "REFRESH", "GET", "POST", "REFRESH"]
    );
    assert_eq!(manager.watched().as_deref(), Some("todos"));
}
