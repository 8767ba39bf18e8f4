//! Directory Server over real TCP: registration, LIST visibility and cleanup.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use share_core::Channel;
use share_directory::{Config, DirectoryServer, SharedRegistry};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct Running {
    addr: SocketAddr,
    registry: SharedRegistry,
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn start() -> Running {
    let cfg = Config {
        bind: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        ..Config::default()
    };
    let server = DirectoryServer::bind(&cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        registry,
        stop,
        handle,
    }
}

async fn open(addr: SocketAddr) -> Channel<TcpStream> {
    Channel::new(TcpStream::connect(addr).await.unwrap())
}

async fn call(ch: &mut Channel<TcpStream>, req: Value) -> Value {
    ch.send(&req).await.unwrap();
    ch.receive().await.unwrap().expect("server closed the connection")
}

fn connect_req(name: &str, port: u16, files: &[&str]) -> Value {
    json!({
        "method": "CONNECT",
        "username": name,
        "hostname": format!("127.0.0.1:{}", port),
        "speed": "gigabit",
        "files": files.iter().map(|f| json!({"filename": f})).collect::<Vec<_>>(),
    })
}

/// Poll until the registry holds `n` peers.
async fn wait_for_peers(registry: &SharedRegistry, n: usize) {
    for _ in 0..200 {
        if registry.lock().await.len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached {} peers", n);
}

#[tokio::test]
async fn requests_before_connect_are_rejected_without_closing() {
    let srv = start().await;
    let mut ch = open(srv.addr).await;
    let reply = call(&mut ch, json!({"method": "LIST"})).await;
    let err = reply["error"].as_str().unwrap();
    assert!(err.contains("CONNECT"), "{}", err);
    let reply = call(&mut ch, json!({"method": "LIST"})).await;
    assert!(reply.get("error").is_some());
    let reply = call(&mut ch, connect_req("a", 9001, &["a.txt"])).await;
    assert!(reply.get("success").is_some(), "{}", reply);
}

#[tokio::test]
async fn protocol_errors_keep_connection_open() {
    let srv = start().await;
    let mut ch = open(srv.addr).await;
    let reply = call(&mut ch, json!({"username": "no method"})).await;
    assert!(reply["error"].as_str().unwrap().contains("method"));
    let reply = call(&mut ch, json!({"method": "FETCH"})).await;
    let err = reply["error"].as_str().unwrap();
    assert!(err.contains("CONNECT, LIST, KEYWORD"), "{}", err);
    let reply = call(&mut ch, json!({"method": "CONNECT", "username": "x"})).await;
    assert!(reply.get("error").is_some());
    let reply = call(
        &mut ch,
        json!({"method": "CONNECT", "username": "x", "hostname": "nohost", "speed": "dsl", "files": []}),
    )
    .await;
    assert!(reply["error"].as_str().unwrap().contains("hostname"));
    assert_eq!(srv.registry.lock().await.len(), 0);
    let reply = call(&mut ch, connect_req("x", 9001, &[])).await;
    assert!(reply.get("success").is_some());
}

#[tokio::test]
async fn second_connect_is_already_registered() {
    let srv = start().await;
    let mut ch = open(srv.addr).await;
    call(&mut ch, connect_req("a", 9001, &["a.txt"])).await;
    let reply = call(&mut ch, connect_req("a", 9001, &["b.txt"])).await;
    assert!(reply["error"].as_str().unwrap().contains("already registered"));
    assert_eq!(srv.registry.lock().await.len(), 1);
}

#[tokio::test]
async fn method_names_are_case_insensitive_but_exact() {
    let srv = start().await;
    let mut ch = open(srv.addr).await;
    let mut req = connect_req("a", 9001, &["a.txt"]);
    req["method"] = json!("connect");
    assert!(call(&mut ch, req).await.get("success").is_some());
    let reply = call(&mut ch, json!({"method": "list"})).await;
    assert!(reply.is_array());
    let reply = call(&mut ch, json!({"method": "LISTALL"})).await;
    assert!(reply.get("error").is_some());
}

#[tokio::test]
async fn list_sees_exactly_the_other_peers() {
    let srv = start().await;
    const N: u16 = 8;
    let mut joins = Vec::new();
    for i in 0..N {
        let addr = srv.addr;
        joins.push(tokio::spawn(async move {
            let mut ch = open(addr).await;
            let name = format!("peer{}", i);
            let file = format!("file{}.txt", i);
            let reply = call(&mut ch, connect_req(&name, 9000 + i, &[file.as_str()])).await;
            assert!(reply.get("success").is_some());
            ch
        }));
    }
    let mut channels = Vec::new();
    for j in joins {
        channels.push(j.await.unwrap());
    }
    wait_for_peers(&srv.registry, N as usize).await;
    for (i, ch) in channels.iter_mut().enumerate() {
        let reply = call(ch, json!({"method": "LIST"})).await;
        let entries = reply.as_array().unwrap();
        assert_eq!(entries.len(), N as usize - 1);
        let own = format!("file{}.txt", i);
        assert!(entries.iter().all(|e| e["filename"] != own.as_str()));
        assert!(entries.iter().all(|e| e["speed"] == "gigabit"));
    }
}

#[tokio::test]
async fn disconnect_removes_peer_files() {
    let srv = start().await;
    let mut a = open(srv.addr).await;
    let mut b = open(srv.addr).await;
    call(&mut a, connect_req("a", 9001, &["a.txt"])).await;
    call(&mut b, connect_req("b", 9002, &["b.txt"])).await;
    let reply = call(&mut b, json!({"method": "LIST"})).await;
    assert_eq!(
        reply,
        json!([{"filename": "a.txt", "hostname": "127.0.0.1:9001", "speed": "gigabit"}])
    );
    drop(a);
    wait_for_peers(&srv.registry, 1).await;
    let reply = call(&mut b, json!({"method": "LIST"})).await;
    assert_eq!(reply, json!([]));
}

#[tokio::test]
async fn keyword_with_unreachable_owner_is_empty_not_error() {
    let srv = start().await;
    let dead = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let mut a = open(srv.addr).await;
    let mut b = open(srv.addr).await;
    call(&mut a, connect_req("a", dead, &["a.txt"])).await;
    call(&mut b, connect_req("b", 9002, &["b.txt"])).await;
    let reply = call(&mut b, json!({"method": "KEYWORD", "keyword": "anything"})).await;
    assert_eq!(reply, json!([]));
}

#[tokio::test]
async fn shutdown_stops_accepting_and_finishes() {
    let srv = start().await;
    let mut a = open(srv.addr).await;
    call(&mut a, connect_req("a", 9001, &["a.txt"])).await;
    srv.stop.send(()).unwrap();
    srv.handle.await.unwrap().unwrap();
    // The open connection was closed by the server.
    assert!(a.receive().await.map(|m| m.is_none()).unwrap_or(true));
    assert!(TcpStream::connect(srv.addr).await.is_err());
    assert_eq!(srv.registry.lock().await.len(), 0);
}

/// File Service stand-in that answers each RETRIEVE with `content` after `delay`.
async fn slow_file_service(content: &'static str, delay: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ch = Channel::new(stream);
                while let Ok(Some(req)) = ch.receive().await {
                    if req["method"] == "QUIT" {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                    let reply = json!({"filename": req["filename"], "content": BASE64.encode(content)});
                    let _ = ch.send(&reply).await;
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn shutdown_answers_a_keyword_already_in_progress() {
    let slow = slow_file_service("apple pie", Duration::from_millis(300)).await;
    let srv = start().await;
    let mut a = open(srv.addr).await;
    call(&mut a, connect_req("a", slow, &["slow.txt"])).await;
    let mut b = open(srv.addr).await;
    call(&mut b, connect_req("b", 9002, &[])).await;

    b.send(&json!({"method": "KEYWORD", "keyword": "apple"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    srv.stop.send(()).unwrap();

    let reply = b.receive().await.unwrap().expect("reply before close");
    assert_eq!(
        reply,
        json!([{
            "filename": "slow.txt",
            "hostname": format!("127.0.0.1:{}", slow),
            "speed": "gigabit",
        }])
    );
    assert!(b.receive().await.map(|m| m.is_none()).unwrap_or(true));
    srv.handle.await.unwrap().unwrap();
    assert_eq!(srv.registry.lock().await.len(), 0);
}
