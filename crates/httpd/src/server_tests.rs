// SPDX-License-Identifier: MIT

use super::*;

async fn started() -> (Httpd, SocketAddr, mpsc::UnboundedReceiver<RelayMsg>) {
    let mut httpd = Httpd::new("127.0.0.1", 0);
    httpd.add_path(
        "/ping",
        Arc::new(|_req: &Request| Response::html("hello, world\n")),
    );
    httpd.add_path(
        "/echo",
        Arc::new(|req: &Request| Response::text(req.body.clone())),
    );
    httpd.add_path(
        "/a",
        Arc::new(|_req: &Request| Response::text("first prefix")),
    );
    httpd.add_path(
        "/ab",
        Arc::new(|_req: &Request| Response::text("shadowed")),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    httpd.start(tx).await.unwrap();
    let addr = httpd.bound()[0];
    (httpd, addr, rx)
}

async fn roundtrip(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn ping_answers_hello_world() {
    let (_httpd, addr, mut rx) = started().await;
    let reply = roundtrip(addr, "GET /ping HTTP/1.0\r\n\r\n").await;

    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(reply.contains("Content-Type: text/html\r\n"));
    let body = reply.split("\r\n\r\n").nth(1).unwrap();
    assert!(body.starts_with("hello, world"));

    // The accept was announced to the relay.
    let msg = rx.recv().await.unwrap();
    assert!(matches!(
        msg,
        RelayMsg::External { ref event, token } if event == crate::CB_ACCEPT && token >= 0
    ));
}

#[tokio::test]
async fn unmatched_paths_get_404() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(addr, "GET /nothing HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.0 404 Not Found\r\n"));
}

#[tokio::test]
async fn unknown_methods_get_501_and_bad_paths_400() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(addr, "DELETE /ping HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.0 501 Not Implemented\r\n"));

    let reply = roundtrip(addr, "GET ping HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.0 400 Bad Request\r\n"));
}

#[tokio::test]
async fn first_prefix_match_wins() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(addr, "GET /ab HTTP/1.0\r\n\r\n").await;
    assert!(reply.contains("first prefix"));
}

#[tokio::test]
async fn head_requests_omit_the_body() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(addr, "HEAD /ping HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(reply.contains("Content-Length: 13\r\n"));
    assert!(reply.ends_with("\r\n\r\n"), "no body after the blank line");
}

#[tokio::test]
async fn post_bodies_reach_the_handler() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(
        addr,
        "POST /echo HTTP/1.1\r\nContent-Length: 7\r\n\r\npayload",
    )
    .await;
    let body = reply.split("\r\n\r\n").nth(1).unwrap();
    assert_eq!(body, "payload");
}

#[tokio::test]
async fn garbage_closes_without_a_response() {
    let (_httpd, addr, _rx) = started().await;
    let reply = roundtrip(addr, "complete nonsense\r\n\r\n").await;
    assert!(reply.is_empty());
}

#[tokio::test]
async fn stop_refuses_further_service() {
    let (mut httpd, addr, _rx) = started().await;
    httpd.stop();
    // The listener is gone (connection refused) or the accepted socket is
    // closed without a byte of response.
    match TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(mut stream) => {
            let _ = stream.write_all(b"GET /ping HTTP/1.0\r\n\r\n").await;
            let mut out = Vec::new();
            let _ = stream.read_to_end(&mut out).await;
            assert!(out.is_empty());
        }
    }
}

#[tokio::test]
async fn remove_path_unregisters() {
    let (httpd, addr, _rx) = started().await;
    httpd.remove_path("/ping");
    let reply = roundtrip(addr, "GET /ping HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.0 404"));
}

#[tokio::test]
async fn bad_interface_fails_to_start() {
    let mut httpd = Httpd::new("not-an-ip", 0);
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        httpd.start(tx).await,
        Err(HttpdError::BadInterface(_))
    ));
}
