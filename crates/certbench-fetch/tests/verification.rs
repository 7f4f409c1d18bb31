//! Certificate trust decisions against an in-process TLS endpoint

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use certbench_fetch::{FetchOptions, RemoteFetcher, SslOptions, TransportError};
use certbench_fixtures::{
    ensure, FixtureLayout, Intermediate, GARBAGE_CN, LOCALHOST_CN, NIP_IO_CN,
};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const BODY: &str = "<HTML><BODY BGCOLOR=\"#ffffff\">\n<pre>\n\ns_server -www\n</pre></BODY></HTML>\r\n";

fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("certbench_fetch=debug,certbench_common=debug")
        .with_test_writer()
        .try_init();
}

fn fixtures() -> (tempfile::TempDir, FixtureLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = ensure(dir.path()).unwrap();
    (dir, layout)
}

fn acceptor(cert: PathBuf, key: PathBuf, chain: Option<PathBuf>) -> TlsAcceptor {
    let mut certs = certbench_common::load_certs(&cert).unwrap();
    if let Some(chain) = chain {
        certs.extend(certbench_common::load_certs(&chain).unwrap());
    }
    let key = certbench_common::load_private_key(&key).unwrap();

    let config = rustls::ServerConfig::builder_with_provider(certbench_common::crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Serve `cert` (plus `chain`) over HTTP/1 until the test ends
async fn serve(cert: PathBuf, key: PathBuf, chain: Option<PathBuf>) -> SocketAddr {
    let acceptor = acceptor(cert, key, chain);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let service = service_fn(|_req: Request<Incoming>| async {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .header("Content-Type", "text/html")
                            .body(Full::new(Bytes::from_static(BODY.as_bytes())))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await;
            });
        }
    });

    addr
}

/// Answer every request with `reply` verbatim, then close
async fn serve_raw(acceptor: TlsAcceptor, reply: &'static [u8], close_notify: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tls.write_all(reply).await;
                let _ = tls.flush().await;
                if close_notify {
                    let _ = tls.shutdown().await;
                }
            });
        }
    });

    addr
}

fn fetcher(ssl: SslOptions, host: &str, addr: SocketAddr) -> RemoteFetcher {
    RemoteFetcher::new(FetchOptions::with_ssl(ssl).resolve(host, addr)).unwrap()
}

fn url(host: &str, addr: SocketAddr) -> String {
    format!("https://{}:{}", host, addr.port())
}

#[tokio::test]
async fn test_self_signed_rejected_without_trust() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.self_signed_cert(LOCALHOST_CN),
        layout.self_signed_key(LOCALHOST_CN),
        None,
    )
    .await;

    let err = fetcher(SslOptions::default(), "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::CertificateVerify(_)), "{err}");
    assert!(err.to_string().contains("certificate verify failed"));
}

#[tokio::test]
async fn test_self_signed_garbage_name_rejected() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.self_signed_cert(GARBAGE_CN),
        layout.self_signed_key(GARBAGE_CN),
        None,
    )
    .await;

    let ssl = SslOptions {
        allow_self_signed: true,
        ..SslOptions::default()
    };
    let err = fetcher(ssl, "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    match err {
        TransportError::PeerNameMismatch { expected, .. } => assert_eq!(expected, "localhost"),
        other => panic!("expected name mismatch, got {other}"),
    }
}

#[tokio::test]
async fn test_self_signed_accepted_when_allowed() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.self_signed_cert(LOCALHOST_CN),
        layout.self_signed_key(LOCALHOST_CN),
        None,
    )
    .await;

    let ssl = SslOptions {
        allow_self_signed: true,
        ..SslOptions::default()
    };
    let body = fetcher(ssl, "localhost", addr)
        .get_contents(&url("localhost", addr))
        .await
        .unwrap();
    assert!(body.contains("s_server"));
}

#[tokio::test]
async fn test_peer_name_override() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.self_signed_cert(GARBAGE_CN),
        layout.self_signed_key(GARBAGE_CN),
        None,
    )
    .await;

    let ssl = SslOptions {
        allow_self_signed: true,
        peer_name: Some(GARBAGE_CN.to_string()),
        ..SslOptions::default()
    };
    let response = fetcher(ssl, "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_insecure_accepts_anything() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Untrusted, LOCALHOST_CN),
        layout.leaf_key(Intermediate::Untrusted, LOCALHOST_CN),
        None,
    )
    .await;

    let ssl = SslOptions {
        verify_peer: false,
        ..SslOptions::default()
    };
    let body = fetcher(ssl, "localhost", addr)
        .get_contents(&url("localhost", addr))
        .await
        .unwrap();
    assert!(body.contains("s_server"));
}

#[tokio::test]
async fn test_signed_rejected_without_ca() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Trusted, LOCALHOST_CN),
        layout.leaf_key(Intermediate::Trusted, LOCALHOST_CN),
        None,
    )
    .await;

    let err = fetcher(SslOptions::default(), "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::CertificateVerify(_)), "{err}");
}

#[tokio::test]
async fn test_broken_chain_rejected() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Untrusted, LOCALHOST_CN),
        layout.leaf_key(Intermediate::Untrusted, LOCALHOST_CN),
        None,
    )
    .await;

    let ssl = SslOptions {
        cafile: Some(layout.cafile()),
        ..SslOptions::default()
    };
    let err = fetcher(ssl, "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    assert!(err.is_verification_failure());
    assert!(err.to_string().contains("certificate verify failed"));
}

#[tokio::test]
async fn test_chain_accepted_with_cafile_and_capath() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Untrusted, LOCALHOST_CN),
        layout.leaf_key(Intermediate::Untrusted, LOCALHOST_CN),
        Some(layout.intermediate_cert(Intermediate::Untrusted)),
    )
    .await;

    let with_file = SslOptions {
        cafile: Some(layout.cafile()),
        ..SslOptions::default()
    };
    let body = fetcher(with_file, "localhost", addr)
        .get_contents(&url("localhost", addr))
        .await
        .unwrap();
    assert!(body.contains("s_server"));

    let with_dir = SslOptions {
        capath: Some(layout.cadir()),
        ..SslOptions::default()
    };
    let body = fetcher(with_dir, "localhost", addr)
        .get_contents(&url("localhost", addr))
        .await
        .unwrap();
    assert!(body.contains("s_server"));
}

#[tokio::test]
async fn test_trusted_intermediate_accepted_without_chain() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Trusted, LOCALHOST_CN),
        layout.leaf_key(Intermediate::Trusted, LOCALHOST_CN),
        None,
    )
    .await;

    for ssl in [
        SslOptions {
            cafile: Some(layout.cafile()),
            ..SslOptions::default()
        },
        SslOptions {
            capath: Some(layout.cadir()),
            ..SslOptions::default()
        },
    ] {
        let body = fetcher(ssl, "localhost", addr)
            .get_contents(&url("localhost", addr))
            .await
            .unwrap();
        assert!(body.contains("s_server"));
    }
}

#[tokio::test]
async fn test_san_names() {
    init_test();
    let (_dir, layout) = fixtures();
    let addr = serve(
        layout.leaf_cert(Intermediate::Trusted, NIP_IO_CN),
        layout.leaf_key(Intermediate::Trusted, NIP_IO_CN),
        None,
    )
    .await;
    let ssl = SslOptions {
        capath: Some(layout.cadir()),
        ..SslOptions::default()
    };

    for host in [NIP_IO_CN.to_string(), format!("www.{}", NIP_IO_CN)] {
        let body = fetcher(ssl.clone(), &host, addr)
            .get_contents(&url(&host, addr))
            .await
            .unwrap();
        assert!(body.contains("s_server"), "{host}");
    }

    let unknown = format!("www2.{}", NIP_IO_CN);
    let err = fetcher(ssl, &unknown, addr)
        .get(&url(&unknown, addr))
        .await
        .unwrap_err();
    match err {
        TransportError::PeerNameMismatch { expected, .. } => assert_eq!(expected, unknown),
        other => panic!("expected name mismatch, got {other}"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_connect_error() {
    init_test();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher(SslOptions::default(), "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }), "{err}");
}

#[tokio::test]
async fn test_close_without_close_notify_keeps_body() {
    init_test();
    let (_dir, layout) = fixtures();
    let acceptor = acceptor(
        layout.self_signed_cert(LOCALHOST_CN),
        layout.self_signed_key(LOCALHOST_CN),
        None,
    );
    let addr = serve_raw(
        acceptor,
        b"HTTP/1.0 200 ok\r\nContent-type: text/html\r\n\r\n<pre>\ns_server -www\n</pre>",
        false,
    )
    .await;

    let ssl = SslOptions {
        verify_peer: false,
        ..SslOptions::default()
    };
    let response = fetcher(ssl, "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get("content-type").unwrap(), "text/html");
    assert!(response.text().contains("s_server -www"));
}

#[tokio::test]
async fn test_reply_without_status_line_is_http_error() {
    init_test();
    let (_dir, layout) = fixtures();
    let acceptor = acceptor(
        layout.self_signed_cert(LOCALHOST_CN),
        layout.self_signed_key(LOCALHOST_CN),
        None,
    );
    let addr = serve_raw(acceptor, b"{\"packages\":[]}", true).await;

    let ssl = SslOptions {
        verify_peer: false,
        ..SslOptions::default()
    };
    let err = fetcher(ssl, "localhost", addr)
        .get(&url("localhost", addr))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http(_)), "{err}");
    assert!(!err.is_verification_failure());
}
