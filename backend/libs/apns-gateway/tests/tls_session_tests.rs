/// TLS session tests against a local rustls server
///
/// Covers:
/// - Handshake with a client credential and a trusted server certificate
/// - Frame write and bounded error-response read over real TLS
/// - Handshake and connect failures surfacing as connect errors
use std::sync::Arc;
use std::time::Duration;

use apns_gateway::{Credential, GatewayConnector, GatewayEndpoint, GatewayError, TlsGatewayConnector};
use apns_wire::{decode_error_response, ErrorCode, ErrorResponse};
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

fn self_signed(host: &str) -> Credential {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec![host.to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    Credential::from_pem(format!("{}{}", cert.pem(), key.serialize_pem()))
}

fn acceptor(server_identity: &Credential) -> TlsAcceptor {
    let (certs, key) = server_identity.identity().unwrap();
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

fn trusting(server_identity: &Credential) -> RootCertStore {
    let (certs, _) = server_identity.identity().unwrap();
    let mut roots = RootCertStore::empty();
    roots.add(certs[0].clone()).unwrap();
    roots
}

#[tokio::test]
async fn test_round_trip_over_tls() {
    let server_identity = self_signed("localhost");
    let acceptor = acceptor(&server_identity);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();

        let mut frame = [0u8; 8];
        tls.read_exact(&mut frame).await.unwrap();

        let response = ErrorResponse::new(ErrorCode::InvalidToken, 42);
        tls.write_all(&response.to_bytes()).await.unwrap();
        tls.shutdown().await.unwrap();
        frame
    });

    let connector = TlsGatewayConnector::with_roots(trusting(&server_identity), Duration::from_secs(5));
    let mut session = connector
        .connect(&self_signed("client"), &GatewayEndpoint::new("localhost", port))
        .await
        .unwrap();

    session.write(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
    let response = session
        .read_with_timeout(6, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("error response");
    session.close().await;

    let decoded = decode_error_response(&response).unwrap();
    assert_eq!(decoded.status, ErrorCode::InvalidToken);
    assert_eq!(decoded.notification_id, 42);
    assert_eq!(server.await.unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn test_untrusted_server_fails_handshake() {
    let server_identity = self_signed("localhost");
    let acceptor = acceptor(&server_identity);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            let _ = acceptor.accept(tcp).await;
        }
    });

    let connector = TlsGatewayConnector::with_roots(RootCertStore::empty(), Duration::from_secs(5));
    let result = connector
        .connect(&self_signed("client"), &GatewayEndpoint::new("localhost", port))
        .await;

    match result {
        Err(e @ GatewayError::Handshake { .. }) => assert!(e.is_connect_error()),
        Err(other) => panic!("expected handshake error, got {other}"),
        Ok(_) => panic!("handshake with untrusted server succeeded"),
    }
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let connector = TlsGatewayConnector::with_roots(RootCertStore::empty(), Duration::from_secs(5));
    let result = connector
        .connect(&self_signed("client"), &GatewayEndpoint::new("127.0.0.1", port))
        .await;

    assert!(matches!(result, Err(GatewayError::Connect { .. })));
}

#[tokio::test]
async fn test_invalid_credential_fails_before_connecting() {
    let connector = TlsGatewayConnector::with_roots(RootCertStore::empty(), Duration::from_secs(5));
    let result = connector
        .connect(
            &Credential::from_pem(b"garbage".to_vec()),
            &GatewayEndpoint::new("localhost", 1),
        )
        .await;

    assert!(matches!(result, Err(GatewayError::InvalidCredential { .. })));
}
