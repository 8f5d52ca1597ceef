use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{CipherSuite, ProtocolVersion, ServerConfig, SupportedProtocolVersion};
use sloth_core::{Connection, Connector, Target};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const OFFERED: [CipherSuite; 9] = [
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// A self-signed certificate for `names`, nothing in any trust store.
fn self_signed(names: &[&str], versions: &[&'static SupportedProtocolVersion]) -> TlsAcceptor {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let cert = rcgen::generate_simple_self_signed(names).unwrap();
    let cert_der = CertificateDer::from(cert.cert);
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(versions)
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Accepts one TLS client and returns the first five bytes it sends.
async fn tls_echo_server(acceptor: TlsAcceptor) -> (u16, tokio::task::JoinHandle<[u8; 5]>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        let mut buf = [0u8; 5];
        tls.read_exact(&mut buf).await.unwrap();
        buf
    });
    (port, accept)
}

async fn dial_and_greet(port: u16) -> (Option<CipherSuite>, Option<ProtocolVersion>) {
    let target = Target::parse(&format!("https://localhost:{port}/")).unwrap();
    let connector = Connector::new(&target).unwrap();
    let mut conn = connector.dial(Duration::from_secs(5)).await.unwrap();
    let negotiated = match &conn {
        Connection::Tls(tls) => {
            let session = tls.get_ref().1;
            (
                session.negotiated_cipher_suite().map(|s| s.suite()),
                session.protocol_version(),
            )
        }
        Connection::Plain(_) => panic!("https target dialed without TLS"),
    };
    conn.write_all(b"hello").await.unwrap();
    conn.flush().await.unwrap();
    negotiated
}

#[tokio::test]
async fn https_dial_accepts_a_self_signed_certificate() {
    let acceptor = self_signed(&["localhost"], rustls::DEFAULT_VERSIONS);
    let (port, accept) = tls_echo_server(acceptor).await;

    let (suite, version) = dial_and_greet(port).await;
    assert_eq!(&accept.await.unwrap(), b"hello");
    assert_eq!(version, Some(ProtocolVersion::TLSv1_3));
    assert!(OFFERED.contains(&suite.unwrap()));
}

#[tokio::test]
async fn https_dial_ignores_a_certificate_for_another_name() {
    let acceptor = self_signed(&["not-this-host.invalid"], rustls::DEFAULT_VERSIONS);
    let (port, accept) = tls_echo_server(acceptor).await;

    dial_and_greet(port).await;
    assert_eq!(&accept.await.unwrap(), b"hello");
}

#[tokio::test]
async fn tls12_only_servers_get_an_ecdhe_aead_suite() {
    let acceptor = self_signed(&["localhost"], &[&rustls::version::TLS12]);
    let (port, accept) = tls_echo_server(acceptor).await;

    let (suite, version) = dial_and_greet(port).await;
    assert_eq!(&accept.await.unwrap(), b"hello");
    assert_eq!(version, Some(ProtocolVersion::TLSv1_2));
    assert!(OFFERED[3..].contains(&suite.unwrap()));
}
