//! Fake peers shared by the integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use cleanroom_trust::attestation::{
    AttestationEvidence, AttestationReportEnvelope, GeneratedEvidence,
    VerifiedClaims,
};
use cleanroom_trust::{AttestationVerifier, Error, EvidenceGenerator};

/// A service CA as a peer would publish it, issuing leaves for 127.0.0.1
pub struct ServiceCa {
    cert: rcgen::Certificate,
    key: KeyPair,
    presented_directly: bool,
}

impl ServiceCa {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert,
            key,
            presented_directly: false,
        }
    }

    /// A self-signed CA certificate the peer serves as its own TLS leaf
    pub fn self_served(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert,
            key,
            presented_directly: true,
        }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    fn server_config(&self) -> Arc<rustls::ServerConfig> {
        let (chain, private): (Vec<CertificateDer<'static>>, _) = if self.presented_directly {
            (vec![self.cert.der().clone()], self.key.serialize_der())
        } else {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
            params.distinguished_name.push(DnType::CommonName, "node");
            let leaf = params.signed_by(&key, &self.cert, &self.key).unwrap();
            (vec![leaf.der().clone()], key.serialize_der())
        };
        let private = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(private));

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, private)
            .unwrap();
        Arc::new(config)
    }
}

/// HTTPS peer answering every request with `200 ok`, one request per connection
pub struct TlsPeer {
    addr: SocketAddr,
    config: Arc<Mutex<Arc<rustls::ServerConfig>>>,
    connections: Arc<AtomicUsize>,
}

impl TlsPeer {
    pub async fn start(ca: &ServiceCa) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(Mutex::new(ca.server_config()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (current, counter) = (config.clone(), connections.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let acceptor = TlsAcceptor::from(current.lock().unwrap().clone());
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
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
                    let response =
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";
                    let _ = tls.write_all(response).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self {
            addr,
            config,
            connections,
        }
    }

    /// Present a leaf issued by `ca` from now on, as after a restart
    pub fn rotate(&self, ca: &ServiceCa) {
        *self.config.lock().unwrap() = ca.server_config();
    }

    pub fn url(&self) -> reqwest::Url {
        reqwest::Url::parse(&format!("https://{}/", self.addr)).unwrap()
    }

    /// TCP connections accepted, i.e. handshake attempts
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

struct Published {
    status: StatusCode,
    body: serde_json::Value,
}

/// Discovery endpoint serving a replaceable envelope at `/report`
pub struct DiscoveryPeer {
    addr: SocketAddr,
    published: Arc<Mutex<Published>>,
    calls: Arc<AtomicUsize>,
}

impl DiscoveryPeer {
    pub async fn start(envelope: &AttestationReportEnvelope) -> Self {
        let published = Arc::new(Mutex::new(Published {
            status: StatusCode::OK,
            body: serde_json::to_value(envelope).unwrap(),
        }));
        let calls = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/report", get(report))
            .with_state((published.clone(), calls.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            published,
            calls,
        }
    }

    pub fn publish(&self, envelope: &AttestationReportEnvelope) {
        let mut published = self.published.lock().unwrap();
        published.status = StatusCode::OK;
        published.body = serde_json::to_value(envelope).unwrap();
    }

    pub fn fail_with(&self, status: StatusCode) {
        self.published.lock().unwrap().status = status;
    }

    pub fn url(&self) -> reqwest::Url {
        reqwest::Url::parse(&format!("http://{}/report", self.addr)).unwrap()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn report(
    State((published, calls)): State<(Arc<Mutex<Published>>, Arc<AtomicUsize>)>,
) -> (StatusCode, Json<serde_json::Value>) {
    calls.fetch_add(1, Ordering::SeqCst);
    let published = published.lock().unwrap();
    (published.status, Json(published.body.clone()))
}

/// `{"serviceCert": pem}` published without hardware evidence
pub fn virtual_envelope(pem: &str) -> AttestationReportEnvelope {
    let payload = serde_json::to_vec(&serde_json::json!({ "serviceCert": pem })).unwrap();
    AttestationReportEnvelope::publish(&payload, None).unwrap().0
}

/// Evidence generator whose "report" is `<host data>:<report data>` in plain text
pub struct FakeHardware {
    pub host_data: String,
}

impl EvidenceGenerator for FakeHardware {
    fn generate_evidence(&self, bound_data: &[u8]) -> cleanroom_trust::Result<GeneratedEvidence> {
        let mut report_data = hex::encode(bound_data);
        while report_data.len() < 128 {
            report_data.push('0');
        }
        Ok(GeneratedEvidence {
            evidence: AttestationEvidence {
                attestation: format!("{}:{}", self.host_data, report_data),
                platform_certificates: String::new(),
                uvm_endorsements: String::new(),
            },
            public_key: String::new(),
            private_key: String::new(),
        })
    }
}

/// Verifier for [`FakeHardware`] evidence
pub struct FakeVerifier;

impl AttestationVerifier for FakeVerifier {
    fn verify(&self, evidence: &AttestationEvidence) -> cleanroom_trust::Result<VerifiedClaims> {
        let (host, report) = evidence
            .attestation
            .split_once(':')
            .ok_or_else(|| Error::AttestationInvalid("malformed evidence".into()))?;
        Ok(VerifiedClaims::new(host, report))
    }
}

/// `payload` published with [`FakeHardware`] evidence
pub fn attested_envelope(host_data: &str, payload: &[u8]) -> AttestationReportEnvelope {
    let hardware = FakeHardware {
        host_data: host_data.to_string(),
    };
    AttestationReportEnvelope::publish(payload, Some(&hardware))
        .unwrap()
        .0
}

pub fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn sha256_tag(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
