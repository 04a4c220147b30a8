//! Shared test utilities: loopback HTTP servers standing in for a catalog
//! web host and an OCI registry.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve `router` on a random loopback port until the returned sender fires.
async fn spawn(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    (addr, shutdown_tx)
}

#[derive(Default)]
struct Reply {
    body: Vec<u8>,
    gzip: bool,
    status: u16,
    requests: Vec<String>,
}

async fn reply(State(reply): State<Arc<Mutex<Reply>>>, uri: Uri) -> Response {
    let (status, body, gzip) = {
        let mut reply = reply.lock().unwrap();
        reply.requests.push(uri.path().to_string());
        (reply.status, reply.body.clone(), reply.gzip)
    };
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if gzip {
        (status, [(header::CONTENT_ENCODING, "gzip")], gzip_bytes(&body)).into_response()
    } else {
        (status, body).into_response()
    }
}

/// Catalog web host answering every GET with one configurable reply.
pub struct StubServer {
    addr: SocketAddr,
    reply: Arc<Mutex<Reply>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StubServer {
    pub async fn start(body: &str) -> Self {
        let reply = Arc::new(Mutex::new(Reply {
            body: body.as_bytes().to_vec(),
            status: 200,
            ..Default::default()
        }));
        let router = Router::new().fallback(self::reply).with_state(reply.clone());
        let (addr, shutdown_tx) = spawn(router).await;

        Self {
            addr,
            reply,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL to declare on a web source.
    pub fn url(&self) -> String {
        format!("http://{}/catalogs", self.addr)
    }

    pub fn set_body(&self, body: &str) {
        self.reply.lock().unwrap().body = body.as_bytes().to_vec();
    }

    pub fn set_gzip(&self, gzip: bool) {
        self.reply.lock().unwrap().gzip = gzip;
    }

    pub fn set_status(&self, status: u16) {
        self.reply.lock().unwrap().status = status;
    }

    /// Paths requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.reply.lock().unwrap().requests.clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

#[derive(Default)]
struct Objects {
    /// Request path to content type and body.
    paths: HashMap<String, (String, Vec<u8>)>,
    requests: Vec<String>,
}

async fn registry(State(objects): State<Arc<Mutex<Objects>>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let mut objects = objects.lock().unwrap();
    objects.requests.push(path.clone());

    if path == "/v2/" {
        return (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], "{}").into_response();
    }
    match objects.paths.get(&path) {
        Some((content_type, body)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.clone()),
                (
                    header::HeaderName::from_static("docker-content-digest"),
                    digest_of(body),
                ),
            ],
            body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Descriptor of something pushed to a [`RegistryStub`].
#[derive(Debug, Clone)]
pub struct Pushed {
    pub digest: String,
    pub size: usize,
}

/// Read-only OCI distribution endpoint holding manifests and blobs in memory.
pub struct RegistryStub {
    addr: SocketAddr,
    objects: Arc<Mutex<Objects>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RegistryStub {
    pub async fn start() -> Self {
        let objects = Arc::new(Mutex::new(Objects::default()));
        let router = Router::new().fallback(registry).with_state(objects.clone());
        let (addr, shutdown_tx) = spawn(router).await;

        Self {
            addr,
            objects,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// `host:port`, to be listed as an insecure registry.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn reference(&self, repository: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.host(), repository, tag)
    }

    pub fn pinned(&self, repository: &str, digest: &str) -> String {
        format!("{}/{}@{}", self.host(), repository, digest)
    }

    /// Store a blob; returns its descriptor.
    pub fn push_blob(&self, repository: &str, data: &[u8]) -> Pushed {
        let digest = digest_of(data);
        self.put(
            format!("/v2/{}/blobs/{}", repository, digest),
            "application/octet-stream",
            data,
        );
        Pushed {
            digest,
            size: data.len(),
        }
    }

    /// Store an image manifest over `layers` plus a config blob.
    pub fn push_image(&self, repository: &str, layers: &[Vec<u8>]) -> Pushed {
        let config = br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":[]}}"#;
        let config = self.push_blob(repository, config);
        let layers: Vec<_> = layers
            .iter()
            .map(|layer| {
                let pushed = self.push_blob(repository, layer);
                serde_json::json!({
                    "mediaType": OCI_LAYER_GZIP,
                    "digest": pushed.digest,
                    "size": pushed.size
                })
            })
            .collect();

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {
                "mediaType": OCI_CONFIG,
                "digest": config.digest,
                "size": config.size
            },
            "layers": layers
        });
        self.push_manifest(repository, OCI_MANIFEST, &serde_json::to_vec(&manifest).unwrap())
    }

    /// Store an image index listing `(image, os, architecture)` entries.
    pub fn push_index(&self, repository: &str, images: &[(&Pushed, &str, &str)]) -> Pushed {
        let manifests: Vec<_> = images
            .iter()
            .map(|(image, os, architecture)| {
                serde_json::json!({
                    "mediaType": OCI_MANIFEST,
                    "digest": image.digest,
                    "size": image.size,
                    "platform": { "os": os, "architecture": architecture }
                })
            })
            .collect();
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX,
            "manifests": manifests
        });
        self.push_manifest(repository, OCI_INDEX, &serde_json::to_vec(&index).unwrap())
    }

    /// Point `tag` at the manifest or index stored under `pushed`.
    pub fn tag(&self, repository: &str, tag: &str, pushed: &Pushed) {
        let mut objects = self.objects.lock().unwrap();
        let by_digest = format!("/v2/{}/manifests/{}", repository, pushed.digest);
        let object = objects.paths[&by_digest].clone();
        objects
            .paths
            .insert(format!("/v2/{}/manifests/{}", repository, tag), object);
    }

    /// Paths requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.objects.lock().unwrap().requests.clone()
    }

    fn push_manifest(&self, repository: &str, media_type: &str, data: &[u8]) -> Pushed {
        let digest = digest_of(data);
        self.put(
            format!("/v2/{}/manifests/{}", repository, digest),
            media_type,
            data,
        );
        Pushed {
            digest,
            size: data.len(),
        }
    }

    fn put(&self, path: String, content_type: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .paths
            .insert(path, (content_type.to_string(), data.to_vec()));
    }
}

impl Drop for RegistryStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Gzipped tarball holding `files`.
pub fn layer(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    gzip_bytes(&builder.into_inner().unwrap())
}

/// Architecture name an image index uses for this host.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
