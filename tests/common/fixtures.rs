//! Cabinet builders, catalog payloads and servicer setup

use offline_servicing::config::CatalogBackendKind;
use offline_servicing::fetch::{NoOpInspector, StructuredCabInspector};
use offline_servicing::{Components, Config, ImageServicer};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::installer::RecordingInstaller;

/// Title of a cumulative update for the default target
pub const LCU_TITLE: &str =
    "2024-05 Cumulative Update for Windows 10 Version 22H2 for x64-based Systems (KB5037768)";
/// Title of a servicing stack update for the default target
pub const SSU_TITLE: &str =
    "2024-04 Servicing Stack Update for Windows 10 Version 22H2 for x64-based Systems (KB5036447)";

/// Build a minimal cabinet whose file table lists `names`
///
/// Header, one CFFOLDER, then one CFFILE per name. No data blocks; the
/// structured inspector only reads the file table.
pub fn build_cab(names: &[&str]) -> Vec<u8> {
    const HEADER_SIZE: usize = 36;
    let files_offset = (HEADER_SIZE + 8) as u32;

    let mut data = Vec::new();
    data.extend_from_slice(b"MSCF");
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // cbCabinet, patched below
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&files_offset.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&[3, 1]);
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&(names.len() as u16).to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&0x4242u16.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());

    // CFFOLDER
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());

    for name in names {
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0x80u16.to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
    }

    let size = data.len() as u32;
    data[8..12].copy_from_slice(&size.to_le_bytes());
    data
}

/// Cabinet carrying the update metadata marker
pub fn valid_cab() -> Vec<u8> {
    build_cab(&["update.mum", "update.cat", "amd64_microsoft-windows-foo.manifest"])
}

/// Cabinet without the update metadata marker
pub fn markerless_cab() -> Vec<u8> {
    build_cab(&["readme.txt", "payload.dll"])
}

/// Curated index entry with one file served from `server` at `/content/<file>`
pub fn catalog_entry(server: &MockServer, id: &str, title: &str, file: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "files": [{
            "name": file,
            "url": format!("{}/content/{}", server.uri(), file),
        }],
    })
}

/// Serve `entries` as the curated index response
pub async fn mount_catalog(server: &MockServer, entries: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/updates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updates": entries })))
        .mount(server)
        .await;
}

/// Serve `body` at `/content/<file>`, expecting exactly `calls` downloads
pub async fn mount_content(server: &MockServer, file: &str, body: Vec<u8>, calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/content/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(calls)
        .mount(server)
        .await;
}

/// Configuration for Windows 10 22H2 x64 against the index at `server`
pub fn test_config(dir: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.target.product = "Windows 10".to_string();
    config.target.build = "22H2".to_string();
    config.target.architecture = "x64".to_string();
    config.cache.root = dir.path().join("cache");
    config.persistence.database_path = dir.path().join("servicing.db");
    config.catalog.backend = CatalogBackendKind::CuratedIndex;
    config.catalog.curated_index_url = Some(server.uri());
    config.tools.search_path = false;
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    config
}

/// Servicer with the real catalog backend and a recording installer
///
/// The listing tier is the no-op inspector, so a cabinet the structured
/// reader cannot parse is unverifiable.
pub async fn servicer(config: Config, installer: Arc<RecordingInstaller>) -> ImageServicer {
    let mut components = Components::from_config(&config).unwrap();
    components.structured = Arc::new(StructuredCabInspector);
    components.listing = Arc::new(NoOpInspector);
    components.installer = installer;
    ImageServicer::with_components(config, components)
        .await
        .unwrap()
}
