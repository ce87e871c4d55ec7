//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use xray_creator::catalog::CatalogEntry;
use xray_creator::config::{PipelineConfig, RemoteConfig};
use xray_creator::device::{DeviceLocator, Volume, VolumeKind, VolumeSource};
use xray_creator::error::DeviceError;
use xray_creator::mobi::{ExthRecord, RecordTable};

pub const BOOK_TEXT: &str = "Alice met Bob in Wonderland. Bob waved at Alice.";

/// Builds an uncompressed MOBI container with the given EXTH records.
pub fn mobi_bytes(title: &str, exth: &[ExthRecord]) -> Vec<u8> {
    const HEADER_LEN: usize = 0xe8;

    let mut record0 = vec![0u8; 0x10 + HEADER_LEN];
    record0[0..2].copy_from_slice(&1u16.to_be_bytes());
    record0[4..8].copy_from_slice(&(BOOK_TEXT.len() as u32).to_be_bytes());
    record0[8..10].copy_from_slice(&1u16.to_be_bytes());
    record0[0x10..0x14].copy_from_slice(b"MOBI");
    record0[0x14..0x18].copy_from_slice(&(HEADER_LEN as u32).to_be_bytes());
    record0[0x1c..0x20].copy_from_slice(&65001u32.to_be_bytes());
    record0[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());
    record0.extend(RecordTable::new(exth.to_vec()).to_bytes());
    let title_offset = record0.len();
    record0[0x54..0x58].copy_from_slice(&(title_offset as u32).to_be_bytes());
    record0[0x58..0x5c].copy_from_slice(&(title.len() as u32).to_be_bytes());
    record0.extend_from_slice(title.as_bytes());
    record0.extend_from_slice(&[0, 0]);

    let records = [record0, BOOK_TEXT.as_bytes().to_vec()];

    let mut data = vec![0u8; 78];
    data[60..68].copy_from_slice(b"BOOKMOBI");
    data[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());
    let mut offset = 78 + records.len() * 8 + 2;
    for (i, record) in records.iter().enumerate() {
        data.extend_from_slice(&(offset as u32).to_be_bytes());
        data.extend_from_slice(&((i as u32) * 2).to_be_bytes());
        offset += record.len();
    }
    data.extend_from_slice(&[0, 0]);
    for record in &records {
        data.extend_from_slice(record);
    }
    data
}

/// A container with only an author record.
pub fn plain_mobi(title: &str) -> Vec<u8> {
    mobi_bytes(title, &[ExthRecord::new(100, b"A. Writer".to_vec())])
}

/// Writes a book into `library/` and returns its catalog entry.
pub fn library_book(dir: &Path, id: u64, title: &str, asin: Option<&str>) -> CatalogEntry {
    let path = dir.join("library").join(format!("book{}.mobi", id));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, plain_mobi(title)).unwrap();
    CatalogEntry {
        id,
        title: title.to_string(),
        title_sort: title.to_string(),
        author: "A. Writer".to_string(),
        author_sort: "Writer, A.".to_string(),
        path: Some(path),
        asin: asin.map(str::to_string),
    }
}

pub fn remote_config(base: &str) -> RemoteConfig {
    RemoteConfig {
        store_base_url: base.to_string(),
        metadata_base_url: base.to_string(),
        retry_delay_ms: 0,
        ..RemoteConfig::default()
    }
}

pub fn pipeline_config(send_to_device: bool) -> PipelineConfig {
    PipelineConfig {
        send_to_device,
        ..PipelineConfig::default()
    }
}

/// Returns a base URL nothing is listening on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

struct FixedVolumes(Vec<Volume>);

impl VolumeSource for FixedVolumes {
    fn volumes(&self) -> Result<Vec<Volume>, DeviceError> {
        Ok(self.0.clone())
    }
}

/// Creates a fake Kindle volume under `dir` and a locator that finds it.
pub fn kindle(dir: &Path) -> (PathBuf, DeviceLocator) {
    let root = dir.join("kindle");
    let marker = root.join("system").join(".mrch");
    std::fs::create_dir_all(&marker).unwrap();
    std::fs::write(marker.join("amzn1_account.1234"), b"").unwrap();

    let locator = DeviceLocator::new(
        Box::new(FixedVolumes(vec![Volume::new(&root, VolumeKind::Removable)])),
        PathBuf::from("system").join(".mrch"),
        "amzn1_account",
    );
    (root, locator)
}

/// A locator that never finds a device.
pub fn no_kindle() -> DeviceLocator {
    DeviceLocator::new(
        Box::new(FixedVolumes(Vec::new())),
        PathBuf::from("system").join(".mrch"),
        "amzn1_account",
    )
}

/// Puts a copy of `entry`'s book on the device in the expected layout.
pub fn copy_to_device(root: &Path, entry: &CatalogEntry) -> (PathBuf, PathBuf) {
    let dir = root.join("documents").join(&entry.author_sort);
    let book = dir.join(format!("{} - {}.mobi", entry.title_sort, entry.author));
    let index_dir = book.with_extension("sdr");
    std::fs::create_dir_all(&index_dir).unwrap();
    std::fs::copy(entry.path.as_ref().unwrap(), &book).unwrap();
    (book, index_dir)
}

pub const BOOK_PAGE: &str = r#"<html><body>
<div id="WikiModule_Characters"><ul>
  <li><span class="ItemName">Alice</span><span class="ItemDesc">Curious girl.</span></li>
  <li><span class="ItemName">Bob</span></li>
</ul></div>
<div id="WikiModule_Settings"><ul>
  <li><span class="ItemName">Wonderland</span></li>
</ul></div>
</body></html>"#;
