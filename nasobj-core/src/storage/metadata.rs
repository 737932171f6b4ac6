use crate::error::{NasError, Result};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use xattr::FileExt;

pub const METADATA_KEY: &str = "user.nasobj.metadata";
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DELETE_AT_HEADER: &str = "X-Delete-At";

// Keeps every attribute value within the smallest per-value limit seen on
// shared filesystems.
const METADATA_CHUNK_SIZE: usize = 254;

/// Metadata stored with every object entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "X-Timestamp")]
    pub timestamp: Timestamp,
    #[serde(rename = "Content-Type")]
    pub content_type: String,
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(rename = "Content-Length", default)]
    pub content_length: u64,
    /// Custom headers such as `X-Object-Meta-*` and `X-Delete-At`.
    #[serde(flatten)]
    pub headers: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(timestamp: Timestamp, content_type: impl Into<String>) -> Self {
        Self {
            timestamp,
            content_type: content_type.into(),
            etag: String::new(),
            content_length: 0,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_directory(&self) -> bool {
        self.content_type == DIRECTORY_CONTENT_TYPE
    }

    /// Header value by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn delete_at(&self) -> Result<Option<u64>> {
        match self.header(DELETE_AT_HEADER) {
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                NasError::InvalidRequest(format!("invalid {} value '{}'", DELETE_AT_HEADER, raw))
            }),
            None => Ok(None),
        }
    }

    /// Metadata for an entry written by something other than this layer.
    pub fn synthesize(meta: &std::fs::Metadata, etag: String) -> Self {
        let ticks = meta
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_micros() as u64 / 10)
            .unwrap_or_default();

        let content_type = if meta.is_dir() {
            DIRECTORY_CONTENT_TYPE
        } else {
            DEFAULT_CONTENT_TYPE
        };

        Self {
            timestamp: Timestamp::from_ticks(ticks),
            content_type: content_type.to_string(),
            etag,
            content_length: if meta.is_dir() { 0 } else { meta.len() },
            headers: BTreeMap::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// `x-object-meta-color` becomes `X-Object-Meta-Color`.
pub fn canonical_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

trait XattrTarget {
    fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
    fn set_attr(&self, name: &str, value: &[u8]) -> io::Result<()>;
    fn remove_attr(&self, name: &str) -> io::Result<()>;
}

impl XattrTarget for Path {
    fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        xattr::get(self, name)
    }

    fn set_attr(&self, name: &str, value: &[u8]) -> io::Result<()> {
        xattr::set(self, name, value)
    }

    fn remove_attr(&self, name: &str) -> io::Result<()> {
        xattr::remove(self, name)
    }
}

impl XattrTarget for File {
    fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        self.get_xattr(name)
    }

    fn set_attr(&self, name: &str, value: &[u8]) -> io::Result<()> {
        self.set_xattr(name, value)
    }

    fn remove_attr(&self, name: &str) -> io::Result<()> {
        self.remove_xattr(name)
    }
}

fn chunk_key(index: usize) -> String {
    if index == 0 {
        METADATA_KEY.to_string()
    } else {
        format!("{}{}", METADATA_KEY, index)
    }
}

fn write_chunks<T: XattrTarget + ?Sized>(target: &T, meta: &ObjectMetadata) -> Result<()> {
    let payload = meta.encode()?;
    let mut written = 0usize;
    for (index, chunk) in payload.chunks(METADATA_CHUNK_SIZE).enumerate() {
        target.set_attr(&chunk_key(index), chunk)?;
        written = index + 1;
    }

    let mut stale = written;
    while target.get_attr(&chunk_key(stale))?.is_some() {
        target.remove_attr(&chunk_key(stale))?;
        stale += 1;
    }

    Ok(())
}

fn read_chunks<T: XattrTarget + ?Sized>(target: &T) -> Result<Option<ObjectMetadata>> {
    let mut payload = Vec::new();
    let mut index = 0usize;
    while let Some(chunk) = target.get_attr(&chunk_key(index))? {
        payload.extend_from_slice(&chunk);
        index += 1;
    }

    if index == 0 {
        return Ok(None);
    }

    ObjectMetadata::decode(&payload).map(Some)
}

pub fn write_metadata(path: &Path, meta: &ObjectMetadata) -> Result<()> {
    write_chunks(path, meta)
}

pub fn write_metadata_to_file(file: &File, meta: &ObjectMetadata) -> Result<()> {
    write_chunks(file, meta)
}

pub fn read_metadata(path: &Path) -> Result<Option<ObjectMetadata>> {
    read_chunks(path)
}

pub fn read_metadata_from_file(file: &File) -> Result<Option<ObjectMetadata>> {
    read_chunks(file)
}
