//! Content addressing for storage bundles.
//!
//! Every file is stored as a single block addressed by `<md5>+<size>`. A
//! bundle (collection) is described by a manifest text with one line per
//! directory stream:
//!
//! ```text
//! . 979af1245a12a1fed634d4222473bfdc+16 0:16:blorp.txt
//! ./sub d41d8cd98f00b204e9800998ecf8427e+0 0:0:empty.txt
//! ```
//!
//! The bundle itself is addressed by the portable data hash of that text.

use crate::constants::prefixes;
use crate::errors::DomainError;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fmt;

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockLocator {
    pub hash: String,
    pub size: u64,
}

impl BlockLocator {
    pub fn for_data(data: &[u8]) -> Self {
        Self {
            hash: md5_hex(data),
            size: data.len() as u64,
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let mut parts = s.split('+');
        let hash = parts.next().unwrap_or_default();
        let size = parts
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| DomainError::InvalidStorageAddress(s.to_string()))?;
        if hash.len() != 32 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidStorageAddress(s.to_string()));
        }
        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            size,
        })
    }
}

impl fmt::Display for BlockLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.hash, self.size)
    }
}

/// Portable data hash of a manifest: the block locator of its text.
pub fn portable_data_hash(manifest_text: &str) -> String {
    BlockLocator::for_data(manifest_text.as_bytes()).to_string()
}

/// `storage:<pdh>[/<path>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAddress {
    pub pdh: String,
    pub path: Option<String>,
}

impl StorageAddress {
    pub fn new(pdh: impl Into<String>, path: Option<String>) -> Self {
        Self {
            pdh: pdh.into(),
            path: path.filter(|p| !p.is_empty()),
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let rest = s
            .strip_prefix(prefixes::STORAGE)
            .ok_or_else(|| DomainError::InvalidStorageAddress(s.to_string()))?;
        let rest = rest.split('#').next().unwrap_or_default();
        let (pdh, path) = match rest.split_once('/') {
            Some((pdh, path)) => (pdh, Some(path.trim_end_matches('/').to_string())),
            None => (rest, None),
        };
        BlockLocator::parse(pdh)?;
        Ok(Self::new(pdh, path))
    }

    pub fn is_storage_ref(s: &str) -> bool {
        s.starts_with(prefixes::STORAGE)
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}{}/{}", prefixes::STORAGE, self.pdh, path),
            None => write!(f, "{}{}", prefixes::STORAGE, self.pdh),
        }
    }
}

fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ' ' | '\t' | '\n' | '\\' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_name(name: &str) -> Result<String, DomainError> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let octal = name
                .get(i + 1..i + 4)
                .and_then(|o| u8::from_str_radix(o, 8).ok())
                .ok_or_else(|| {
                    DomainError::MalformedManifest(format!("bad escape in name '{}'", name))
                })?;
            out.push(octal);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| DomainError::MalformedManifest(format!("name '{}' is not UTF-8", name)))
}

/// A file entry in a manifest, with the block it is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub locator: BlockLocator,
}

/// Builds manifest text from files that are each stored as one block.
///
/// Entries are grouped by directory and sorted so the same set of files
/// always yields the same text, and therefore the same portable data hash.
pub fn build_manifest_text(entries: &[ManifestEntry]) -> String {
    let mut streams: BTreeMap<String, Vec<(&str, &BlockLocator)>> = BTreeMap::new();
    for entry in entries {
        let (dir, name) = match entry.path.rsplit_once('/') {
            Some((dir, name)) => (format!("./{}", dir), name),
            None => (".".to_string(), entry.path.as_str()),
        };
        streams.entry(dir).or_default().push((name, &entry.locator));
    }

    let mut text = String::new();
    for (stream, mut files) in streams {
        files.sort_by(|a, b| a.0.cmp(b.0));
        text.push_str(&escape_name(&stream));
        for (_, locator) in &files {
            text.push(' ');
            text.push_str(&locator.to_string());
        }
        let mut offset = 0u64;
        for (name, locator) in &files {
            text.push_str(&format!(" {}:{}:{}", offset, locator.size, escape_name(name)));
            offset += locator.size;
        }
        text.push('\n');
    }
    text
}

/// A contiguous range of one block that makes up part of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSegment {
    pub locator: BlockLocator,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    files: BTreeMap<String, Vec<BlockSegment>>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let mut files: BTreeMap<String, Vec<BlockSegment>> = BTreeMap::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let mut tokens = line.split(' ');
            let stream = unescape_name(tokens.next().unwrap_or_default())?;
            let stream_prefix = match stream.as_str() {
                "." => String::new(),
                s => match s.strip_prefix("./") {
                    Some(rest) => format!("{}/", rest),
                    None => {
                        return Err(DomainError::MalformedManifest(format!(
                            "stream name '{}' must start with '.'",
                            s
                        )))
                    }
                },
            };

            let mut blocks: Vec<(u64, BlockLocator)> = Vec::new();
            let mut stream_len = 0u64;
            for token in tokens {
                if token.contains(':') {
                    let mut parts = token.splitn(3, ':');
                    let (pos, size, name) = match (parts.next(), parts.next(), parts.next()) {
                        (Some(p), Some(s), Some(n)) => (p, s, n),
                        _ => {
                            return Err(DomainError::MalformedManifest(format!(
                                "bad file segment '{}'",
                                token
                            )))
                        }
                    };
                    let pos: u64 = pos.parse().map_err(|_| {
                        DomainError::MalformedManifest(format!("bad position in '{}'", token))
                    })?;
                    let size: u64 = size.parse().map_err(|_| {
                        DomainError::MalformedManifest(format!("bad size in '{}'", token))
                    })?;
                    let path = format!("{}{}", stream_prefix, unescape_name(name)?);
                    let segments = files.entry(path).or_default();
                    segments.extend(slice_blocks(&blocks, pos, size));
                } else {
                    let locator = BlockLocator::parse(token)
                        .map_err(|_| DomainError::MalformedManifest(format!("bad locator '{}'", token)))?;
                    blocks.push((stream_len, locator.clone()));
                    stream_len += locator.size;
                }
            }
        }

        Ok(Self { files })
    }

    pub fn segments(&self, path: &str) -> Option<&[BlockSegment]> {
        self.files.get(path.trim_start_matches("./")).map(|s| s.as_slice())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|k| k.as_str())
    }

    pub fn contains_dir(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files.keys().any(|k| k.starts_with(&prefix))
    }
}

fn slice_blocks(blocks: &[(u64, BlockLocator)], pos: u64, size: u64) -> Vec<BlockSegment> {
    let end = pos + size;
    blocks
        .iter()
        .filter_map(|(start, locator)| {
            let block_end = start + locator.size;
            let lo = pos.max(*start);
            let hi = end.min(block_end);
            (hi > lo).then(|| BlockSegment {
                locator: locator.clone(),
                offset: lo - start,
                len: hi - lo,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_locator_for_data() {
        let locator = BlockLocator::for_data(b"");
        assert_eq!(locator.to_string(), "d41d8cd98f00b204e9800998ecf8427e+0");
    }

    #[test]
    fn test_single_file_manifest_and_pdh() {
        let entries = vec![ManifestEntry {
            path: "blorp.txt".to_string(),
            locator: BlockLocator::parse("979af1245a12a1fed634d4222473bfdc+16").unwrap(),
        }];
        let text = build_manifest_text(&entries);
        assert_eq!(text, ". 979af1245a12a1fed634d4222473bfdc+16 0:16:blorp.txt\n");
        assert_eq!(
            portable_data_hash(&text),
            "169f39d466a5438ac4a90e779bf750c7+53"
        );
    }

    #[test]
    fn test_manifest_streams_are_sorted_and_offsets_accumulate() {
        let a = BlockLocator::for_data(b"aaaa");
        let b = BlockLocator::for_data(b"bb");
        let c = BlockLocator::for_data(b"c");
        let entries = vec![
            ManifestEntry {
                path: "sub/c.txt".to_string(),
                locator: c.clone(),
            },
            ManifestEntry {
                path: "b.txt".to_string(),
                locator: b.clone(),
            },
            ManifestEntry {
                path: "a.txt".to_string(),
                locator: a.clone(),
            },
        ];
        let text = build_manifest_text(&entries);
        assert_eq!(
            text,
            format!(". {} {} 0:4:a.txt 4:2:b.txt\n./sub {} 0:1:c.txt\n", a, b, c)
        );
    }

    #[test]
    fn test_manifest_parse_round_trip_segments() {
        let a = BlockLocator::for_data(b"aaaa");
        let b = BlockLocator::for_data(b"bb");
        let text = format!(". {} {} 0:4:a.txt 4:2:my\\040file.txt\n", a, b);
        let manifest = Manifest::parse(&text).unwrap();

        let segs = manifest.segments("my file.txt").unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].locator, b);
        assert_eq!(segs[0].offset, 0);
        assert_eq!(segs[0].len, 2);
        assert!(manifest.segments("missing.txt").is_none());
    }

    #[test]
    fn test_manifest_file_spanning_blocks() {
        let a = BlockLocator::for_data(b"aaaa");
        let b = BlockLocator::for_data(b"bbbb");
        let text = format!(". {} {} 2:4:x\n", a, b);
        let manifest = Manifest::parse(&text).unwrap();
        let segs = manifest.segments("x").unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].offset, segs[0].len), (2, 2));
        assert_eq!((segs[1].offset, segs[1].len), (0, 2));
    }

    #[test]
    fn test_manifest_contains_dir() {
        let a = BlockLocator::for_data(b"a");
        let manifest = Manifest::parse(&format!("./out/dir {} 0:1:f\n", a)).unwrap();
        assert!(manifest.contains_dir("out"));
        assert!(manifest.contains_dir("out/dir"));
        assert!(!manifest.contains_dir("ou"));
    }

    #[test]
    fn test_manifest_rejects_bad_locator() {
        assert!(Manifest::parse(". nothex+3 0:3:x\n").is_err());
    }

    #[test]
    fn test_storage_address_parse() {
        let addr =
            StorageAddress::parse("storage:99999999999999999999999999999998+99/file1.txt").unwrap();
        assert_eq!(addr.pdh, "99999999999999999999999999999998+99");
        assert_eq!(addr.path.as_deref(), Some("file1.txt"));
        assert_eq!(
            addr.to_string(),
            "storage:99999999999999999999999999999998+99/file1.txt"
        );

        let bare = StorageAddress::parse("storage:99999999999999999999999999999998+99").unwrap();
        assert_eq!(bare.path, None);

        assert!(StorageAddress::parse("file:///tmp/x").is_err());
        assert!(StorageAddress::parse("storage:xyz/file").is_err());
    }
}
