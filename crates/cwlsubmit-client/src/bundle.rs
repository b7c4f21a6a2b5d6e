use cwlsubmit_core::manifest::{self, BlockLocator, ManifestEntry};
use std::collections::BTreeMap;

/// A set of files, keyed by their path inside the bundle, ready to be
/// stored as one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, data: Vec<u8>) {
        self.files.insert(path.into(), data);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, d)| (p.as_str(), d.as_slice()))
    }

    pub fn entries(&self) -> Vec<ManifestEntry> {
        self.files
            .iter()
            .map(|(path, data)| ManifestEntry {
                path: path.clone(),
                locator: BlockLocator::for_data(data),
            })
            .collect()
    }

    pub fn manifest_text(&self) -> String {
        manifest::build_manifest_text(&self.entries())
    }

    pub fn portable_data_hash(&self) -> String {
        manifest::portable_data_hash(&self.manifest_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_manifest_for_single_file() {
        let mut bundle = Bundle::new();
        bundle.add_file("blorp.txt", b"blopper blubber\n".to_vec());
        assert_eq!(
            bundle.manifest_text(),
            ". 979af1245a12a1fed634d4222473bfdc+16 0:16:blorp.txt\n"
        );
    }

    #[test]
    fn test_bundle_pdh_is_independent_of_insertion_order() {
        let mut a = Bundle::new();
        a.add_file("x/1.txt", b"one".to_vec());
        a.add_file("2.txt", b"two".to_vec());

        let mut b = Bundle::new();
        b.add_file("2.txt", b"two".to_vec());
        b.add_file("x/1.txt", b"one".to_vec());

        assert_eq!(a.portable_data_hash(), b.portable_data_hash());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_bundle_replaces_duplicate_path() {
        let mut bundle = Bundle::new();
        bundle.add_file("a", b"1".to_vec());
        bundle.add_file("a", b"1".to_vec());
        assert_eq!(bundle.len(), 1);
        assert!(bundle.contains("a"));
    }
}
