use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const BACKING_STORE_FILE: &str = "csopesy-backing-store.txt";

/// Simulated swap device. Evicted page contents are kept in memory keyed by
/// (pid, page) and mirrored to a human-readable text file after every
/// mutation, one line per live block:
///
/// `Key: <pid>_<page> Data: [<u16> <u16> ...]`
pub struct BackingStore {
    path: PathBuf,
    blocks: BTreeMap<(u32, usize), Vec<u8>>,
}

impl BackingStore {
    pub fn new(path: impl AsRef<Path>) -> BackingStore {
        BackingStore {
            path: path.as_ref().to_path_buf(),
            blocks: BTreeMap::new(),
        }
    }

    /// Drops every block and truncates the store file.
    pub fn clear(&mut self) -> io::Result<()> {
        self.blocks.clear();
        self.persist()
    }

    /// Saves the bytes of an evicted page, replacing any previous out-copy.
    pub fn store(&mut self, pid: u32, page: usize, bytes: &[u8]) -> io::Result<()> {
        self.blocks.insert((pid, page), bytes.to_vec());
        self.persist()
    }

    pub fn fetch(&self, pid: u32, page: usize) -> Option<&[u8]> {
        self.blocks.get(&(pid, page)).map(Vec::as_slice)
    }

    pub fn contains(&self, pid: u32, page: usize) -> bool {
        self.blocks.contains_key(&(pid, page))
    }

    /// Erases every block belonging to a process.
    pub fn remove_process(&mut self, pid: u32) -> io::Result<()> {
        let before = self.blocks.len();
        self.blocks.retain(|&(owner, _), _| owner != pid);
        if self.blocks.len() == before {
            return Ok(());
        }
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn persist(&self) -> io::Result<()> {
        let mut out = String::new();
        for ((pid, page), bytes) in &self.blocks {
            let words: Vec<String> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]).to_string())
                .collect();
            let _ = writeln!(out, "Key: {}_{} Data: [{}]", pid, page, words.join(" "));
        }
        fs::write(&self.path, out)
    }
}
