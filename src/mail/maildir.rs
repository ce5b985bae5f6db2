//! Maildir layout helpers.
//!
//! Incoming mail lives in `<root>/new/<id>`. Terminal folders follow the
//! Maildir++ convention `<root>/.<name>/new/<id>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::fs::FileSystem;

static DELIVERY_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl Maildir {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn new_dir(&self) -> PathBuf {
        self.root.join("new")
    }

    pub fn entry_path(&self, id: &str) -> PathBuf {
        self.new_dir().join(id)
    }

    pub fn subfolder_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}")).join("new")
    }

    /// File names in `new/`, sorted so startup order is stable.
    pub fn list_new(&self) -> Result<Vec<String>> {
        let dir = self.new_dir();
        let mut names: Vec<String> = self
            .fs
            .read_dir(&dir)?
            .into_iter()
            .filter(|path| self.fs.is_file(path))
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Move `new/<id>` into the named subfolder, creating it if needed.
    pub fn move_to_subfolder(&self, id: &str, name: &str) -> Result<PathBuf> {
        let dir = self.subfolder_dir(name);
        self.fs
            .create_dir_all(&dir)
            .with_context(|| format!("preparing maildir folder '{name}'"))?;
        let target = dir.join(id);
        self.fs.rename(&self.entry_path(id), &target)?;
        Ok(target)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.fs.remove_file(&self.entry_path(id))
    }

    /// Store a new message in `new/` under a fresh unique name.
    pub fn deliver(&self, contents: &[u8]) -> Result<PathBuf> {
        let path = self.new_dir().join(unique_name());
        self.fs.write(&path, contents)?;
        Ok(path)
    }
}

fn unique_name() -> String {
    let now = Utc::now();
    let seq = DELIVERY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}.M{}P{}Q{}.distro-tracker",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        std::process::id(),
        seq
    )
}
