use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // List of child names
}

/// In-memory filesystem for tests.
///
/// Clones share the same underlying tree, so a test can keep one handle
/// while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("/"), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut files = self.lock();
        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(&mut files, parent);
        }
        files.insert(path.clone(), MockEntry::File(content.into()));
        Self::link_child(&mut files, &path);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut files = self.lock();
        Self::ensure_dir_entry(&mut files, path.as_ref());
    }

    /// Names of the entries directly inside `dir`, sorted.
    pub fn list(&self, dir: impl AsRef<Path>) -> Vec<String> {
        let files = self.lock();
        match files.get(dir.as_ref()) {
            Some(MockEntry::Dir(children)) => {
                let mut names = children.clone();
                names.sort();
                names
            }
            _ => Vec::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn parent_of(path: &Path) -> Option<&Path> {
        match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Some(Path::new(".")),
            other => other,
        }
    }

    fn ensure_dir_entry(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = Self::parent_of(path) {
            if parent != path {
                Self::ensure_dir_entry(files, parent);
                Self::link_child(files, path);
            }
        }
    }

    fn link_child(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let (Some(parent), Some(name)) = (
            Self::parent_of(path),
            path.file_name().and_then(|n| n.to_str()),
        ) else {
            return;
        };
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }

    fn unlink_child(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let (Some(parent), Some(name)) = (
            Self::parent_of(path),
            path.file_name().and_then(|n| n.to_str()),
        ) else {
            return;
        };
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            children.retain(|c| c != name);
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let files = self.lock();
        match files.get(path) {
            Some(MockEntry::File(content)) => Ok(content.clone()),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::Dir(_)))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.add_dir(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.lock();
        let entry = match files.remove(from) {
            Some(MockEntry::File(content)) => MockEntry::File(content),
            Some(dir @ MockEntry::Dir(_)) => {
                files.insert(from.to_path_buf(), dir);
                return Err(anyhow!("Renaming directories is not supported: {:?}", from));
            }
            None => return Err(anyhow!("File not found: {:?}", from)),
        };
        Self::unlink_child(&mut files, from);

        match Self::parent_of(to) {
            Some(parent) if matches!(files.get(parent), Some(MockEntry::Dir(_))) => {}
            _ => {
                files.insert(from.to_path_buf(), entry);
                Self::link_child(&mut files, from);
                return Err(anyhow!("Target directory does not exist: {:?}", to));
            }
        }

        files.insert(to.to_path_buf(), entry);
        Self::link_child(&mut files, to);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut files = self.lock();
        match files.get(path) {
            Some(MockEntry::File(_)) => {
                files.remove(path);
                Self::unlink_child(&mut files, path);
                Ok(())
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.lock();
        match files.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
