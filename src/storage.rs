use std::io::Write;
use std::path::PathBuf;

/// Small file store rooted at the application base directory.
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(storage_dir);
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    pub fn exists(&self, ident: &str) -> bool {
        self.base_dir.join(ident).is_file()
    }

    pub fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.base_dir.join(ident))
    }

    /// Write through a temp file and rename, so readers never see a partial file.
    pub fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.base_dir.join(ident);

        let mut temp = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        temp.write_all(data)?;
        temp.flush()?;

        temp.persist(&path).map(|_| ()).map_err(|e| e.error)
    }
}
