//! JSON file store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/homes/<home id>/<entity type>.json
//! ```
//!
//! Each file holds one [`StoredCollection`]. Writes go to a sibling temp
//! file which is then renamed over the target, so a crash mid-write leaves
//! the previous snapshot intact.

use super::{EntityStore, StoreError, StoredCollection};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sync_types::{EntityType, HomeId};

/// File-backed [`EntityStore`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn homes_dir(&self) -> PathBuf {
        self.root.join("homes")
    }

    fn collection_path(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<PathBuf, StoreError> {
        validate_key(home_id.as_str())?;
        Ok(self
            .homes_dir()
            .join(home_id.as_str())
            .join(format!("{}.json", entity_type.as_str())))
    }
}

/// Home ids become directory names; refuse anything that could escape
/// the store root.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl EntityStore for JsonFileStore {
    async fn read(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<StoredCollection, StoreError> {
        let path = self.collection_path(entity_type, home_id)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredCollection::default())
            }
            Err(e) => return Err(io_error(&path)(e)),
        };
        serde_json::from_slice(&contents).map_err(|source| StoreError::Corrupt { path, source })
    }

    async fn write(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
        snapshot: StoredCollection,
    ) -> Result<(), StoreError> {
        let path = self.collection_path(entity_type, home_id)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }

        let contents = serde_json::to_vec_pretty(&snapshot).map_err(StoreError::Serialize)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_error(&path))?;
        Ok(())
    }

    async fn contains(
        &self,
        entity_type: EntityType,
        home_id: &HomeId,
    ) -> Result<bool, StoreError> {
        let path = self.collection_path(entity_type, home_id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(io_error(&path))
    }

    async fn home_ids(&self) -> Result<Vec<HomeId>, StoreError> {
        let dir = self.homes_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut homes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_key(&name).is_err() {
                continue;
            }
            let home_id = HomeId::new(name);
            if self.contains(EntityType::Homes, &home_id).await? {
                homes.push(home_id);
            }
        }
        homes.sort();
        Ok(homes)
    }
}
