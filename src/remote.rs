use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use serde::Serialize;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::domain::{DatasetId, extract_identifier};
use crate::error::BoosterError;
use crate::store::write_bytes_atomic;

/// A blob in the configured container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteObject {
    pub name: String,
    pub dataset_identifier: Option<DatasetId>,
}

impl RemoteObject {
    pub fn from_name(name: String) -> Self {
        Self {
            dataset_identifier: extract_identifier(&name),
            name,
        }
    }
}

pub trait ObjectStoreClient: Send + Sync {
    /// Object names in the container.
    fn list(&self) -> Result<Vec<String>, BoosterError>;
    /// Uploads a local file under its own file name, overwriting. Returns the object name.
    fn upload(&self, local_path: &Utf8Path) -> Result<String, BoosterError>;
    fn download(&self, object_name: &str, destination: &Utf8Path) -> Result<(), BoosterError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Azure { container: String },
    Local { root: Utf8PathBuf },
}

impl StoreLocation {
    /// Accepts `azure://<container>` and `file://<dir>`.
    pub fn parse(url: &str) -> Result<Self, BoosterError> {
        if let Some(container) = url.strip_prefix("azure://") {
            let container = container.trim_end_matches('/');
            if container.is_empty() || container.contains('/') {
                return Err(BoosterError::ObjectStore(format!(
                    "invalid container in {url:?}"
                )));
            }
            return Ok(StoreLocation::Azure {
                container: container.to_string(),
            });
        }
        if let Some(root) = url.strip_prefix("file://") {
            if root.is_empty() {
                return Err(BoosterError::ObjectStore(format!(
                    "missing directory in {url:?}"
                )));
            }
            return Ok(StoreLocation::Local {
                root: Utf8PathBuf::from(root),
            });
        }
        Err(BoosterError::ObjectStore(format!(
            "unsupported object store url {url:?}"
        )))
    }
}

/// Blocking facade over an `object_store` backend.
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    location: StoreLocation,
    runtime: Runtime,
}

impl BlobStore {
    pub fn from_url(url: &str) -> Result<Self, BoosterError> {
        let location = StoreLocation::parse(url)?;
        let store: Arc<dyn ObjectStore> = match &location {
            StoreLocation::Azure { container } => Arc::new(
                MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .build()?,
            ),
            StoreLocation::Local { root } => {
                fs::create_dir_all(root.as_std_path())
                    .map_err(|err| BoosterError::ObjectStore(format!("{root}: {err}")))?;
                Arc::new(LocalFileSystem::new_with_prefix(root.as_std_path())?)
            }
        };
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| BoosterError::ObjectStore(err.to_string()))?;
        debug!(?location, "object store ready");
        Ok(Self {
            store,
            location,
            runtime,
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }
}

fn object_path(name: &str) -> Result<ObjectPath, BoosterError> {
    ObjectPath::parse(name)
        .map_err(|err| BoosterError::ObjectStore(format!("invalid object name {name:?}: {err}")))
}

impl ObjectStoreClient for BlobStore {
    fn list(&self) -> Result<Vec<String>, BoosterError> {
        let metas = self
            .runtime
            .block_on(self.store.list(None).try_collect::<Vec<_>>())?;
        let mut names = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn upload(&self, local_path: &Utf8Path) -> Result<String, BoosterError> {
        let name = local_path
            .file_name()
            .ok_or_else(|| BoosterError::ObjectStore(format!("{local_path} has no file name")))?
            .to_string();
        let content = fs::read(local_path.as_std_path())
            .map_err(|err| BoosterError::Filesystem(format!("read {local_path}: {err}")))?;
        let size = content.len();
        let path = object_path(&name)?;
        self.runtime
            .block_on(self.store.put(&path, content.into()))?;
        info!(object = %name, bytes = size, "object uploaded");
        Ok(name)
    }

    fn download(&self, object_name: &str, destination: &Utf8Path) -> Result<(), BoosterError> {
        let path = object_path(object_name)?;
        let content = self.runtime.block_on(async {
            let result = self.store.get(&path).await?;
            result.bytes().await
        })?;
        write_bytes_atomic(destination, &content)?;
        info!(object = %object_name, %destination, bytes = content.len(), "object downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_locations() {
        assert_eq!(
            StoreLocation::parse("azure://data").unwrap(),
            StoreLocation::Azure {
                container: "data".to_string()
            }
        );
        assert_eq!(
            StoreLocation::parse("file:///srv/blobs").unwrap(),
            StoreLocation::Local {
                root: Utf8PathBuf::from("/srv/blobs")
            }
        );
        assert_matches!(
            StoreLocation::parse("s3://bucket"),
            Err(BoosterError::ObjectStore(_))
        );
        assert_matches!(
            StoreLocation::parse("azure://"),
            Err(BoosterError::ObjectStore(_))
        );
    }

    #[test]
    fn remote_object_identifier() {
        let object = RemoteObject::from_name("100057.parquet".to_string());
        assert_eq!(object.dataset_identifier.unwrap().as_str(), "100057");
        assert!(RemoteObject::from_name("readme".to_string()).dataset_identifier.is_none());
    }
}
