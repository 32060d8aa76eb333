use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::store::{Mutation, WorldStore};

/// Default export file name derived from the current UTC timestamp,
/// e.g. `world-20260806-142233.xml`.
#[must_use]
pub fn default_export_name() -> String {
    format!("world-{}.xml", chrono::Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Writes the current document into `dir` under the default name.
///
/// The document file is the only state this system persists.
pub async fn export(store: &WorldStore, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let path = dir.as_ref().join(default_export_name());
    export_to(store, &path).await?;
    Ok(path)
}

/// Writes the current document to an explicit path.
pub async fn export_to(store: &WorldStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, store.current())
        .await
        .with_context(|| format!("writing {}", path.display()))
}

/// Reads a previously exported document and publishes it as a rewrite.
///
/// Like every rewrite, the content is published unvalidated.
pub async fn import(store: &WorldStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let document = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    store.apply(&Mutation::Rewrite { document });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let dir = tempdir().unwrap();
        let store = WorldStore::new();
        store.apply(&Mutation::Rewrite {
            document: "<world><keepsake/></world>".to_string(),
        });
        let path = export(&store, dir.path()).await.unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("world-"));

        let restored = WorldStore::new();
        import(&restored, &path).await.unwrap();
        assert_eq!(restored.current(), "<world><keepsake/></world>");
    }

    #[tokio::test]
    async fn import_missing_file_fails_with_context() {
        let store = WorldStore::new();
        let err = import(&store, "/nonexistent/world.xml").await.unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/world.xml"));
        assert!(store.is_empty());
    }

    #[test]
    fn default_name_carries_the_extension() {
        let name = default_export_name();
        assert!(name.starts_with("world-"));
        assert!(name.ends_with(".xml"));
    }
}
