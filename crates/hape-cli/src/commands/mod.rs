pub mod inspect;
pub mod submit;

use std::sync::Arc;

use anyhow::anyhow;
use hape_core::config::StoreConfig;
use hape_target::{StoreError, TargetStore};

/// Open the configured store for one command.
///
/// A redb file can only be held by one process, so it is unavailable
/// while `haped run` is using it.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn TargetStore>> {
    hape_target::open(config).map_err(|e| match e {
        StoreError::Locked(path) => anyhow!(
            "store {path} is in use by another process, probably haped. \
             The redb backend is single-process: stop the daemon first, \
             or use backend = \"fs\" to submit commands while it runs"
        ),
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hape_core::config::StoreBackend;
    use hape_target::RedbTargetStore;

    #[test]
    fn locked_redb_store_explains_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.redb");
        let _daemon = RedbTargetStore::open(&path).unwrap();

        let config = StoreConfig {
            backend: StoreBackend::Redb,
            root: path,
            ..StoreConfig::default()
        };
        let err = open_store(&config).err().unwrap();
        assert!(err.to_string().contains("single-process"), "{err}");
    }
}
