use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::base::{CollectionConfig, ErrorPolicy};
use crate::collection::Collection;
use crate::error::{Error, Result};

/// One sqlite database file and the collections opened on it.
///
/// The connection is shared by every collection; statements are serialized on it.
pub struct Store {
    connection: Arc<Mutex<rusqlite::Connection>>,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
    error_policy: ErrorPolicy,
}

fn trace(val: &str) {
    trace!("sql: {}", val);
}

fn profile(val: &str, time: std::time::Duration) {
    trace!("profile: {} {}ns", val, time.as_nanos());
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store> {
        info!("Opening store at {}", path.as_ref().display());
        Ok(Store::init(rusqlite::Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Store> {
        info!("Opening in-memory store");
        Ok(Store::init(rusqlite::Connection::open_in_memory()?))
    }

    fn init(mut conn: rusqlite::Connection) -> Store {
        conn.trace(Some(trace));
        conn.profile(Some(profile));
        Store {
            connection: Arc::new(Mutex::new(conn)),
            collections: Mutex::new(HashMap::new()),
            error_policy: ErrorPolicy::default(),
        }
    }

    /// Error policy for collections obtained through [`Store::collection`] from now on.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Store {
        self.error_policy = policy;
        self
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.connection.lock().path().map(|p| p.to_path_buf())
    }

    /// Returns the collection called `name`, creating it on first use.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collection_with_config(CollectionConfig::default(name).error_policy(self.error_policy))
    }

    /// Like [`Store::collection`], but a newly created collection uses `config`.
    /// A collection that is already registered is returned as it is.
    pub fn collection_with_config(&self, config: &CollectionConfig) -> Result<Arc<Collection>> {
        if config.name.is_empty() {
            return Err(Error::InvalidArgument("collection name cannot be empty".to_string()));
        }

        let mut collections = self.collections.lock();
        if let Some(collection) = collections.get(&config.name) {
            return Ok(collection.clone());
        }

        info!("Creating collection {}", config.name);
        let collection = Arc::new(Collection::create(self.connection.clone(), config.clone())?);
        collections.insert(config.name.clone(), collection.clone());
        Ok(collection)
    }

    /// Names of the collections obtained so far, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
