//! Classpath lookup of original class bytes, cached per loader.
//!
//! Restoring a redefined class needs its pristine bytes back, and the same class is often
//! restored several times across a test run, so lookups go through a cache keyed by loader and
//! internal name. Two loaders defining the same name are different classes, which is why the
//! loader is part of every key.

use crate::errors::Error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Identity of a defining class loader
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LoaderId(pub u64);

impl LoaderId {
    /// The bootstrap loader
    pub const BOOT: LoaderId = LoaderId(0);
}

/// True identity of a loaded class: defining loader plus internal name
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ClassId {
    pub loader: LoaderId,
    pub name: String,
}

impl ClassId {
    pub fn new(loader: LoaderId, name: impl Into<String>) -> ClassId {
        ClassId {
            loader,
            name: name.into(),
        }
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@loader{}", self.name, self.loader.0)
    }
}

/// Where class bytes come from (filesystem, archive, or an embedding runtime)
pub trait ClassBytesProvider {
    fn class_bytes(&self, loader: LoaderId, class_name: &str) -> Result<Vec<u8>, Error>;
}

/// Caching front over a [`ClassBytesProvider`]
pub struct ClassBytesSource<P> {
    provider: P,
    cache: Mutex<HashMap<(LoaderId, String), Arc<Vec<u8>>>>,
}

impl<P: ClassBytesProvider> ClassBytesSource<P> {
    pub fn new(provider: P) -> ClassBytesSource<P> {
        ClassBytesSource {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, loader: LoaderId, class_name: &str) -> Result<Arc<Vec<u8>>, Error> {
        let key = (loader, class_name.to_owned());
        if let Some(bytes) = self.cache.lock().get(&key) {
            return Ok(bytes.clone());
        }
        // Fetched outside the lock; a racing duplicate fetch is harmless
        let bytes = Arc::new(self.provider.class_bytes(loader, class_name)?);
        self.cache.lock().insert(key, bytes.clone());
        Ok(bytes)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// Provider reading `.class` files under a directory root
pub struct DirectoryClassSource {
    root: PathBuf,
}

impl DirectoryClassSource {
    pub fn new(root: impl Into<PathBuf>) -> DirectoryClassSource {
        DirectoryClassSource { root: root.into() }
    }
}

impl ClassBytesProvider for DirectoryClassSource {
    fn class_bytes(&self, _loader: LoaderId, class_name: &str) -> Result<Vec<u8>, Error> {
        let path = self.root.join(format!("{}.class", class_name));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::ClassNotFound {
                class_name: class_name.to_owned(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        fetches: AtomicUsize,
    }

    impl ClassBytesProvider for CountingProvider {
        fn class_bytes(&self, loader: LoaderId, class_name: &str) -> Result<Vec<u8>, Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if class_name == "missing/Class" {
                return Err(Error::ClassNotFound {
                    class_name: class_name.to_owned(),
                });
            }
            Ok(format!("{}:{}", loader.0, class_name).into_bytes())
        }
    }

    #[test]
    fn lookups_are_cached_per_loader_and_name() {
        let source = ClassBytesSource::new(CountingProvider {
            fetches: AtomicUsize::new(0),
        });

        let first = source.get(LoaderId(1), "sample/Target").unwrap();
        let again = source.get(LoaderId(1), "sample/Target").unwrap();
        assert_eq!(first, again);
        assert_eq!(source.provider.fetches.load(Ordering::SeqCst), 1);

        // Same name under another loader is a different class
        let other = source.get(LoaderId(2), "sample/Target").unwrap();
        assert_ne!(first, other);
        assert_eq!(source.provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clearing_forces_a_refetch() {
        let source = ClassBytesSource::new(CountingProvider {
            fetches: AtomicUsize::new(0),
        });
        source.get(LoaderId(1), "sample/Target").unwrap();
        source.clear();
        source.get(LoaderId(1), "sample/Target").unwrap();
        assert_eq!(source.provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_class_surfaces_by_name() {
        let source = ClassBytesSource::new(CountingProvider {
            fetches: AtomicUsize::new(0),
        });
        match source.get(LoaderId::BOOT, "missing/Class") {
            Err(Error::ClassNotFound { class_name }) => assert_eq!(class_name, "missing/Class"),
            other => panic!("expected a missing class, got {:?}", other.err()),
        }
    }
}
