//! Typed key-value service over the KV repository.

use std::sync::Arc;

use crate::domain::{clamp_page_limit, validate_key, Item, ScanFilter};
use crate::error::Error;
use crate::ports::KvRepository;

pub struct KvService {
    repo: Arc<dyn KvRepository>,
}

impl KvService {
    #[must_use]
    pub fn new(repo: Arc<dyn KvRepository>) -> Self {
        Self { repo }
    }

    pub fn upsert(&self, item: Item) -> Result<Item, Error> {
        item.validate()?;
        self.repo.upsert(item)
    }

    pub fn get(&self, key: &str) -> Result<Item, Error> {
        validate_key(key)?;
        self.repo.get(key)
    }

    pub fn delete(&self, key: &str) -> Result<bool, Error> {
        validate_key(key)?;
        self.repo.delete(key)
    }

    pub fn scan(&self, mut filter: ScanFilter) -> Result<Vec<Item>, Error> {
        filter.validate()?;
        filter.limit = clamp_page_limit(filter.limit);
        self.repo.scan(&filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct StubKvRepo {
        scanned: Mutex<Vec<ScanFilter>>,
    }

    impl KvRepository for StubKvRepo {
        fn upsert(&self, item: Item) -> Result<Item, Error> {
            Ok(item)
        }

        fn get(&self, _key: &str) -> Result<Item, Error> {
            Err(Error::NotFound)
        }

        fn delete(&self, _key: &str) -> Result<bool, Error> {
            Ok(true)
        }

        fn scan(&self, filter: &ScanFilter) -> Result<Vec<Item>, Error> {
            self.scanned.lock().push(filter.clone());
            Ok(Vec::new())
        }
    }

    #[test]
    fn upsert_rejects_invalid_key() {
        let svc = KvService::new(Arc::new(StubKvRepo::default()));
        let err = svc.upsert(Item::new("bad key", "cat", json!(1))).unwrap_err();
        assert!(matches!(err, Error::InvalidKey));
    }

    #[test]
    fn get_rejects_invalid_key() {
        let svc = KvService::new(Arc::new(StubKvRepo::default()));
        assert!(matches!(svc.get("no spaces allowed"), Err(Error::InvalidKey)));
    }

    #[test]
    fn scan_clamps_limit() {
        let repo = Arc::new(StubKvRepo::default());
        let svc = KvService::new(repo.clone());

        svc.scan(ScanFilter::default()).unwrap();
        svc.scan(ScanFilter { limit: 5000, ..ScanFilter::default() }).unwrap();

        let scanned = repo.scanned.lock();
        assert_eq!(scanned[0].limit, 100);
        assert_eq!(scanned[1].limit, 1000);
    }

    #[test]
    fn scan_rejects_invalid_category() {
        let svc = KvService::new(Arc::new(StubKvRepo::default()));
        let filter = ScanFilter { category: "bad cat".into(), ..ScanFilter::default() };
        assert!(matches!(svc.scan(filter), Err(Error::InvalidCategory)));
    }
}
