use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

type HostLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

static HOST_LOCKS: OnceLock<HostLocks> = OnceLock::new();

/// Returns the lock shared by every caller targeting `host` in this process.
/// Host names are compared case-insensitively.
pub fn host_lock(host: &str) -> Arc<tokio::sync::Mutex<()>> {
    let locks = HOST_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    Arc::clone(
        locks
            .entry(host.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host_shares_lock() {
        let a = host_lock("Lock-Test.example");
        let b = host_lock("lock-test.example");
        let c = host_lock("other-lock-test.example");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_lock_serializes_holders() {
        let lock = host_lock("serialize-test.example");
        let guard = lock.lock().await;

        let contender = host_lock("serialize-test.example");
        assert!(contender.try_lock().is_err());

        drop(guard);
        assert!(contender.try_lock().is_ok());
    }
}
