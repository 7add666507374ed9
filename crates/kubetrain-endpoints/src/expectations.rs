//! Controller expectations
//!
//! The watch cache lags behind the API server: an endpoint we just created
//! may not be visible on the next reconcile pass. Before creating, the
//! reconciler records how many creations it expects for a (job, role) key;
//! the notification router lowers the count as the watch reports them. While
//! a key is unsatisfied and unexpired, the reconciler leaves that role alone.
//!
//! Records live in a sharded `DashMap`, so reconcilers of different jobs and
//! the router never contend on a single lock.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use kubetrain_common::crd::ReplicaType;

/// How long an unsatisfied expectation blocks reconciliation
pub const DEFAULT_EXPECTATIONS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors raised when registering expectations
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExpectationsError {
    #[error("malformed expectations key '{0}'")]
    MalformedKey(String),

    #[error("expectations store is full ({capacity} keys)")]
    CapacityExceeded { capacity: usize },
}

/// Expectations key for the endpoints of one role: `<jobKey>/<role>/services`
pub fn endpoints_key(job_key: &str, replica_type: &ReplicaType) -> String {
    format!("{}/{}/services", job_key, replica_type.canonical())
}

/// Outstanding creations and deletions for one key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expectation {
    add: i64,
    del: i64,
    timestamp: Instant,
}

impl Expectation {
    fn new(add: i64, del: i64) -> Self {
        Self {
            add,
            del,
            timestamp: Instant::now(),
        }
    }

    /// Creations not yet observed
    pub fn add(&self) -> i64 {
        self.add
    }

    /// Deletions not yet observed
    pub fn del(&self) -> i64 {
        self.del
    }

    /// When the record was last raised
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Every expected action has been observed
    pub fn fulfilled(&self) -> bool {
        self.add <= 0 && self.del <= 0
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.timestamp.elapsed() > timeout
    }
}

/// Process-wide store of expectations keyed by `<jobKey>/<role>/<kind>`
#[derive(Debug)]
pub struct ControllerExpectations {
    records: DashMap<String, Expectation>,
    timeout: Duration,
    capacity: Option<usize>,
}

impl Default for ControllerExpectations {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerExpectations {
    /// Create an unbounded store with the default expiry
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            timeout: DEFAULT_EXPECTATIONS_TIMEOUT,
            capacity: None,
        }
    }

    /// Set how long an unsatisfied record blocks its key
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound the number of live keys
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Expiry window of this store
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record `count` more creations expected for `key`
    pub fn expect_creations(&self, key: &str, count: i64) -> Result<(), ExpectationsError> {
        self.raise(key, count, 0)
    }

    /// Record `count` more deletions expected for `key`
    pub fn expect_deletions(&self, key: &str, count: i64) -> Result<(), ExpectationsError> {
        self.raise(key, 0, count)
    }

    /// One expected creation for `key` was observed
    pub fn creation_observed(&self, key: &str) {
        self.lower(key, 1, 0);
    }

    /// One expected deletion for `key` was observed
    pub fn deletion_observed(&self, key: &str) {
        self.lower(key, 0, 1);
    }

    /// True when the reconciler may act on `key`
    ///
    /// A key is satisfied when it has no record, its record is fulfilled, or
    /// its record is older than the expiry window. Expired records are removed.
    pub fn satisfied(&self, key: &str) -> bool {
        let Some(record) = self.get(key) else {
            return true;
        };
        if record.fulfilled() {
            return true;
        }
        if record.is_expired(self.timeout) {
            let timeout = self.timeout;
            self.records
                .remove_if(key, |_, r| !r.fulfilled() && r.is_expired(timeout));
            warn!(
                key,
                add = record.add,
                del = record.del,
                "expectations expired before being observed"
            );
            return true;
        }
        debug!(
            key,
            add = record.add,
            del = record.del,
            "expectations not yet satisfied"
        );
        false
    }

    /// Current record for `key`, if any
    pub fn get(&self, key: &str) -> Option<Expectation> {
        self.records.get(key).map(|r| *r)
    }

    /// Drop the record for `key`
    pub fn delete_expectations(&self, key: &str) {
        self.records.remove(key);
    }

    /// Drop every record belonging to a job
    pub fn delete_job_expectations(&self, job_key: &str) {
        let prefix = format!("{}/", job_key);
        self.records.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Remove fulfilled and expired records, returning how many were removed
    pub fn prune(&self) -> usize {
        let timeout = self.timeout;
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.fulfilled() || r.is_expired(timeout)));
        before.saturating_sub(self.records.len())
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are held
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn raise(&self, key: &str, add: i64, del: i64) -> Result<(), ExpectationsError> {
        validate_key(key)?;
        self.ensure_capacity(key)?;

        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.fulfilled() || record.is_expired(self.timeout) {
                    *record = Expectation::new(add, del);
                } else {
                    record.add += add;
                    record.del += del;
                    record.timestamp = Instant::now();
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Expectation::new(add, del));
            }
        }
        debug!(key, add, del, "raised expectations");
        Ok(())
    }

    fn lower(&self, key: &str, add: i64, del: i64) {
        let fulfilled = match self.records.get_mut(key) {
            Some(mut record) => {
                record.add -= add;
                record.del -= del;
                record.fulfilled()
            }
            None => return,
        };
        debug!(key, add, del, "lowered expectations");
        if fulfilled {
            self.records.remove_if(key, |_, r| r.fulfilled());
        }
    }

    fn ensure_capacity(&self, key: &str) -> Result<(), ExpectationsError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        if self.records.contains_key(key) || self.records.len() < capacity {
            return Ok(());
        }
        self.prune();
        if self.records.len() < capacity {
            Ok(())
        } else {
            Err(ExpectationsError::CapacityExceeded { capacity })
        }
    }
}

fn validate_key(key: &str) -> Result<(), ExpectationsError> {
    if key.is_empty() || key.split('/').any(str::is_empty) {
        return Err(ExpectationsError::MalformedKey(key.to_string()));
    }
    Ok(())
}
