//! Bundles and bundle lists
//!
//! A [`Bundle`] is the unit of data moved through the network. The control
//! plane only needs its addressing, lifetime, custody flags and the
//! per-bundle [`ForwardingLog`]; block encoding lives elsewhere.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::eid::EndpointId;
use crate::fwdlog::ForwardingLog;

/// Shared handle to a bundle
pub type BundleRef = Arc<Bundle>;

/// Creation sequence numbers for bundles made in this process
static NEXT_CREATION_SEQNO: AtomicU64 = AtomicU64::new(0);

fn next_creation_seqno() -> u64 {
    NEXT_CREATION_SEQNO.fetch_add(1, Ordering::Relaxed)
}

/// Local 32-bit bundle identifier, also the persistent store key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId(pub u32);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out monotonically increasing bundle ids
#[derive(Debug, Default)]
pub struct BundleIdAllocator {
    next: AtomicU32,
}

impl BundleIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating after the highest id already in use
    pub fn starting_after(last: BundleId) -> Self {
        Self {
            next: AtomicU32::new(last.0.wrapping_add(1)),
        }
    }

    pub fn next_id(&self) -> BundleId {
        BundleId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Globally unique identity of a bundle, independent of the local id
///
/// Two copies of the same bundle received over different links share a
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleFingerprint {
    pub source: EndpointId,
    pub creation_millis: i64,
    pub creation_seqno: u64,
}

impl fmt::Display for BundleFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{}",
            self.source, self.creation_millis, self.creation_seqno
        )
    }
}

/// A bundle as seen by the forwarding control plane
pub struct Bundle {
    id: BundleId,
    source: EndpointId,
    dest: EndpointId,
    prevhop: EndpointId,
    creation_time: DateTime<Utc>,
    creation_seqno: u64,
    lifetime: Duration,
    payload: Bytes,
    custody_requested: bool,
    local_custody: AtomicBool,
    fwdlog: Mutex<ForwardingLog>,
}

impl Bundle {
    /// Create a bundle with a one hour lifetime and an empty payload
    ///
    /// Each bundle gets a fresh creation sequence number, so bundles from one
    /// source created within the same millisecond keep distinct fingerprints.
    pub fn new(id: BundleId, source: EndpointId, dest: EndpointId) -> Self {
        Self {
            id,
            source,
            dest,
            prevhop: EndpointId::null(),
            creation_time: Utc::now(),
            creation_seqno: next_creation_seqno(),
            lifetime: Duration::hours(1),
            payload: Bytes::new(),
            custody_requested: false,
            local_custody: AtomicBool::new(false),
            fwdlog: Mutex::new(ForwardingLog::new()),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_creation(mut self, time: DateTime<Utc>, seqno: u64) -> Self {
        self.creation_time = time;
        self.creation_seqno = seqno;
        self
    }

    /// Change the creation time, keeping the sequence number
    pub fn with_creation_time(mut self, time: DateTime<Utc>) -> Self {
        self.creation_time = time;
        self
    }

    pub fn with_prevhop(mut self, prevhop: EndpointId) -> Self {
        self.prevhop = prevhop;
        self
    }

    pub fn with_custody_requested(mut self, requested: bool) -> Self {
        self.custody_requested = requested;
        self
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> BundleRef {
        Arc::new(self)
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn source(&self) -> &EndpointId {
        &self.source
    }

    pub fn dest(&self) -> &EndpointId {
        &self.dest
    }

    /// The endpoint this bundle was received from
    pub fn prevhop(&self) -> &EndpointId {
        &self.prevhop
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn creation_seqno(&self) -> u64 {
        self.creation_seqno
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn custody_requested(&self) -> bool {
        self.custody_requested
    }

    pub fn local_custody(&self) -> bool {
        self.local_custody.load(Ordering::Acquire)
    }

    pub fn set_local_custody(&self, custody: bool) {
        self.local_custody.store(custody, Ordering::Release);
    }

    pub fn fingerprint(&self) -> BundleFingerprint {
        BundleFingerprint {
            source: self.source.clone(),
            creation_millis: self.creation_time.timestamp_millis(),
            creation_seqno: self.creation_seqno,
        }
    }

    /// `None` when the lifetime reaches past the representable range
    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time.checked_add_signed(self.lifetime)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time().is_some_and(|expires| now >= expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before expiration, zero if already expired
    ///
    /// `None` for a bundle that never expires.
    pub fn time_to_expiration(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let expires = self.expiration_time()?;
        let left = expires.signed_duration_since(now);
        Some(left.to_std().unwrap_or(std::time::Duration::ZERO))
    }

    /// Lock the forwarding log
    ///
    /// Do not hold the guard across calls that may lock it again.
    pub fn fwdlog(&self) -> MutexGuard<'_, ForwardingLog> {
        self.fwdlog.lock()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bundle id {} [{} -> {}]", self.id, self.source, self.dest)
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("creation_time", &self.creation_time)
            .field("lifetime", &self.lifetime)
            .field("payload_len", &self.payload.len())
            .field("custody_requested", &self.custody_requested)
            .finish()
    }
}

/// A named, locked list of bundle handles
///
/// Used for the pending list and for per-link delayed-send queues. Listing
/// code takes a snapshot or holds the scoped lock.
pub struct BundleList {
    name: String,
    bundles: Mutex<VecDeque<BundleRef>>,
}

impl BundleList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundles: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_back(&self, bundle: BundleRef) {
        self.bundles.lock().push_back(bundle);
    }

    pub fn push_front(&self, bundle: BundleRef) {
        self.bundles.lock().push_front(bundle);
    }

    pub fn pop_front(&self) -> Option<BundleRef> {
        self.bundles.lock().pop_front()
    }

    pub fn contains(&self, bundle: &Bundle) -> bool {
        self.bundles.lock().iter().any(|b| b.id() == bundle.id())
    }

    pub fn find(&self, id: BundleId) -> Option<BundleRef> {
        self.bundles.lock().iter().find(|b| b.id() == id).cloned()
    }

    /// Remove the bundle, returning whether it was present
    pub fn erase(&self, bundle: &Bundle) -> bool {
        let mut bundles = self.bundles.lock();
        match bundles.iter().position(|b| b.id() == bundle.id()) {
            Some(pos) => {
                bundles.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.bundles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.lock().is_empty()
    }

    pub fn clear(&self) {
        self.bundles.lock().clear();
    }

    /// Copy of the current contents, in order
    pub fn snapshot(&self) -> Vec<BundleRef> {
        self.bundles.lock().iter().cloned().collect()
    }

    /// Scoped lock for iteration
    pub fn lock(&self) -> MutexGuard<'_, VecDeque<BundleRef>> {
        self.bundles.lock()
    }
}

impl fmt::Debug for BundleList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleList")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
