//! Contacts: open sessions bound to one link

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::error;

use crate::error::ContactError;
use crate::link::{Link, LinkRef};

/// Shared handle to a contact
///
/// The contact is destroyed when the last handle drops.
pub type ContactRef = Arc<Contact>;

/// Estimates about the current contact window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactEstimates {
    /// Expected duration, if known
    pub duration: Option<Duration>,
    /// Bandwidth in bits per second, 0 if unknown
    pub bandwidth_bps: u64,
    pub latency: Duration,
}

/// An open session instance bound to a link
pub struct Contact {
    link: Weak<Link>,
    link_name: String,
    start_time: DateTime<Utc>,
    estimates: Mutex<ContactEstimates>,
    cl_info: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl Contact {
    pub(crate) fn new(link: &LinkRef) -> ContactRef {
        Arc::new(Self {
            link: Arc::downgrade(link),
            link_name: link.name().to_string(),
            start_time: Utc::now(),
            estimates: Mutex::new(ContactEstimates::default()),
            cl_info: Mutex::new(None),
        })
    }

    /// The owning link, if it is still alive
    pub fn link(&self) -> Option<LinkRef> {
        self.link.upgrade()
    }

    pub fn link_name(&self) -> &str {
        &self.link_name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn estimates(&self) -> ContactEstimates {
        self.estimates.lock().clone()
    }

    pub fn set_estimates(&self, estimates: ContactEstimates) {
        *self.estimates.lock() = estimates;
    }

    /// Attach convergence-layer session state
    ///
    /// Fails if state is already attached; the slot must be cleared between sets.
    pub fn set_cl_info(&self, info: Box<dyn Any + Send + Sync>) -> Result<(), ContactError> {
        let mut slot = self.cl_info.lock();
        if slot.is_some() {
            error!(link = %self.link_name, "convergence layer info set twice on contact");
            return Err(ContactError::ClInfoAlreadySet);
        }
        *slot = Some(info);
        Ok(())
    }

    /// Detach and return convergence-layer session state
    pub fn clear_cl_info(&self) -> Result<Box<dyn Any + Send + Sync>, ContactError> {
        self.cl_info.lock().take().ok_or_else(|| {
            error!(link = %self.link_name, "convergence layer info cleared twice on contact");
            ContactError::ClInfoAlreadyCleared
        })
    }

    pub fn has_cl_info(&self) -> bool {
        self.cl_info.lock().is_some()
    }

    /// Run `f` against the attached state if it has type `T`
    pub fn with_cl_info<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.cl_info.lock();
        slot.as_ref()
            .and_then(|info| (**info).downcast_ref::<T>())
            .map(f)
    }
}

impl Drop for Contact {
    fn drop(&mut self) {
        if self.cl_info.get_mut().is_some() {
            error!(link = %self.link_name, "contact dropped with convergence layer info still set");
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact {} (started {})", self.link_name, self.start_time)
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("link", &self.link_name)
            .field("start_time", &self.start_time)
            .field("has_cl_info", &self.has_cl_info())
            .finish()
    }
}
