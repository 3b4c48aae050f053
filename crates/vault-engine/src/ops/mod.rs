//! High-level device operations, each expressed as a job builder.

pub(crate) mod credentials;
pub(crate) mod data;
pub(crate) mod misc;
pub(crate) mod mmm;

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use vault_common::VaultResult;

/// A credential as returned by a successful get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The service that matched (the fallback when it was used).
    pub service: String,
    /// The login.
    pub login: String,
    /// The password as typed out by the device.
    pub password: String,
    /// The description, empty when the device has none.
    pub description: String,
}

/// Host completion callback.
pub type Completion<T> = Box<dyn FnOnce(VaultResult<T>)>;

/// Shares a one-shot completion between a job's finished and failed
/// paths; exactly one of them runs.
pub(crate) type SharedCompletion<T> = Rc<RefCell<Option<Completion<T>>>>;

pub(crate) fn shared<T>(cb: Completion<T>) -> SharedCompletion<T> {
    Rc::new(RefCell::new(Some(cb)))
}

pub(crate) fn fire<T>(slot: &SharedCompletion<T>, result: VaultResult<T>) {
    if let Some(cb) = slot.borrow_mut().take() {
        cb(result);
    }
}

/// Appends a zero terminator to a context string for the wire.
pub(crate) fn context_bytes(service: &str) -> Vec<u8> {
    let mut bytes = service.as_bytes().to_vec();
    bytes.push(0);
    bytes
}
