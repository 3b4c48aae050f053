//! Shared helpers for the end-to-end tests driving [`VaultEngine`] over
//! the emulated device.

#![warn(clippy::all)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use vault_emul::EmulDevice;
use vault_engine::VaultEngine;

/// Installs the test log subscriber once; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds an engine over a fresh emulated device and brings it to the
/// unlocked steady state: one status poll, parameter reload, date set,
/// change numbers (and serial, for minis).
pub fn unlocked_engine(flash_mb: u8, hw_version: &str) -> VaultEngine<EmulDevice> {
    init_tracing();
    let device = EmulDevice::new(flash_mb, hw_version);
    let mut engine = VaultEngine::new(device);
    engine.tick(Instant::now());
    engine.pump();
    assert!(!engine.is_busy(), "setup jobs should have drained");
    engine
}

/// A one-shot result slot shared with a completion callback.
pub type ResultSlot<T> = Rc<RefCell<Option<T>>>;

/// Creates an empty result slot.
pub fn result_slot<T>() -> ResultSlot<T> {
    Rc::new(RefCell::new(None))
}

/// Builds a callback storing its argument into the slot.
pub fn capture<T: 'static>(slot: &ResultSlot<T>) -> impl FnOnce(T) + 'static {
    let slot = slot.clone();
    move |value| *slot.borrow_mut() = Some(value)
}

/// Takes the captured value, panicking when the callback never fired.
pub fn taken<T>(slot: &ResultSlot<T>) -> T {
    slot.borrow_mut().take().expect("completion never fired")
}
