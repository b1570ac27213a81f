//! Logging. See the ["log" crate documentation](https://docs.rs/log/) for
//! details.
//!
//! The runtime never picks a logger implementation for you: it only calls
//! through the `log` facade (`log::debug!`, `log::warn!`, …), same as the
//! teacher's `log.rs` called through to Tarantool's `say()`. Binaries and
//! tests install a logger once at startup with [`init`].
//!
//! Example:
//! ```rust
//! fibra::log::init();
//! log::info!("reactor started");
//! ```
use std::sync::Once;

static INIT: Once = Once::new();

/// Install `env_logger` as the global logger, honouring `RUST_LOG`.
/// Idempotent: safe to call from every binary entry point and every test.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger_init();
    });
}

#[cfg(not(test))]
fn env_logger_init() {
    // `env_logger` is a dev-dependency; binaries that want logging at
    // runtime should add it to `[dependencies]` and call `init()`, the
    // way the demos under `demos/` do.
}

#[cfg(test)]
fn env_logger_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}
