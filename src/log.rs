use crate::service::config::LogConfig;
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Mute all service logs (for example, while a front end renders a full screen ui).
pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

/// Switch service logs on or off according to configuration.
pub fn apply(config: &LogConfig) {
    if config.enabled {
        enable()
    } else {
        disable()
    }
}

/// Install an `env_logger` configured from `RUST_LOG`.
/// Repeated calls are ignored, so tests may call it freely.
pub fn init() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .is_test(cfg!(test))
        .try_init();
}

#[macro_export]
macro_rules! mi_info {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mi_warn {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::warn!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::warn!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mi_error {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::error!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::error!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mi_debug {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::debug!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::debug!($($arg)+)
        }
    };
}
