//! Signal monitor

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "unix.rs"]
        mod imp;
    } else {
        #[path = "other.rs"]
        mod imp;
    }
}

pub use self::imp::create_signal_monitor;
