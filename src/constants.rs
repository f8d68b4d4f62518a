//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Config file location (under the XDG config dir)
pub mod config {
    /// Directory name under the config and data dirs
    pub const APP_DIR: &str = "ocr-autotyper";

    /// Settings file name
    pub const FILENAME: &str = "config.json";
}

/// Keys used in the key-value persistence layer
pub mod storage {
    /// Ordered rule list
    pub const RULES_KEY: &str = "rules";

    /// Character → coordinate map
    pub const COORDINATES_KEY: &str = "coordinates";

    /// Extension of per-key files written by the file store
    pub const FILE_EXTENSION: &str = "json";
}

/// IPC socket location
pub mod ipc {
    /// Socket path relative to XDG_RUNTIME_DIR (or the cache dir fallback)
    pub const SOCKET_NAME: &str = "ocr-autotyper/engine.sock";

    /// Maximum message size (1 MB)
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    /// Capacity of the daemon's command queue
    pub const COMMAND_QUEUE: usize = 32;
}

/// Daemon process lifecycle
pub mod daemon {
    /// How long exit waits for in-flight input dispatch before abandoning it
    pub const SHUTDOWN_GRACE_MS: u64 = 2000;
}

/// Trigger matching
pub mod matching {
    /// Separator between triggers in a match identifier
    pub const IDENTIFIER_SEPARATOR: &str = ",";
}

/// Default engine timing values
pub mod defaults {
    pub const FRAME_INTERVAL_MS: u64 = 250;
    pub const MIN_CYCLE_INTERVAL_MS: u64 = 750;
    pub const RECOGNITION_TIMEOUT_MS: u64 = 5000;
    pub const EMPTY_RESET_THRESHOLD: u32 = 3;
    pub const INTER_CHARACTER_DELAY_MS: u64 = 150;
    pub const TAP_DURATION_MS: u64 = 50;

    /// Screenshot of the root window piped through tesseract
    pub const RECOGNIZER_COMMAND: &str =
        "import -silent -window root png:- | tesseract stdin stdout 2>/dev/null";

    pub const LOG_LEVEL: &str = "info";
}

/// Bounds applied by settings validation
pub mod validation {
    pub const MIN_FRAME_INTERVAL_MS: u64 = 10;
    pub const MAX_FRAME_INTERVAL_MS: u64 = 60_000;

    pub const MIN_CYCLE_INTERVAL_MS: u64 = 10;
    pub const MAX_CYCLE_INTERVAL_MS: u64 = 60_000;

    pub const MIN_RECOGNITION_TIMEOUT_MS: u64 = 100;
    pub const MAX_RECOGNITION_TIMEOUT_MS: u64 = 120_000;

    pub const MIN_EMPTY_THRESHOLD: u32 = 1;
    pub const MAX_EMPTY_THRESHOLD: u32 = 100;

    /// Taps of one plan must land at distinct offsets
    pub const MIN_CHARACTER_DELAY_MS: u64 = 1;
    pub const MAX_CHARACTER_DELAY_MS: u64 = 10_000;

    pub const MIN_TAP_DURATION_MS: u64 = 1;
    pub const MAX_TAP_DURATION_MS: u64 = 1_000;
}

/// Activity log
pub mod activity {
    /// Number of recent entries kept in memory
    pub const CAPACITY: usize = 20;
}

/// X11 input constants
pub mod x11 {
    /// Left mouse button number
    pub const BUTTON_LEFT: u8 = 1;

    /// XTEST device id for the core pointer
    pub const CORE_DEVICE: u8 = 0;
}

/// ydotool text injection
pub mod ydotool {
    pub const BINARY: &str = "ydotool";

    /// Socket file name under XDG_RUNTIME_DIR
    pub const SOCKET_NAME: &str = ".ydotool_socket";

    pub const SOCKET_ENV: &str = "YDOTOOL_SOCKET";
}
