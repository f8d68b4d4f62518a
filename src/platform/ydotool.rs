//! Direct text injection with ydotool
//!
//! ydotool types through uinput, so it reaches whatever has keyboard focus.
//! Injection is only offered when enabled in settings and, if window filters
//! are configured, when the focused window title matches one of them.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use super::{DispatchError, TextInjector, X11FocusProbe};
use crate::config::InputSettings;
use crate::constants::ydotool;

/// Socket used by ydotoold: `$YDOTOOL_SOCKET`, else the runtime dir
pub fn default_socket_path() -> PathBuf {
    if let Some(path) = env::var_os(ydotool::SOCKET_ENV) {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(env::temp_dir)
        .join(ydotool::SOCKET_NAME)
}

pub struct YdotoolInjector {
    enabled: bool,
    socket: PathBuf,
    windows: Vec<String>,
    focus: Option<X11FocusProbe>,
}

impl YdotoolInjector {
    pub fn new(settings: &InputSettings, focus: Option<X11FocusProbe>) -> Self {
        Self {
            enabled: settings.text_injection,
            socket: settings
                .ydotool_socket
                .clone()
                .unwrap_or_else(default_socket_path),
            windows: settings.injection_windows.clone(),
            focus,
        }
    }

    fn focused_window_accepts_text(&self) -> bool {
        if self.windows.is_empty() {
            return true;
        }
        let Some(focus) = &self.focus else {
            return false;
        };
        match focus.active_window_title() {
            Ok(Some(title)) => title_matches(&title, &self.windows),
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Could not read focused window, falling back to taps");
                false
            }
        }
    }
}

fn title_matches(title: &str, windows: &[String]) -> bool {
    windows.iter().any(|w| !w.is_empty() && title.contains(w.as_str()))
}

impl TextInjector for YdotoolInjector {
    fn can_inject_text(&self) -> bool {
        self.enabled && self.focused_window_accepts_text()
    }

    fn inject_text(&self, text: &str) -> Result<(), DispatchError> {
        debug!(chars = text.chars().count(), socket = %self.socket.display(), "Injecting text via ydotool");
        let output = Command::new(ydotool::BINARY)
            .args(["type", "--", text])
            .env(ydotool::SOCKET_ENV, &self.socket)
            .output()
            .map_err(|e| DispatchError::Failed(format!("Failed to run ydotool: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DispatchError::Failed(format!("ydotool failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, windows: &[&str]) -> InputSettings {
        InputSettings {
            text_injection: enabled,
            injection_windows: windows.iter().map(|w| w.to_string()).collect(),
            ydotool_socket: Some(PathBuf::from("/tmp/test.sock")),
            ..InputSettings::default()
        }
    }

    #[test]
    fn test_disabled_never_injects() {
        let injector = YdotoolInjector::new(&settings(false, &[]), None);
        assert!(!injector.can_inject_text());
    }

    #[test]
    fn test_enabled_without_filters_injects_anywhere() {
        let injector = YdotoolInjector::new(&settings(true, &[]), None);
        assert!(injector.can_inject_text());
    }

    #[test]
    fn test_filters_without_focus_probe_fall_back_to_taps() {
        let injector = YdotoolInjector::new(&settings(true, &["Terminal"]), None);
        assert!(!injector.can_inject_text());
    }

    #[test]
    fn test_title_matches_substring() {
        let windows = vec!["scrcpy".to_string(), String::new()];
        assert!(title_matches("Pixel 7 - scrcpy", &windows));
        assert!(!title_matches("Firefox", &windows));
    }

    #[test]
    fn test_configured_socket_used() {
        let injector = YdotoolInjector::new(&settings(true, &[]), None);
        assert_eq!(injector.socket, PathBuf::from("/tmp/test.sock"));
    }
}
