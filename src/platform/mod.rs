//! External collaborators: recognition, tap dispatch and text injection
//!
//! The engine only sees the traits below. The Linux implementations drive an
//! X11 display through XTEST, inject text with ydotool and obtain text from a
//! configurable OCR shell pipeline.

mod focus;
mod recognizer;
mod x11_tap;
mod ydotool;

pub use focus::X11FocusProbe;
pub use recognizer::CommandRecognizer;
pub use x11_tap::X11TapDispatcher;
pub use ydotool::YdotoolInjector;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::coordinates::Point;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Input dispatch failed: {0}")]
    Failed(String),

    #[error("Input dispatch was cancelled")]
    Cancelled,
}

/// Produces the text currently visible on screen (capture + OCR in one step)
///
/// Dropping the returned future must abandon the work, so a timed-out
/// recognition leaves nothing running behind it.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self) -> anyhow::Result<String>;
}

/// Performs a single short press at a screen coordinate
pub trait TapDispatcher: Send + Sync {
    fn tap(&self, point: Point, duration: Duration) -> Result<(), DispatchError>;
}

/// Submits text directly to the focused input, when it accepts text
pub trait TextInjector: Send + Sync {
    fn can_inject_text(&self) -> bool;

    fn inject_text(&self, text: &str) -> Result<(), DispatchError>;
}

/// Injector for setups without a text target: always falls back to taps
#[derive(Debug, Default)]
pub struct NoTextInjection;

impl TextInjector for NoTextInjection {
    fn can_inject_text(&self) -> bool {
        false
    }

    fn inject_text(&self, _text: &str) -> Result<(), DispatchError> {
        Err(DispatchError::Failed("text injection is disabled".to_string()))
    }
}
