//! Configuration management for ocr-autotyper
//!
//! One JSON settings file holds engine timing, the recognizer command and
//! input options. Rules and coordinates are data, not configuration, and live
//! in the persistence layer.

pub mod settings;

pub use settings::{EngineSettings, FireMode, InputSettings, RecognizerSettings, Settings};
