//! Configuration management for the scene panel
//!
//! - **panel**: PanelConfig read from JSON under the platform config dir

pub mod panel;

pub use panel::PanelConfig;
