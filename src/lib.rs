//! # Build support for the CYD Meshtastic firmware
//!
//! Utilities around the PlatformIO build of an ESP32 "Cheap Yellow Display"
//! firmware that vendors the Meshtastic-arduino library and an LVGL user interface:
//!
//! - [`configs`]: copy the customized `lv_conf.h` and `User_Setup.h` into the
//!   library dependency folders before a build;
//! - [`dropdown`]: fix the extra argument EEZ Studio generates for
//!   `lv_dropdown_set_selected`;
//! - [`patches`]: re-apply bug fixes to the vendored Meshtastic sources;
//! - [`upstream`] and [`verify`]: refresh the vendored library and check its layout;
//! - [`esptool`] and [`image`]: merge the build outputs into one factory image.
//!
//! Modules with third-party dependencies are gated behind features.

// Allows docs.rs to document any needed features for items (needs nightly rust).
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(feature = "pio")]
pub mod pio;

#[cfg(feature = "glob")]
pub mod upstream;

#[cfg(feature = "glob")]
pub mod verify;

pub mod cmd;
pub mod configs;
pub mod dropdown;
pub mod esptool;
pub mod fs;
pub mod hooks;
pub mod image;
pub mod patches;
pub mod project;
pub mod python;
pub mod utils;
