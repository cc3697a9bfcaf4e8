//! ota-state - Power-loss safe update-state store for OTA device clients
//! Library behind the `ota-state` CLI

pub mod engine;
