//! Device lifecycle (C6): the process-wide device registry, the
//! `REGISTER`/`UNREGISTER`/`CONFIG_THREAD` control surface built on top of
//! it, and the `nexusd` CLI that drives both.
//!
//! Everything below this crate (`nexus-transform`, `nexus-cache`,
//! `nexus-protocol`, `nexus-engine`) is usable as a library with no
//! process-wide state; this crate is where Nexus picks one concrete
//! agent-channel transport and one concrete "devnum -> device" map and
//! commits to them for a running process.

pub mod args;
pub mod commands;
pub mod control;
pub mod error;
pub mod registry;

pub use control::{ControlChannel, IntrospectSnapshot, RegisterRequest, RegisterResponse, INTERFACE_VERSION, NEXUS_BLOCK_MAJOR};
pub use error::DeviceError;
pub use registry::{DeviceRegistry, RegisteredDevice, DEVICE_REGISTRY};
