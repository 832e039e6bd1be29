//! Lifecycle orchestration for emulated Android devices.
//!
//! A device is started by staging its images, launching a detached watchdog
//! that supervises the emulator and its relays, and polling the guest until
//! it is usable. Everything that talks to the guest goes through
//! [`CommandChannel`], so the readiness logic can be exercised without an
//! emulator.

pub mod archive;
pub mod attempter;
pub mod boot;
pub mod command;
pub mod console;
pub mod error;
pub mod idle;
pub mod install;
pub mod lifecycle;
pub mod metadata;
pub mod paths;
pub mod policy;
pub mod predicates;
pub mod shutdown;
pub mod stage;
pub mod stopwatch;
pub mod supervisor;

#[cfg(test)]
mod testing;

/// On-device services that forward the transport over unix sockets.
pub const RELAY_SERVICES: [&str; 2] = ["pipe_traverse", "tn_pipe_traverse"];

/// Services left alone when stopping the guest before shutdown.
pub const SHUTDOWN_PROTECTED_SERVICES: [&str; 2] = ["pipe_traverse", "adbd"];

/// Process name of the on-device relay binary.
pub const RELAY_PROCESS: &str = "pipe_traversal";

pub use attempter::Attempter;
pub use boot::{BootConfig, BootReport, BootStage, ReadinessFlags, wait_for_boot};
pub use command::{AdbChannel, AdbConfig, CommandChannel, CommandError};
pub use console::{ConsoleClient, ConsoleCommands, ConsoleError};
pub use error::{DeviceError, Result};
pub use idle::IdleStatus;
pub use install::PackageInstaller;
pub use lifecycle::{
    DeviceConfig, DeviceController, DeviceHandle, DeviceIo, DisplaySpec, ExtraValue,
    LifecycleState,
};
pub use metadata::{BootMetadata, DeviceSpec, EmulatorVariant, NetProfile};
pub use paths::SessionPaths;
pub use policy::CompatPolicy;
pub use supervisor::{OsProcessHost, WatchdogPlan};
