//! Reverie host adapters: the pieces of the outside world the engine talks to

mod command;

pub mod agenda;
pub mod notify;
pub mod sensors;
pub mod vault;

pub use agenda::AgendaBriefing;
pub use notify::DesktopNotifier;
pub use sensors::SystemSensors;
pub use vault::{MarkdownVault, VaultMaintenance, VaultStats};
