pub mod catalog;
pub mod installer;
pub mod scanner;

pub use catalog::{InstallerKind, ToolCatalog, ToolEntry, UrlResolver};
pub use installer::ToolInstaller;
