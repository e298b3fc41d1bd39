pub mod archive;
pub mod cleanup;
pub mod error;
pub mod inspect;
pub mod install;
pub mod interpreter;
pub mod metadata;
pub mod namespace;
pub mod runtime;
pub mod sanitize;

pub use error::{InstallError, InstallStep};
pub use install::{InstallRequest, Installer};
pub use metadata::MetadataSummary;
