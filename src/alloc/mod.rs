//! Record allocation: physical records inside data pages, the free space they leave behind, and
//! the translation layer that gives every record a stable recid.

mod free_logical;
mod free_page;
mod free_physical;
mod location;
mod logical;
mod physical;
mod record_header;

pub(crate) use free_physical::FreePhysicalManager;
pub(crate) use location::Location;
pub(crate) use logical::LogicalRowManager;
pub(crate) use physical::PhysicalRowManager;
pub use record_header::MAX_RECORD_SIZE;
