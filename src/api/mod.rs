//! Endpoint handles over a [`Session`](crate::Session).
//!
//! Each handle holds a session clone; `current()` builds one from the ambient session.

mod content;
mod data;
mod security_master;

pub use content::ContentApi;
pub use data::DataApi;
pub use security_master::SecurityMasterApi;
