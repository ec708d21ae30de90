pub mod blocking;
mod request;
mod response;
mod session;
pub mod types;

pub use blocking::BlockingSession;
pub use request::Request;
pub use response::{Response, Unpacked};
pub use session::{DEFAULT_TIMEOUT, Session, SessionBuilder, scope, sync_scope};
