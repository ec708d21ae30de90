//! Blocking facade over [`Session`].
//!
//! There is one transport and one authorization state; [`BlockingSession`] only supplies a
//! runtime to drive it. Do not call these methods from inside an async context.

use crate::codec::Payload;
use crate::error::MarqueeError;
use crate::rest::request::Request;
use crate::rest::response::Response;
use crate::rest::session::{Session, scope};

use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

pub struct BlockingSession {
    session: Session,
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl std::fmt::Debug for BlockingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSession")
            .field("session", &self.session)
            .finish()
    }
}

impl BlockingSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            runtime: Mutex::new(None),
        }
    }

    /// The async session this facade drives. Clones share its transport.
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn runtime_slot(&self) -> MutexGuard<'_, Option<Arc<Runtime>>> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn runtime(&self) -> Result<Arc<Runtime>, MarqueeError> {
        let mut slot = self.runtime_slot();
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        // A worker thread keeps pooled connections serviced between calls.
        let runtime = Arc::new(
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("marquee-blocking")
                .enable_all()
                .build()?,
        );
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Drive `fut` to completion with this session as the ambient one.
    pub fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, MarqueeError> {
        let runtime = self.runtime()?;
        Ok(runtime.block_on(scope(self.session.clone(), fut)))
    }

    pub fn init(&self) -> Result<(), MarqueeError> {
        self.block_on(self.session.init())?
    }

    pub fn execute(&self, request: Request) -> Result<Response, MarqueeError> {
        self.block_on(self.session.execute(request))?
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.block_on(self.session.get(path, payload))?
    }

    pub fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.block_on(self.session.post(path, payload))?
    }

    pub fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.block_on(self.session.put(path, payload))?
    }

    pub fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: impl Into<Payload>,
    ) -> Result<T, MarqueeError> {
        self.block_on(self.session.delete(path, payload))?
    }

    /// Close the session transport and shut the runtime down.
    pub fn close(&self) {
        self.session.close();
        if let Some(runtime) = self.runtime_slot().take()
            && let Ok(runtime) = Arc::try_unwrap(runtime)
        {
            runtime.shutdown_background();
            debug!("blocking runtime shut down");
        }
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        self.close();
    }
}
