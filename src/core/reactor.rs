//! Purpose: Provide the single-threaded event loop connections are bound to.
//! Exports: `Reactor`, `ReactorHandle`.
//! Role: Owns a current-thread tokio runtime plus a `LocalSet`; all completions run here.
//! Invariants: Tasks spawned through a handle only make progress inside `Reactor::block_on`.
//! Invariants: Handles are `!Send`; everything bound to a reactor stays on its thread.
//! Notes: Callbacks must not call `block_on` re-entrantly (tokio forbids nested runtimes).

use std::future::Future;
use std::rc::Rc;

use tokio::runtime::{Builder, Runtime};
use tokio::task::{JoinHandle, LocalSet};

use crate::core::error::{Error, ErrorKind};

// Field order matters: local tasks drop before the runtime that drives their I/O.
pub struct Reactor {
    local: Rc<LocalSet>,
    runtime: Runtime,
}

#[derive(Clone)]
pub struct ReactorHandle {
    local: Rc<LocalSet>,
}

impl Reactor {
    pub fn new() -> Result<Self, Error> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to build reactor runtime")
                    .with_source(err)
            })?;
        Ok(Self {
            local: Rc::new(LocalSet::new()),
            runtime,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            local: Rc::clone(&self.local),
        }
    }

    /// Drives every spawned task until `future` resolves.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(self.local.run_until(future))
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }
}

impl ReactorHandle {
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }
}
