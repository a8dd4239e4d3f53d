//! Callback chains invoked at parser checkpoints.

use std::fmt;
use std::sync::Arc;

use crate::connection::LogMessage;
use crate::parser::Halt;
use crate::transaction::Transaction;

/// Outcome of one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// Run the next callback.
    Continue,
    /// Stop processing this direction. The stream status becomes [`StreamState::Stop`][crate::StreamState::Stop].
    Stop,
    /// Fatal for this direction.
    Error,
}

impl HookResult {
    pub(crate) fn into_result(self, name: &'static str) -> Result<(), Halt> {
        match self {
            HookResult::Continue => Ok(()),
            HookResult::Stop => {
                debug!("{} hook requested stop", name);
                Err(Halt::Stop)
            }
            HookResult::Error => Err(Halt::Fatal(crate::Error::HookFailed(name))),
        }
    }
}

/// The transaction level hook points, in the order they normally fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxHook {
    RequestStart,
    RequestLine,
    RequestHeaders,
    RequestTrailer,
    RequestComplete,
    ResponseStart,
    ResponseLine,
    ResponseHeaders,
    ResponseTrailer,
    ResponseComplete,
    TransactionComplete,
}

impl TxHook {
    pub fn name(&self) -> &'static str {
        match self {
            TxHook::RequestStart => "request_start",
            TxHook::RequestLine => "request_line",
            TxHook::RequestHeaders => "request_headers",
            TxHook::RequestTrailer => "request_trailer",
            TxHook::RequestComplete => "request_complete",
            TxHook::ResponseStart => "response_start",
            TxHook::ResponseLine => "response_line",
            TxHook::ResponseHeaders => "response_headers",
            TxHook::ResponseTrailer => "response_trailer",
            TxHook::ResponseComplete => "response_complete",
            TxHook::TransactionComplete => "transaction_complete",
        }
    }
}

/// Callback receiving the transaction.
pub type TxCallback = dyn Fn(&mut Transaction) -> HookResult + Send + Sync;

/// Callback receiving the transaction and a body chunk. `None` flushes at the end of the body.
pub type DataCallback = dyn Fn(&mut Transaction, Option<&[u8]>) -> HookResult + Send + Sync;

/// Callback receiving each recorded log message.
pub type LogCallback = dyn Fn(&LogMessage) -> HookResult + Send + Sync;

/// An ordered chain of callbacks.
pub struct Hook<F: ?Sized> {
    callbacks: Vec<Arc<F>>,
}

impl<F: ?Sized> Hook<F> {
    pub(crate) fn register(&mut self, callback: Arc<F>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Cheap copy of the chain, so it can run while the owner is mutably borrowed.
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.callbacks.clone()
    }
}

impl Hook<TxCallback> {
    /// Run every callback until one does not return [`HookResult::Continue`].
    pub fn run_all(&self, tx: &mut Transaction) -> HookResult {
        for cb in &self.callbacks {
            let r = cb(tx);
            if r != HookResult::Continue {
                return r;
            }
        }
        HookResult::Continue
    }
}

impl Hook<DataCallback> {
    pub fn run_all(&self, tx: &mut Transaction, data: Option<&[u8]>) -> HookResult {
        run_data(&self.callbacks, tx, data)
    }
}

impl Hook<LogCallback> {
    pub fn run_all(&self, message: &LogMessage) -> HookResult {
        for cb in &self.callbacks {
            let r = cb(message);
            if r != HookResult::Continue {
                return r;
            }
        }
        HookResult::Continue
    }
}

pub(crate) fn run_data(
    callbacks: &[Arc<DataCallback>],
    tx: &mut Transaction,
    data: Option<&[u8]>,
) -> HookResult {
    for cb in callbacks {
        let r = cb(tx, data);
        if r != HookResult::Continue {
            return r;
        }
    }
    HookResult::Continue
}

impl<F: ?Sized> Default for Hook<F> {
    fn default() -> Self {
        Hook {
            callbacks: Vec::new(),
        }
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Hook {
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({})", self.callbacks.len())
    }
}
