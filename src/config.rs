//! Parser configuration.
//!
//! A [`Config`] is normally built once and shared between many parsers behind an `Arc`. A parser
//! that needs different settings materializes a private copy on first mutation, see
//! [`ConnectionParser::config_mut`][crate::ConnectionParser::config_mut].

use std::ops::Deref;
use std::sync::Arc;

use crate::connection::LogMessage;
use crate::hook::{DataCallback, Hook, HookResult, LogCallback, TxCallback, TxHook};
use crate::transaction::Transaction;
use crate::Direction;

/// Default hard limit for a single request, status or header line.
pub const DEFAULT_FIELD_LIMIT_HARD: usize = 18000;

/// Default soft limit, above which a line is flagged as long.
pub const DEFAULT_FIELD_LIMIT_SOFT: usize = 9000;

/// Server behavior to emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Personality {
    Minimal,
    Generic,
    Ids,
    Apache2,
    Iis5_1,
    Iis6_0,
    Iis7_0,
    Iis7_5,
}

/// Severity of a recorded message. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    pub(crate) fn as_log(&self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Notice | LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Configuration for a [`ConnectionParser`][crate::ConnectionParser].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) field_limit_hard: usize,
    pub(crate) field_limit_soft: usize,
    pub(crate) log_level: LogLevel,
    pub(crate) personality: Personality,
    pub(crate) response_decompression_enabled: bool,
    pub(crate) tx_auto_destroy: bool,

    // Personality quirks.
    pub(crate) nul_terminates_request_line: bool,
    pub(crate) whitespace_line_terminates_headers: bool,
    pub(crate) leading_whitespace_in_method: bool,

    pub(crate) hook_request_start: Hook<TxCallback>,
    pub(crate) hook_request_line: Hook<TxCallback>,
    pub(crate) hook_request_headers: Hook<TxCallback>,
    pub(crate) hook_request_body_data: Hook<DataCallback>,
    pub(crate) hook_request_trailer: Hook<TxCallback>,
    pub(crate) hook_request_complete: Hook<TxCallback>,
    pub(crate) hook_response_start: Hook<TxCallback>,
    pub(crate) hook_response_line: Hook<TxCallback>,
    pub(crate) hook_response_headers: Hook<TxCallback>,
    pub(crate) hook_response_body_data: Hook<DataCallback>,
    pub(crate) hook_response_trailer: Hook<TxCallback>,
    pub(crate) hook_response_complete: Hook<TxCallback>,
    pub(crate) hook_transaction_complete: Hook<TxCallback>,
    pub(crate) hook_log: Hook<LogCallback>,
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Config {
            field_limit_hard: DEFAULT_FIELD_LIMIT_HARD,
            field_limit_soft: DEFAULT_FIELD_LIMIT_SOFT,
            log_level: LogLevel::Notice,
            personality: Personality::Minimal,
            response_decompression_enabled: true,
            tx_auto_destroy: false,
            nul_terminates_request_line: false,
            whitespace_line_terminates_headers: false,
            leading_whitespace_in_method: false,
            hook_request_start: Hook::default(),
            hook_request_line: Hook::default(),
            hook_request_headers: Hook::default(),
            hook_request_body_data: Hook::default(),
            hook_request_trailer: Hook::default(),
            hook_request_complete: Hook::default(),
            hook_response_start: Hook::default(),
            hook_response_line: Hook::default(),
            hook_response_headers: Hook::default(),
            hook_response_body_data: Hook::default(),
            hook_response_trailer: Hook::default(),
            hook_response_complete: Hook::default(),
            hook_transaction_complete: Hook::default(),
            hook_log: Hook::default(),
        };
        config.set_server_personality(Personality::Minimal);
        config
    }
}

impl Config {
    /// Set the soft and hard line limits.
    ///
    /// A line longer than `hard` is a fatal [`Error::LineTooLong`][crate::Error::LineTooLong].
    /// A line longer than `soft` is kept but flagged with `FIELD_LONG`.
    pub fn with_field_limits(mut self, soft: usize, hard: usize) -> Self {
        self.field_limit_soft = soft;
        self.field_limit_hard = hard;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.set_server_personality(personality);
        self
    }

    pub fn with_response_decompression(mut self, enabled: bool) -> Self {
        self.response_decompression_enabled = enabled;
        self
    }

    /// Destroy transactions as soon as both halves complete.
    pub fn with_tx_auto_destroy(mut self, enabled: bool) -> Self {
        self.tx_auto_destroy = enabled;
        self
    }

    /// Select a personality and apply its quirks.
    pub fn set_server_personality(&mut self, personality: Personality) {
        self.personality = personality;
        self.nul_terminates_request_line = personality == Personality::Apache2;
        self.leading_whitespace_in_method = personality == Personality::Apache2;
        self.whitespace_line_terminates_headers = personality == Personality::Iis5_1;
    }

    pub fn set_field_limits(&mut self, soft: usize, hard: usize) {
        self.field_limit_soft = soft;
        self.field_limit_hard = hard;
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    pub fn set_response_decompression(&mut self, enabled: bool) {
        self.response_decompression_enabled = enabled;
    }

    pub fn set_tx_auto_destroy(&mut self, enabled: bool) {
        self.tx_auto_destroy = enabled;
    }

    pub fn field_limit_hard(&self) -> usize {
        self.field_limit_hard
    }

    pub fn field_limit_soft(&self) -> usize {
        self.field_limit_soft
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    pub fn response_decompression_enabled(&self) -> bool {
        self.response_decompression_enabled
    }

    pub fn tx_auto_destroy(&self) -> bool {
        self.tx_auto_destroy
    }
}

macro_rules! register_tx_hook {
    ($($(#[$meta:meta])* $fn_name:ident => $field:ident;)*) => {
        impl Config {
            $(
                $(#[$meta])*
                pub fn $fn_name<F>(&mut self, f: F)
                where
                    F: Fn(&mut Transaction) -> HookResult + Send + Sync + 'static,
                {
                    self.$field.register(Arc::new(f));
                }
            )*
        }
    };
}

register_tx_hook! {
    /// Called when the first byte of a new request arrives.
    register_request_start => hook_request_start;
    /// Called after the request line is parsed.
    register_request_line => hook_request_line;
    /// Called after the request headers are parsed and the body length is resolved.
    register_request_headers => hook_request_headers;
    register_request_trailer => hook_request_trailer;
    register_request_complete => hook_request_complete;
    /// Called when the first byte of a new response arrives.
    register_response_start => hook_response_start;
    register_response_line => hook_response_line;
    /// Called after the response headers are parsed, before a decompressor is chosen.
    register_response_headers => hook_response_headers;
    register_response_trailer => hook_response_trailer;
    register_response_complete => hook_response_complete;
    /// Called once both halves of a transaction are complete.
    register_transaction_complete => hook_transaction_complete;
}

impl Config {
    /// Request body callback, run after any per-transaction callbacks.
    ///
    /// Receives de-chunked data, and `None` once the body ends.
    pub fn register_request_body_data<F>(&mut self, f: F)
    where
        F: Fn(&mut Transaction, Option<&[u8]>) -> HookResult + Send + Sync + 'static,
    {
        self.hook_request_body_data.register(Arc::new(f));
    }

    /// Response body callback, run after any per-transaction callbacks.
    ///
    /// Receives de-chunked and decompressed data, and `None` once the body ends.
    pub fn register_response_body_data<F>(&mut self, f: F)
    where
        F: Fn(&mut Transaction, Option<&[u8]>) -> HookResult + Send + Sync + 'static,
    {
        self.hook_response_body_data.register(Arc::new(f));
    }

    pub fn register_log<F>(&mut self, f: F)
    where
        F: Fn(&LogMessage) -> HookResult + Send + Sync + 'static,
    {
        self.hook_log.register(Arc::new(f));
    }
}

impl Config {
    pub(crate) fn tx_hook(&self, hook: TxHook) -> &Hook<TxCallback> {
        match hook {
            TxHook::RequestStart => &self.hook_request_start,
            TxHook::RequestLine => &self.hook_request_line,
            TxHook::RequestHeaders => &self.hook_request_headers,
            TxHook::RequestTrailer => &self.hook_request_trailer,
            TxHook::RequestComplete => &self.hook_request_complete,
            TxHook::ResponseStart => &self.hook_response_start,
            TxHook::ResponseLine => &self.hook_response_line,
            TxHook::ResponseHeaders => &self.hook_response_headers,
            TxHook::ResponseTrailer => &self.hook_response_trailer,
            TxHook::ResponseComplete => &self.hook_response_complete,
            TxHook::TransactionComplete => &self.hook_transaction_complete,
        }
    }

    pub(crate) fn body_data_hook(&self, direction: Direction) -> &Hook<DataCallback> {
        match direction {
            Direction::Request => &self.hook_request_body_data,
            Direction::Response => &self.hook_response_body_data,
        }
    }
}

/// Shared configuration, copied on first mutation.
#[derive(Debug)]
pub(crate) struct ConfigRef(Arc<Config>);

impl ConfigRef {
    pub fn new(config: Arc<Config>) -> Self {
        ConfigRef(config)
    }

    pub fn to_mut(&mut self) -> &mut Config {
        if !self.is_private() {
            debug!("Copy shared config");
        }
        Arc::make_mut(&mut self.0)
    }

    /// True when no other parser or caller holds this configuration.
    pub fn is_private(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }
}

impl Deref for ConfigRef {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.0
    }
}
