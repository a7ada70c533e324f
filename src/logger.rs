//! Leveled, structured logging collaborator.
//!
//! The retry executor and the client facade log through the [`Logger`] trait
//! so callers can route events wherever they like. [`TracingLogger`] is the
//! production implementation and forwards to `tracing`; [`NoopLogger`]
//! discards everything.
//!
//! # Examples
//!
//! ```rust
//! use docstore_retry::{Logger, TracingLogger};
//!
//! let logger = TracingLogger::new().with(&[("service", &"billing")]);
//! logger.warn("retrying error", &[("attempt", &1)]);
//! ```

use std::fmt::{self, Display, Write as _};

/// One structured key/value pair.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problem, such as a failure that will be retried.
    Warn,
    /// Unrecoverable problem.
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(name)
    }
}

/// A leveled logger carrying structured context.
///
/// Only [`log`](Self::log) and [`with`](Self::with) are required; the
/// per-level methods forward to `log`.
pub trait Logger: Send + Sync {
    /// Emit `msg` at `level` with `fields`.
    fn log(&self, level: Level, msg: &str, fields: &[Field<'_>]);

    /// A derived logger that adds `fields` to every event it emits.
    fn with(&self, fields: &[Field<'_>]) -> Box<dyn Logger>;

    /// Emit at debug level.
    fn debug(&self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::Debug, msg, fields);
    }

    /// Emit at info level.
    fn info(&self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::Info, msg, fields);
    }

    /// Emit at warn level.
    fn warn(&self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::Warn, msg, fields);
    }

    /// Emit at error level.
    fn error(&self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::Error, msg, fields);
    }
}

impl<L: Logger + ?Sized> Logger for &L {
    fn log(&self, level: Level, msg: &str, fields: &[Field<'_>]) {
        (**self).log(level, msg, fields);
    }

    fn with(&self, fields: &[Field<'_>]) -> Box<dyn Logger> {
        (**self).with(fields)
    }
}

impl<L: Logger + ?Sized> Logger for Box<L> {
    fn log(&self, level: Level, msg: &str, fields: &[Field<'_>]) {
        (**self).log(level, msg, fields);
    }

    fn with(&self, fields: &[Field<'_>]) -> Box<dyn Logger> {
        (**self).with(fields)
    }
}

/// Render fields as space-separated `key=value` pairs.
pub fn render_fields<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a dyn Display)>,
{
    let mut out = String::new();
    for (key, value) in fields {
        if !out.is_empty() {
            out.push(' ');
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{}={}", key, value);
    }
    out
}

/// Forwards events to `tracing`.
///
/// Context added through [`with`](Logger::with) is pre-rendered once and
/// attached to every event as the `context` field; per-call fields go into the
/// `fields` field.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    context: String,
}

impl TracingLogger {
    /// A logger with no context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rendered context carried by this logger.
    pub fn context(&self) -> &str {
        &self.context
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, msg: &str, fields: &[Field<'_>]) {
        let fields = render_fields(fields.iter().copied());
        let context = self.context.as_str();
        match level {
            Level::Debug => tracing::debug!(context, fields = %fields, "{}", msg),
            Level::Info => tracing::info!(context, fields = %fields, "{}", msg),
            Level::Warn => tracing::warn!(context, fields = %fields, "{}", msg),
            Level::Error => tracing::error!(context, fields = %fields, "{}", msg),
        }
    }

    fn with(&self, fields: &[Field<'_>]) -> Box<dyn Logger> {
        let added = render_fields(fields.iter().copied());
        let context = match (self.context.is_empty(), added.is_empty()) {
            (true, _) => added,
            (false, true) => self.context.clone(),
            (false, false) => format!("{} {}", self.context, added),
        };
        Box::new(TracingLogger { context })
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _msg: &str, _fields: &[Field<'_>]) {}

    fn with(&self, _fields: &[Field<'_>]) -> Box<dyn Logger> {
        Box::new(NoopLogger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_render_fields() {
        let rendered = render_fields([("op", &"find" as &dyn Display), ("attempt", &2 as &dyn Display)]);
        assert_eq!(rendered, "op=find attempt=2");
        assert_eq!(render_fields(std::iter::empty()), "");
    }

    #[traced_test]
    #[test]
    fn test_with_accumulates_context() {
        let logger = TracingLogger::new()
            .with(&[("db", &"app")])
            .with(&[])
            .with(&[("coll", &"users")]);
        logger.info("lookup", &[]);

        assert!(logs_contain("db=app coll=users"));
    }

    #[test]
    fn test_level_ordering_and_display() {
        assert!(Level::Debug < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert_eq!(Level::Warn.to_string(), "warn");
    }

    #[traced_test]
    #[test]
    fn test_tracing_logger_emits_warn_with_fields() {
        let logger = TracingLogger::new().with(&[("namespace", &"app.users")]);
        logger.warn("retrying error", &[("error", &"connection reset")]);

        assert!(logs_contain("retrying error"));
        assert!(logs_contain("namespace=app.users"));
        assert!(logs_contain("error=connection reset"));
    }

    #[traced_test]
    #[test]
    fn test_noop_logger_emits_nothing() {
        let logger = NoopLogger.with(&[("k", &"v")]);
        logger.error("should not appear", &[]);
        assert!(!logs_contain("should not appear"));
    }
}
