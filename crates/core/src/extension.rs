//! Extension event bus: ordered lifecycle hooks.
//!
//! Handlers are registered per [`EventKind`] before the first run and invoked
//! one at a time, in registration order, whenever the loop publishes an event
//! of that kind. A failing or panicking handler is logged and skipped; it never
//! stops the remaining handlers or the run.
//!
//! Extensions are observers. They see events and a read-only view of the
//! session, and can register tools and slash-commands at setup time.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::ExtensionError;
use crate::event::{Event, EventKind};
use crate::message::Message;
use crate::tool::{Tool, ToolRegistry};

// ── Notify sink ──────────────────────────────────────────────────────────

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// Where extension notifications go (terminal, log, UI).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, level: NotifyLevel);
}

/// Routes notifications into the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) {
        match level {
            NotifyLevel::Info => info!(target: "taskloom::notify", "{message}"),
            NotifyLevel::Warning => warn!(target: "taskloom::notify", "{message}"),
            NotifyLevel::Error => tracing::error!(target: "taskloom::notify", "{message}"),
        }
    }
}

// ── Context ──────────────────────────────────────────────────────────────

/// What a handler or command can see.
#[derive(Clone, Copy)]
pub struct ExtensionContext<'a> {
    /// Current session messages
    pub messages: &'a [Message],

    /// Session working directory
    pub working_dir: &'a Path,

    notifier: &'a dyn Notifier,
}

impl<'a> ExtensionContext<'a> {
    pub fn new(messages: &'a [Message], working_dir: &'a Path, notifier: &'a dyn Notifier) -> Self {
        Self {
            messages,
            working_dir,
            notifier,
        }
    }

    /// Send a notification to the user.
    pub fn notify(&self, message: &str, level: NotifyLevel) {
        self.notifier.notify(message, level);
    }
}

impl std::fmt::Debug for ExtensionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("messages", &self.messages.len())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

// ── Handler and command traits ───────────────────────────────────────────

/// A lifecycle event handler.
#[async_trait]
pub trait ExtensionHandler: Send + Sync {
    /// Name used in logs when this handler fails.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event, ctx: &ExtensionContext<'_>) -> Result<(), ExtensionError>;
}

/// A handler backed by a plain closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> ExtensionHandler for FnHandler<F>
where
    F: Fn(&Event, &ExtensionContext<'_>) -> Result<(), ExtensionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event, ctx: &ExtensionContext<'_>) -> Result<(), ExtensionError> {
        (self.f)(event, ctx)
    }
}

/// Wrap a closure as a boxed handler.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Box<dyn ExtensionHandler>
where
    F: Fn(&Event, &ExtensionContext<'_>) -> Result<(), ExtensionError> + Send + Sync + 'static,
{
    Box::new(FnHandler { name: name.into(), f })
}

/// A slash-command contributed by an extension (`/name args`).
#[async_trait]
pub trait ExtensionCommand: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, args: &str, ctx: &ExtensionContext<'_>) -> Result<String, ExtensionError>;
}

// ── Extension bundles ────────────────────────────────────────────────────

/// A named bundle of handlers, tools and commands, installed in one step.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn setup(&self, api: &mut ExtensionApi<'_>);
}

/// Registration surface handed to [`Extension::setup`].
pub struct ExtensionApi<'a> {
    extension: String,
    bus: &'a mut ExtensionBus,
    tools: &'a mut ToolRegistry,
}

impl ExtensionApi<'_> {
    /// Subscribe a handler to an event kind.
    pub fn on(&mut self, kind: EventKind, handler: Box<dyn ExtensionHandler>) {
        self.bus.push(kind, Some(self.extension.clone()), handler);
    }

    /// Make a tool available to the model.
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        debug!(extension = %self.extension, tool = tool.name(), "Extension registered tool");
        self.tools.register(tool);
    }

    /// Add a slash-command.
    pub fn register_command(&mut self, command: Box<dyn ExtensionCommand>) {
        debug!(extension = %self.extension, command = command.name(), "Extension registered command");
        self.bus.commands.insert(command.name().to_string(), command);
    }
}

// ── Bus ──────────────────────────────────────────────────────────────────

/// One subscribed handler.
pub struct HandlerRegistration {
    pub kind: EventKind,

    /// Position within the kind's list (registration order)
    pub position: usize,

    /// Owning extension, if registered through a bundle
    pub extension: Option<String>,

    pub handler: Box<dyn ExtensionHandler>,
}

/// Outcome of publishing one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that returned Ok
    pub succeeded: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// The ordered handler table owned by one engine instance.
///
/// Mutable while being built; the agent loop takes it behind an `Arc`, after
/// which nothing can be added.
#[derive(Default)]
pub struct ExtensionBus {
    handlers: HashMap<EventKind, Vec<HandlerRegistration>>,
    commands: HashMap<String, Box<dyn ExtensionCommand>>,
    extensions: Vec<String>,
}

impl ExtensionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the list for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Box<dyn ExtensionHandler>) {
        self.push(kind, None, handler);
    }

    fn push(&mut self, kind: EventKind, extension: Option<String>, handler: Box<dyn ExtensionHandler>) {
        let list = self.handlers.entry(kind).or_default();
        let position = list.len();
        list.push(HandlerRegistration {
            kind,
            position,
            extension,
            handler,
        });
    }

    /// Install an extension bundle.
    pub fn load(&mut self, extension: &dyn Extension, tools: &mut ToolRegistry) {
        let name = extension.name().to_string();
        info!(extension = %name, "Loading extension");
        let mut api = ExtensionApi {
            extension: name.clone(),
            bus: self,
            tools,
        };
        extension.setup(&mut api);
        self.extensions.push(name);
    }

    /// Names of loaded extension bundles, in load order.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_handlers(&self, kind: EventKind) -> bool {
        self.handlers.get(&kind).is_some_and(|l| !l.is_empty())
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for the event's kind, in order.
    pub async fn publish(&self, event: &Event, ctx: &ExtensionContext<'_>) -> PublishReport {
        let mut report = PublishReport::default();
        let Some(list) = self.handlers.get(&event.kind()) else {
            return report;
        };

        for reg in list {
            let name = reg.handler.name();
            let outcome = AssertUnwindSafe(reg.handler.handle(event, ctx)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(ExtensionError::Panicked {
                    handler: name.to_string(),
                    message: panic_message(payload.as_ref()),
                }),
            };

            match failure {
                None => report.succeeded += 1,
                Some(err) => {
                    report.failed += 1;
                    warn!(
                        event = %reg.kind,
                        handler = name,
                        extension = reg.extension.as_deref().unwrap_or("-"),
                        position = reg.position,
                        error = %err,
                        "Extension handler failed"
                    );
                }
            }
        }
        report
    }

    /// Registered command names and descriptions, sorted by name.
    pub fn commands(&self) -> Vec<(&str, &str)> {
        let mut list: Vec<_> = self.commands.values().map(|c| (c.name(), c.description())).collect();
        list.sort_unstable();
        list
    }

    /// Run a registered slash-command.
    pub async fn execute_command(
        &self,
        name: &str,
        args: &str,
        ctx: &ExtensionContext<'_>,
    ) -> Result<String, ExtensionError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| ExtensionError::CommandNotFound(name.to_string()))?;
        command.execute(args, ctx).await
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
