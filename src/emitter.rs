//! Public capture API.
//!
//! Callers hand an event to an [`Emitter`]; the call site's file and line
//! are captured right there with `#[track_caller]`, then the event is
//! queued for the [`Dispatcher`] task, which echoes it to the console,
//! appends it to the [`EventBuffer`] and writes it through the
//! [`LocalPersister`]. Only [`Emitter::fatal`] does all of this inline,
//! after first delivering whatever is still queued.

use std::fmt::Display;
use std::future::poll_fn;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use chrono::Local;
use colored::{Color, Colorize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::buffer::EventBuffer;
use crate::event::{LogEvent, SourceLocation};
use crate::persist::{LocalPersister, PersistError};
use crate::tag::{Tag, TAG_ERROR};

/// Capacity of the dispatch queue.
pub const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Exit code used when the local log file cannot be written.
pub const LOCAL_IO_EXIT_CODE: i32 = 74;

/// Prefix marking events written by [`Emitter::fatal`].
const FATAL_PREFIX: &str = "PANIC:";

/// Format one console line: `[<local time>] <color><message><reset>`.
pub fn console_line(color: Color, message: &str) -> String {
    format!(
        "[{}] {}",
        Local::now().format("%d %b %y %H:%M %Z"),
        message.color(color)
    )
}

enum Dispatch {
    Event {
        event: LogEvent,
        /// `None` for silent events
        console: Option<Color>,
    },
    Flush(oneshot::Sender<()>),
}

/// Receiving side of the queue plus the dispatch claimed for delivery.
///
/// A dispatch only leaves `pending` while this lock is held, so whoever
/// holds it sees every event not yet delivered.
struct Inbox {
    rx: mpsc::Receiver<Dispatch>,
    pending: Option<Dispatch>,
}

struct Shared {
    buffer: Arc<EventBuffer>,
    persister: Arc<LocalPersister>,
    console: bool,
    inbox: Mutex<Inbox>,
}

impl Shared {
    fn lock_inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the next dispatch into `pending`. `false` once every sender
    /// is gone.
    fn poll_claim(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut inbox = self.lock_inbox();
        if inbox.pending.is_some() {
            return Poll::Ready(true);
        }
        match inbox.rx.poll_recv(cx) {
            Poll::Ready(Some(dispatch)) => {
                inbox.pending = Some(dispatch);
                Poll::Ready(true)
            }
            Poll::Ready(None) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Deliver the claimed dispatch, if it is still there.
    fn deliver_claimed(&self) {
        let mut inbox = self.lock_inbox();
        if let Some(dispatch) = inbox.pending.take() {
            deliver_dispatch(self, dispatch);
        }
    }

    /// Deliver the claimed dispatch and everything still queued, in order.
    fn drain(&self, inbox: &mut Inbox) {
        if let Some(dispatch) = inbox.pending.take() {
            deliver_dispatch(self, dispatch);
        }
        while let Ok(dispatch) = inbox.rx.try_recv() {
            deliver_dispatch(self, dispatch);
        }
    }

    fn print(&self, color: Option<Color>, message: &str) {
        if let (true, Some(color)) = (self.console, color) {
            println!("{}", console_line(color, message));
        }
    }

    /// Console, buffer, then disk. A disk failure ends the process.
    fn deliver_inline(&self, event: LogEvent, console: Option<Color>) {
        self.print(console, event.message());
        let (message, time) = (event.message().to_string(), event.time());
        self.buffer.append(event);
        if let Err(e) = self.persister.record(&message, &time) {
            exit_on_persist_error(e);
        }
    }
}

fn exit_on_persist_error(err: PersistError) -> ! {
    error!(error = %err, "Local log file is not writable, terminating");
    eprintln!("{}", err);
    std::process::exit(LOCAL_IO_EXIT_CODE);
}

/// Handle used by application code to emit events. Cheap to clone.
#[derive(Clone)]
pub struct Emitter {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Dispatch>,
}

/// Worker that applies queued events in the order they were emitted.
///
/// Dropping it closes the queue: anything still queued is delivered on
/// the spot and later events are delivered inline by the emitter.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Emitter {
    /// Create an emitter and the dispatcher that must be spawned to drain it.
    ///
    /// Until the dispatcher runs, queued events wait in the channel. If the
    /// dispatcher is dropped, events are delivered inline instead.
    pub fn new(
        buffer: Arc<EventBuffer>,
        persister: Arc<LocalPersister>,
        console: bool,
    ) -> (Self, Dispatcher) {
        let (queue, rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        let shared = Arc::new(Shared {
            buffer,
            persister,
            console,
            inbox: Mutex::new(Inbox { rx, pending: None }),
        });

        let emitter = Self {
            shared: shared.clone(),
            queue,
        };
        (emitter, Dispatcher { shared })
    }

    /// Emit an untagged event prefixed with the caller's `file:line`.
    #[track_caller]
    pub fn log(&self, message: impl Display) {
        let location = SourceLocation::from(Location::caller());
        let text = format!("{} {}", location, message);
        self.submit(LogEvent::new(text, None, Some(location)), Some(Color::White));
    }

    /// Emit a tagged event prefixed with the caller's `file:line`.
    ///
    /// `tag_id` outside the catalog resolves to Success. Silent events are
    /// not echoed to the console but are still buffered and persisted.
    #[track_caller]
    pub fn log_tagged(&self, silent: bool, tag_id: i64, message: impl Display) {
        let location = SourceLocation::from(Location::caller());
        let tag = Tag::from_id(tag_id);
        let text = format!("{} {}", location, message);
        let console = (!silent).then(|| tag.console_color());
        self.submit(LogEvent::new(text, Some(tag), Some(location)), console);
    }

    /// Emit an untagged event echoed in `color`, without a location prefix.
    pub fn log_color(&self, silent: bool, color: Color, message: impl Display) {
        let console = (!silent).then_some(color);
        self.submit(LogEvent::new(message.to_string(), None, None), console);
    }

    /// Emit an error as an Error-tagged event.
    #[track_caller]
    pub fn log_error(&self, err: &dyn std::error::Error) {
        self.log_tagged(false, TAG_ERROR, err);
    }

    /// Print, persist and buffer an event synchronously, then exit the
    /// process with `exit_code`.
    ///
    /// Events emitted earlier but still queued are delivered first.
    pub fn fatal(&self, exit_code: i32, message: impl Display) -> ! {
        let mut inbox = self.shared.lock_inbox();
        let event = self.capture_fatal(&mut inbox, message);
        error!(exit_code, text = event.message(), "Fatal event, terminating");
        std::process::exit(exit_code);
    }

    fn capture_fatal(&self, inbox: &mut Inbox, message: impl Display) -> LogEvent {
        self.shared.drain(inbox);
        let event = LogEvent::new(format!("{} {}", FATAL_PREFIX, message), None, None);
        self.shared.deliver_inline(event.clone(), Some(Color::Red));
        event
    }

    /// Wait until every event queued before this call has been delivered.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(Dispatch::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Buffer events are appended to.
    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.shared.buffer
    }

    /// Persister events are written through.
    pub fn persister(&self) -> &Arc<LocalPersister> {
        &self.shared.persister
    }

    /// Hand an event to the dispatcher without blocking the caller.
    fn submit(&self, event: LogEvent, console: Option<Color>) {
        match self.queue.try_send(Dispatch::Event { event, console }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dispatch)) => {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let queue = self.queue.clone();
                        let shared = self.shared.clone();
                        handle.spawn(async move {
                            if let Err(mpsc::error::SendError(dispatch)) =
                                queue.send(dispatch).await
                            {
                                deliver_dispatch(&shared, dispatch);
                            }
                        });
                    }
                    Err(_) => deliver_dispatch(&self.shared, dispatch),
                }
            }
            Err(mpsc::error::TrySendError::Closed(dispatch)) => {
                deliver_dispatch(&self.shared, dispatch);
            }
        }
    }
}

fn deliver_dispatch(shared: &Shared, dispatch: Dispatch) {
    match dispatch {
        Dispatch::Event { event, console } => shared.deliver_inline(event, console),
        Dispatch::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

impl Dispatcher {
    /// Drain the queue until every [`Emitter`] has been dropped.
    pub async fn run(self) {
        debug!("Dispatcher started");
        while poll_fn(|cx| self.shared.poll_claim(cx)).await {
            let shared = self.shared.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || shared.deliver_claimed()).await {
                warn!(error = %e, "Local log write task failed");
            }
        }
        debug!("Dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let mut inbox = self.shared.lock_inbox();
        inbox.rx.close();
        self.shared.drain(&mut inbox);
    }
}

/// Emit an untagged event; arguments are joined with single spaces.
///
/// ```no_run
/// # fn demo(emitter: &pour::Emitter) {
/// pour::log_event!(emitter, "connected to", "db-1", "in", 42, "ms");
/// # }
/// ```
#[macro_export]
macro_rules! log_event {
    ($emitter:expr, $($arg:expr),+ $(,)?) => {
        $emitter.log($crate::join_args!($($arg),+))
    };
}

/// Emit a tagged event; arguments are joined with single spaces.
#[macro_export]
macro_rules! log_tagged {
    ($emitter:expr, $silent:expr, $tag:expr, $($arg:expr),+ $(,)?) => {
        $emitter.log_tagged($silent, $tag, $crate::join_args!($($arg),+))
    };
}

/// Emit a colored event; arguments are joined with single spaces.
#[macro_export]
macro_rules! log_color {
    ($emitter:expr, $silent:expr, $color:expr, $($arg:expr),+ $(,)?) => {
        $emitter.log_color($silent, $color, $crate::join_args!($($arg),+))
    };
}

/// Emit a fatal event and exit with the given code.
#[macro_export]
macro_rules! log_fatal {
    ($emitter:expr, $code:expr, $($arg:expr),+ $(,)?) => {
        $emitter.fatal($code, $crate::join_args!($($arg),+))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! join_args {
    ($($arg:expr),+) => {
        [$(::std::string::ToString::to_string(&$arg)),+].join(" ")
    };
}
