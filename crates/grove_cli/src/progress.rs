//! The progress renderer.
//!
//! Sync events arrive from worker threads; everything funnels through
//! one mutex-guarded writer so per-repo lines never interleave. The live
//! progress line is re-rendered in place with ANSI save/restore-cursor
//! sequences, and informational lines print above it by clearing it
//! first and re-saving afterwards.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use grove::sync::events::{EventSink, SyncEvent};

const ANSI_SAVE_CURSOR: &str = "\x1b[s";
const ANSI_RESTORE_CLEAR: &str = "\x1b[u\x1b[K";

/// How long an interrupt-flavoured error line is held back after Ctrl-C
/// so dozens of near-identical lines do not race onto the terminal.
const INTERRUPT_RACE_DELAY: Duration = Duration::from_secs(1);

/// Output verbosity, selected by the global `--log-level` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Echo every shell command and stream its output.
    Debug,
    /// One line per synced repository plus the live progress line.
    Verbose,
    /// The live progress line and informational lines only.
    Info,
    /// Nothing.
    Quiet,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Quiet => "quiet",
        };
        f.write_str(name)
    }
}

pub struct ProgressLogger {
    out: Mutex<Box<dyn Write + Send>>,

    log_synced: bool,
    log_cmds: bool,
    log_info: bool,
    log_progress: AtomicBool,

    total: AtomicI64,
    complete: AtomicI64,
    errors: AtomicI64,
    archived: AtomicI64,
    ignored: AtomicI64,
    ignored_archived: AtomicI64,

    line_live: AtomicBool,
    done_msg: Mutex<String>,

    cancel: CancellationToken,
    runtime: Option<tokio::runtime::Handle>,
}

impl ProgressLogger {
    pub fn new(level: LogLevel, cancel: CancellationToken) -> Arc<Self> {
        Self::with_writer(level, cancel, Box::new(std::io::stderr()))
    }

    pub fn with_writer(
        level: LogLevel,
        cancel: CancellationToken,
        writer: Box<dyn Write + Send>,
    ) -> Arc<Self> {
        let (log_synced, log_cmds, log_progress, log_info) = match level {
            LogLevel::Debug => (false, true, false, true),
            LogLevel::Verbose => (true, false, true, true),
            LogLevel::Info => (false, false, true, true),
            LogLevel::Quiet => (false, false, false, false),
        };

        Arc::new(Self {
            out: Mutex::new(writer),
            log_synced,
            log_cmds,
            log_info,
            log_progress: AtomicBool::new(log_progress),
            total: AtomicI64::new(0),
            complete: AtomicI64::new(0),
            errors: AtomicI64::new(0),
            archived: AtomicI64::new(0),
            ignored: AtomicI64::new(0),
            ignored_archived: AtomicI64::new(0),
            line_live: AtomicBool::new(false),
            done_msg: Mutex::new(String::new()),
            cancel,
            runtime: tokio::runtime::Handle::try_current().ok(),
        })
    }

    /// The event callback handed to the sync engine.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let logger = Arc::clone(self);
        Arc::new(move |event| Self::handle(&logger, event))
    }

    fn handle(logger: &Arc<Self>, event: SyncEvent) {
        match event {
            SyncEvent::Queued { .. } => {
                logger.total.fetch_add(1, Ordering::AcqRel);
                logger.print_progress_line();
            }
            SyncEvent::Cloned { name } => logger.synced_line("cloned", &name),
            SyncEvent::Updated { name } => logger.synced_line("updated", &name),
            SyncEvent::Skipped { name } => logger.synced_line("skipped", &name),
            SyncEvent::Archived { name } => {
                logger.archived.fetch_add(1, Ordering::AcqRel);
                logger.event_line("archived", &name);
                logger.print_progress_line();
            }
            SyncEvent::Ignored { .. } => {
                logger.ignored.fetch_add(1, Ordering::AcqRel);
                logger.print_progress_line();
            }
            SyncEvent::IgnoredArchived { .. } => {
                logger.ignored_archived.fetch_add(1, Ordering::AcqRel);
                logger.total.fetch_sub(1, Ordering::AcqRel);
                logger.print_progress_line();
            }
            SyncEvent::RepoError { message, .. } => {
                logger.errors.fetch_add(1, Ordering::AcqRel);
                Self::info_with_interrupt_race_delay(logger, message);
            }
            SyncEvent::ExecCmd { name, command } => logger.exec_cmd(&name, &command),
            SyncEvent::ExecOutput { name, output } => logger.exec_output(&name, &output),
            SyncEvent::Info { message } => logger.info(&message),
        }
    }

    fn synced_line(&self, verb: &str, name: &str) {
        self.complete.fetch_add(1, Ordering::AcqRel);
        self.event_line(verb, name);
        self.print_progress_line();
    }

    /// One `verb host/path` line at the verbose level.
    fn event_line(&self, verb: &str, name: &str) {
        if !self.log_synced {
            return;
        }
        let live = self.line_live.load(Ordering::Acquire);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if live {
            let _ = write!(out, "{ANSI_RESTORE_CLEAR}");
        }
        let _ = writeln!(out, "{verb} {name}");
        if live {
            let _ = write!(out, "{ANSI_SAVE_CURSOR}");
        }
    }

    /// An informational line, printed above the live progress line.
    pub fn info(&self, message: &str) {
        if !self.log_info {
            return;
        }
        {
            let live = self.line_live.load(Ordering::Acquire);
            let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
            if live {
                let _ = write!(out, "{ANSI_RESTORE_CLEAR}");
            }
            let _ = writeln!(out, "{message}");
            if live {
                let _ = write!(out, "{ANSI_SAVE_CURSOR}");
            }
        }
        self.print_progress_line();
    }

    /// Like [`info`], but a last-gasp interrupt message racing Ctrl-C is
    /// held back briefly and dropped once cancellation lands, so a storm
    /// of workers dying to the same signal does not flood the terminal.
    fn info_with_interrupt_race_delay(logger: &Arc<Self>, message: String) {
        if !message.ends_with("signal: interrupt") {
            logger.info(&message);
            return;
        }
        if logger.cancel.is_cancelled() {
            return;
        }

        match &logger.runtime {
            Some(handle) => {
                let delayed = Arc::clone(logger);
                handle.spawn(async move {
                    tokio::time::sleep(INTERRUPT_RACE_DELAY).await;
                    if delayed.cancel.is_cancelled() {
                        return;
                    }
                    delayed.info(&message);
                });
            }
            None => logger.info(&message),
        }
    }

    fn exec_cmd(&self, name: &str, command: &str) {
        if !self.log_cmds {
            return;
        }
        let prefix = console::style(format!("{name} ")).for_stderr().dim();
        let echoed = console::style(format!("+ {command}")).for_stderr().cyan();
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{prefix}{echoed}");
    }

    fn exec_output(&self, name: &str, output: &str) {
        if !self.log_cmds {
            return;
        }
        let prefix = console::style(format!("{name} ")).for_stderr().dim();
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        for line in output.lines() {
            let _ = writeln!(out, "{prefix}{line}");
        }
    }

    /// Re-render the live line in place.
    fn print_progress_line(&self) {
        if !self.log_progress.load(Ordering::Acquire) {
            return;
        }
        let total = self.total.load(Ordering::Acquire);
        if total <= 0 {
            return;
        }

        let first = if self.line_live.swap(true, Ordering::AcqRel) {
            ANSI_RESTORE_CLEAR
        } else {
            ANSI_SAVE_CURSOR
        };
        let done = self
            .done_msg
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = write!(
            out,
            "{first}Syncing repos... {}/{}{}{}",
            self.complete.load(Ordering::Acquire),
            total,
            self.stats_suffix(),
            done,
        );
        let _ = out.flush();
    }

    /// Finalise the live line with a verb and stop re-rendering.
    pub fn end_progress_line(&self, done: &str) {
        {
            let mut msg = self.done_msg.lock().unwrap_or_else(|e| e.into_inner());
            *msg = format!(" {done}\n");
        }
        self.print_progress_line();
        self.log_progress.store(false, Ordering::Release);
        self.line_live.store(false, Ordering::Release);
    }

    fn stats_suffix(&self) -> String {
        let mut stats = Vec::new();

        let errors = self.errors.load(Ordering::Acquire);
        if errors == 1 {
            stats.push("1 error".to_string());
        } else if errors > 1 {
            stats.push(format!("{errors} errors"));
        }

        let archived = self.archived.load(Ordering::Acquire);
        if archived >= 1 {
            stats.push(format!("{archived} archived"));
        }

        if stats.is_empty() {
            String::new()
        } else {
            format!(" ({})", stats.join(", "))
        }
    }
}
