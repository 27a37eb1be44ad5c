//
// controller.rs
//
// Client-side driver for one remote R engine session. The controller
// owns the strictly alternating send/reply cycle on the engine's main
// channel: it sends an envelope (console answer, ping or null poll),
// blocks for the reply, and dispatches what comes back. Console input
// and other work arrive through a FIFO runnable queue and are drained
// one at a time; everything observable is published on a broadcast
// event channel.
//

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    prompt_adds_to_history, MainItem, MainList, OutputStream, RjsCom, RjsStatus, StatusCode,
    UiCommand, UiReply,
};

/// Exit code reported when the session ended through a detach or a
/// dropped link rather than an engine shutdown.
pub const EXIT_CODE_DISCONNECTED: i32 = 101;

/// Console command submitted by a scheduled quit.
const QUIT_COMMAND: &str = "q()";

/// Capacity of the broadcast event channel; slow subscribers lag rather
/// than block the session loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Public surface
// ============================================================================

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Starting,
    StartedProcessing,
    StartedIdling,
    StartedPaused,
    Terminated,
}

impl ToolStatus {
    /// True for every state between start and termination.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ToolStatus::StartedProcessing | ToolStatus::StartedIdling | ToolStatus::StartedPaused
        )
    }
}

/// Broadcast notification from the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    StatusChanged { from: ToolStatus, to: ToolStatus },
    RequestPause { cancelled: bool },
    RequestTerminate { cancelled: bool },
    BusyChanged(bool),
    Output { stream: OutputStream, text: String },
    Prompt { text: String, add_to_history: bool },
}

/// Terminal reason a session ended on the engine side.
///
/// Carried inside the `anyhow::Error` that unwinds the session loop;
/// owners can `downcast_ref` to tell a clean stop from a dead link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client detached on purpose.
    Disconnected,
    /// The link dropped without a prior disconnect.
    ConnectionLost,
    /// The engine shut down.
    Stopped,
}

impl SessionEnd {
    /// Console-facing message for this end.
    pub fn message(self) -> &'static str {
        match self {
            SessionEnd::Disconnected => "R disconnected.",
            SessionEnd::ConnectionLost => "R connection lost.",
            SessionEnd::Stopped => "R stopped.",
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for SessionEnd {}

/// Client view of a remote engine.
///
/// `run_main_loop` is the alternating send/reply channel the session
/// loop lives on; `run_async` is a side channel for probes and control
/// requests that must not wait for the main cycle.
#[async_trait]
pub trait EngineConnection: Send + Sync {
    async fn run_main_loop(&self, ticket: u32, com: Option<RjsCom>) -> Result<RjsCom>;
    async fn run_async(&self, ticket: u32, com: RjsCom) -> Result<RjsCom>;
    async fn interrupt(&self, ticket: u32) -> Result<()>;
    async fn disconnect(&self, ticket: u32) -> Result<()>;
}

/// Client hook serving the engine's extended UI requests.
///
/// An `Err` from the hook routes the current main list through the
/// communication restore path.
pub trait UiCallback: Send + Sync {
    fn handle(&self, command: &UiCommand) -> Result<UiReply>;
}

/// Session-level knobs injected by the embedder.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Separator appended to every submitted console line.
    pub line_separator: String,
    /// Upper bound on a single ping round trip.
    pub ping_timeout_ms: u64,
    /// Maximum number of queued runnables.
    pub queue_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            line_separator: "\n".to_string(),
            ping_timeout_ms: 5_000,
            queue_capacity: 64,
        }
    }
}

// ============================================================================
// Internal state
// ============================================================================

/// Unit of work drained by the session loop, one at a time.
#[derive(Debug)]
enum Runnable {
    ConsoleInput(String),
    Quit,
    DisconnectMonitor,
}

struct Shared {
    status: ToolStatus,
    busy: bool,
    disconnected: bool,
    pause_requested: bool,
    exit_code: Option<i32>,
    queue: VecDeque<Runnable>,
}

/// How one protocol drive ended.
enum Driven {
    /// The engine went back to waiting; control returns to the queue.
    Idle,
    /// A console-read waits for input; the loop resumes on submit.
    Suspended(MainItem),
}

/// What to do after dispatching one main list.
enum ListOutcome {
    /// Keep cycling with the given envelope (`None` polls).
    Next(Option<RjsCom>),
    /// Stop cycling and hold this console-read for the user.
    Suspend(MainItem),
}

// ============================================================================
// Controller
// ============================================================================

/// Driver for one engine session, shared between the loop task and the
/// control surface via `Arc`.
pub struct ToolController<E> {
    engine: Arc<E>,
    ticket: u32,
    config: ControllerConfig,
    shared: Mutex<Shared>,
    wake: Notify,
    events: broadcast::Sender<ToolEvent>,
    cancel: CancellationToken,
    ui: Option<Box<dyn UiCallback>>,
}

impl<E: EngineConnection> ToolController<E> {
    pub fn new(engine: Arc<E>, ticket: u32, config: ControllerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            ticket,
            config,
            shared: Mutex::new(Shared {
                status: ToolStatus::Starting,
                busy: false,
                disconnected: false,
                pause_requested: false,
                exit_code: None,
                queue: VecDeque::new(),
            }),
            wake: Notify::new(),
            events,
            cancel: CancellationToken::new(),
            ui: None,
        }
    }

    /// Installs the hook that serves extended UI requests.
    pub fn with_ui_callback(mut self, callback: Box<dyn UiCallback>) -> Self {
        self.ui = Some(callback);
        self
    }

    pub fn status(&self) -> ToolStatus {
        self.shared().status
    }

    pub fn is_busy(&self) -> bool {
        self.shared().busy
    }

    /// Exit code of the finished session; `None` until terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.shared().exit_code
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.events.subscribe()
    }

    /// Enqueues one line of console input for the pending prompt.
    pub fn submit(&self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        if line.contains('\n') {
            return Err(anyhow!("console input must be a single line"));
        }
        self.push_runnable(Runnable::ConsoleInput(line))
    }

    /// Enqueues a graceful quit, submitted to the console as `q()`.
    pub fn schedule_quit(&self) -> Result<()> {
        self.push_runnable(Runnable::Quit)?;
        self.emit(ToolEvent::RequestTerminate { cancelled: false });
        Ok(())
    }

    /// Removes a scheduled quit that has not run yet. Returns whether
    /// anything was removed.
    pub fn cancel_quit(&self) -> bool {
        let removed = {
            let mut shared = self.shared();
            let before = shared.queue.len();
            shared
                .queue
                .retain(|runnable| !matches!(runnable, Runnable::Quit));
            before != shared.queue.len()
        };
        if removed {
            self.emit(ToolEvent::RequestTerminate { cancelled: true });
        }
        removed
    }

    /// Requests or withdraws a pause. The request is published first and
    /// applied at the loop's next safe point; withdrawing before that
    /// point publishes the cancelled event instead.
    pub fn pause(&self, pause: bool) {
        if pause {
            let requested = {
                let mut shared = self.shared();
                if shared.status == ToolStatus::Terminated || shared.pause_requested {
                    false
                } else {
                    shared.pause_requested = true;
                    true
                }
            };
            if requested {
                self.emit(ToolEvent::RequestPause { cancelled: false });
                self.wake.notify_one();
            }
            return;
        }
        enum Undo {
            Nothing,
            Cancelled,
            Resumed,
        }
        let undo = {
            let mut shared = self.shared();
            if !shared.pause_requested {
                Undo::Nothing
            } else {
                shared.pause_requested = false;
                if shared.status == ToolStatus::StartedPaused {
                    Undo::Resumed
                } else {
                    Undo::Cancelled
                }
            }
        };
        match undo {
            Undo::Nothing => {}
            Undo::Cancelled => {
                self.emit(ToolEvent::RequestPause { cancelled: true });
                // The loop may already be on its way into the paused
                // state; wake it so it re-reads the withdrawn request.
                self.wake.notify_one();
            }
            Undo::Resumed => {
                self.wake.notify_one();
            }
        }
    }

    /// Requests cooperative termination, applied at the next safe point.
    /// Safe to call repeatedly.
    pub fn terminate(&self) {
        if self.cancel.is_cancelled() || self.status() == ToolStatus::Terminated {
            return;
        }
        self.emit(ToolEvent::RequestTerminate { cancelled: false });
        self.cancel.cancel();
        self.wake.notify_one();
    }

    /// Forwards an interrupt to the engine on the side channel.
    pub async fn interrupt(&self) -> Result<()> {
        self.engine.interrupt(self.ticket).await
    }

    /// Detaches this client from the engine without stopping it. The
    /// session keeps running until the engine confirms the detach, which
    /// ends it with [`EXIT_CODE_DISCONNECTED`].
    pub async fn disconnect(&self) -> Result<()> {
        {
            let shared = self.shared();
            if shared.status == ToolStatus::Terminated {
                return Err(anyhow!("the session has terminated"));
            }
            if shared.disconnected {
                return Ok(());
            }
        }
        self.engine.disconnect(self.ticket).await?;
        self.shared().disconnected = true;
        self.push_runnable(Runnable::DisconnectMonitor)
    }

    /// Probes the engine on the side channel.
    pub async fn is_alive(&self) -> bool {
        self.ping_engine().await
    }

    /// Drives the session protocol until the engine stops or the link
    /// ends. Returns `Ok(())` for a locally requested termination;
    /// engine-side ends unwind as a [`SessionEnd`] inside the error. The
    /// exit code is available through [`Self::exit_code`] either way.
    pub async fn run(&self) -> Result<()> {
        {
            let shared = self.shared();
            if shared.status != ToolStatus::Starting {
                return Err(anyhow!("the session loop has already run"));
            }
        }
        let result = self.run_session().await;
        self.mark_terminated();
        if let Err(err) = &result {
            match err.downcast_ref::<SessionEnd>() {
                Some(end) => log::info!("session ended: {}", end),
                None => log::error!("session failed: {:#}", err),
            }
        }
        result
    }

    // ------------------------------------------------------------------------
    // Session loop
    // ------------------------------------------------------------------------

    async fn run_session(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.set_status(ToolStatus::StartedProcessing);
        let mut pending = match self.drive(None).await? {
            Driven::Suspended(item) => Some(item),
            Driven::Idle => None,
        };
        loop {
            let Some(runnable) = self.next_runnable().await else {
                return Ok(());
            };
            self.set_status(ToolStatus::StartedProcessing);
            match runnable {
                Runnable::ConsoleInput(line) => self.answer_prompt(line, &mut pending).await?,
                Runnable::Quit => {
                    self.answer_prompt(QUIT_COMMAND.to_string(), &mut pending)
                        .await?
                }
                Runnable::DisconnectMonitor => self.watch_disconnect().await?,
            }
        }
    }

    /// Blocks until the next runnable is available, applying pause and
    /// terminate requests at this safe point. `None` means terminate.
    async fn next_runnable(&self) -> Option<Runnable> {
        enum Step {
            Run(Runnable),
            Paused,
            Idle,
        }
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let step = {
                let mut shared = self.shared();
                if shared.pause_requested {
                    Step::Paused
                } else if let Some(runnable) = shared.queue.pop_front() {
                    Step::Run(runnable)
                } else {
                    Step::Idle
                }
            };
            match step {
                Step::Run(runnable) => return Some(runnable),
                Step::Paused => {
                    self.set_status(ToolStatus::StartedPaused);
                    self.wait_for_wake().await;
                }
                Step::Idle => {
                    self.set_status(ToolStatus::StartedIdling);
                    self.wait_for_wake().await;
                }
            }
        }
    }

    async fn wait_for_wake(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Answers the held console-read with `input` plus the configured
    /// line separator and resumes the protocol cycle.
    async fn answer_prompt(&self, input: String, pending: &mut Option<MainItem>) -> Result<()> {
        let Some(mut item) = pending.take() else {
            log::warn!("console input dropped; the engine is not waiting for input");
            return Ok(());
        };
        if let MainItem::ConsoleRead { answer, .. } = &mut item {
            *answer = Some(format!("{}{}", input, self.config.line_separator));
        }
        match self.drive(Some(RjsCom::Answer(item))).await? {
            Driven::Suspended(next) => *pending = Some(next),
            Driven::Idle => {}
        }
        Ok(())
    }

    /// Watches a detached link: checked pings until the engine reports
    /// the detach, or a dead link synthesizes `Lost`.
    async fn watch_disconnect(&self) -> Result<()> {
        loop {
            match self.checked_ping().await {
                Ok(()) => {
                    // Engine still up; give the detach a moment to land.
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = sleep(Duration::from_millis(self.config.ping_timeout_ms)) => {}
                    }
                }
                Err(err) if err.downcast_ref::<SessionEnd>().is_some() => return Err(err),
                Err(err) => {
                    log::debug!("disconnect monitor ping failed: {:#}", err);
                    return self.apply_status(RjsStatus::info(StatusCode::Lost));
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Protocol cycle
    // ------------------------------------------------------------------------

    /// Runs send/reply cycles starting with `first` until the engine
    /// hands control back (status answer) or waits for console input.
    ///
    /// One transport failure per budget is retried after a successful
    /// side-channel ping, re-sending the same envelope; the budget
    /// refills on every successfully received envelope. A failed ping
    /// synthesizes a `Lost` status instead.
    async fn drive(&self, first: Option<RjsCom>) -> Result<Driven> {
        let mut send = first;
        let mut retry_spent = false;
        loop {
            let step = match self.engine.run_main_loop(self.ticket, send.clone()).await {
                Ok(RjsCom::Ping) => {
                    retry_spent = false;
                    send = Some(RjsCom::Status(RjsStatus::OK));
                    continue;
                }
                Ok(RjsCom::Status(status)) => {
                    retry_spent = false;
                    self.apply_status(status)?;
                    return Ok(Driven::Idle);
                }
                Ok(RjsCom::MainList(list)) => {
                    retry_spent = false;
                    self.handle_main_list(list).await
                }
                Ok(other @ RjsCom::Answer(_)) => {
                    Err(anyhow!("unexpected {} envelope from the engine", other.tag()))
                }
                Err(err) => Err(err),
            };
            match step {
                Ok(ListOutcome::Next(next)) => send = next,
                Ok(ListOutcome::Suspend(item)) => return Ok(Driven::Suspended(item)),
                Err(err) => {
                    if err.downcast_ref::<SessionEnd>().is_some() {
                        return Err(err);
                    }
                    log::error!(
                        "engine link error (sent: {}): {:#}",
                        send.as_ref().map_or("none", RjsCom::tag),
                        err
                    );
                    if !self.ping_engine().await {
                        // Not even the side channel answers.
                        return Err(match self.apply_status(RjsStatus::info(StatusCode::Lost)) {
                            Ok(()) => err,
                            Err(end) => end,
                        });
                    }
                    if retry_spent {
                        return Err(err.context("engine link failed after retry"));
                    }
                    retry_spent = true;
                    log::warn!("engine link hiccup; re-sending the last envelope once");
                    self.emit(ToolEvent::Output {
                        stream: OutputStream::Info,
                        text: "Communication error; retrying.".to_string(),
                    });
                    // `send` is untouched, so the same envelope goes out
                    // again on the next cycle.
                }
            }
        }
    }

    /// Dispatches one main list. Console-reads suspend the cycle; a
    /// waiting UI item turns into the next envelope.
    async fn handle_main_list(&self, list: MainList) -> Result<ListOutcome> {
        self.set_busy(list.busy);
        let mut items = list.items;
        let mut idx = 0;
        while idx < items.len() {
            match &items[idx] {
                MainItem::ConsoleWrite { stream, text } => {
                    let event = ToolEvent::Output {
                        stream: *stream,
                        text: text.clone(),
                    };
                    self.emit(event);
                }
                MainItem::Message { text } => {
                    let event = ToolEvent::Output {
                        stream: OutputStream::Info,
                        text: text.clone(),
                    };
                    self.emit(event);
                }
                MainItem::ConsoleRead { prompt, options, .. } => {
                    let text = prompt.clone();
                    let add_to_history = prompt_adds_to_history(*options);
                    self.emit(ToolEvent::Prompt {
                        text,
                        add_to_history,
                    });
                    // A read seldom travels alone; keep the link warm
                    // while the user types.
                    if items.len() > 1 {
                        self.unchecked_ping().await?;
                    }
                    return Ok(ListOutcome::Suspend(items.swap_remove(idx)));
                }
                MainItem::ExtUi { command, wait, .. } => {
                    let wait = *wait;
                    match self.serve_ui(command) {
                        Ok(reply) if wait => {
                            let mut item = items.swap_remove(idx);
                            if let MainItem::ExtUi { answer, .. } = &mut item {
                                *answer = Some(reply);
                            }
                            return Ok(ListOutcome::Next(Some(RjsCom::Answer(item))));
                        }
                        Ok(_) => {}
                        Err(err) => return self.recover_dispatch(err, items, idx).await,
                    }
                }
            }
            idx += 1;
        }
        Ok(ListOutcome::Next(None))
    }

    /// Restores the cycle after a dispatch error: verify the link with a
    /// checked ping, then hand the engine back exactly one answer. The
    /// last client-waiting item wins; a console-read among them becomes
    /// the pending prompt, anything else is answered with an error, and
    /// undelivered output is dropped with a notice.
    async fn recover_dispatch(
        &self,
        err: anyhow::Error,
        mut items: Vec<MainItem>,
        failed: usize,
    ) -> Result<ListOutcome> {
        log::error!("error while dispatching engine items: {:#}", err);
        self.emit(ToolEvent::Output {
            stream: OutputStream::Info,
            text: "An error occurred while running engine tasks; trying to restore the connection."
                .to_string(),
        });
        self.checked_ping().await?;
        let dropped = items[failed..]
            .iter()
            .filter(|item| !item.waits_for_client())
            .count();
        if dropped > 0 {
            self.emit(ToolEvent::Output {
                stream: OutputStream::Info,
                text: format!("Dropped {} engine output item(s) while restoring.", dropped),
            });
        }
        let mut idx = items.len();
        while idx > failed {
            idx -= 1;
            if !items[idx].waits_for_client() {
                continue;
            }
            if let MainItem::ConsoleRead { prompt, options, .. } = &items[idx] {
                let text = prompt.clone();
                let add_to_history = prompt_adds_to_history(*options);
                self.emit(ToolEvent::Prompt {
                    text,
                    add_to_history,
                });
                return Ok(ListOutcome::Suspend(items.swap_remove(idx)));
            }
            let mut item = items.swap_remove(idx);
            if let MainItem::ExtUi { answer, .. } = &mut item {
                *answer = Some(UiReply::Error);
            }
            return Ok(ListOutcome::Next(Some(RjsCom::Answer(item))));
        }
        Ok(ListOutcome::Next(None))
    }

    fn serve_ui(&self, command: &UiCommand) -> Result<UiReply> {
        match &self.ui {
            Some(hook) => hook.handle(command),
            None => {
                log::warn!(
                    "no UI callback registered; cancelling {} request",
                    command.name()
                );
                Ok(UiReply::Cancel)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Status and pings
    // ------------------------------------------------------------------------

    /// Applies a status word from the engine. Terminal codes record the
    /// session end and return it as the error that unwinds the loop.
    fn apply_status(&self, status: RjsStatus) -> Result<()> {
        let end = match status.code {
            StatusCode::Ok => return Ok(()),
            StatusCode::Disconnected => {
                self.shared().disconnected = true;
                SessionEnd::Disconnected
            }
            StatusCode::Lost => {
                let mut shared = self.shared();
                if shared.disconnected {
                    SessionEnd::Disconnected
                } else {
                    shared.disconnected = true;
                    SessionEnd::ConnectionLost
                }
            }
            StatusCode::Stopped => SessionEnd::Stopped,
        };
        self.emit(ToolEvent::Output {
            stream: OutputStream::Info,
            text: end.message().to_string(),
        });
        Err(anyhow::Error::new(end))
    }

    /// Side-channel liveness probe.
    async fn ping_engine(&self) -> bool {
        let wait = Duration::from_millis(self.config.ping_timeout_ms);
        match timeout(wait, self.engine.run_async(self.ticket, RjsCom::Ping)).await {
            Ok(Ok(RjsCom::Status(status))) => status == RjsStatus::OK,
            Ok(_) | Err(_) => false,
        }
    }

    /// Main-channel keepalive; the reply content is discarded.
    async fn unchecked_ping(&self) -> Result<()> {
        let wait = Duration::from_millis(self.config.ping_timeout_ms);
        timeout(wait, self.engine.run_main_loop(self.ticket, Some(RjsCom::Ping)))
            .await
            .map_err(|_| anyhow!("ping timed out"))??;
        Ok(())
    }

    /// Main-channel ping whose reply must be a status word; terminal
    /// codes end the session through `apply_status`.
    async fn checked_ping(&self) -> Result<()> {
        let wait = Duration::from_millis(self.config.ping_timeout_ms);
        let reply = timeout(wait, self.engine.run_main_loop(self.ticket, Some(RjsCom::Ping)))
            .await
            .map_err(|_| anyhow!("ping timed out"))??;
        match reply {
            RjsCom::Status(status) => self.apply_status(status),
            other => Err(anyhow!(
                "expected a status answer to ping, got {}",
                other.tag()
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Shared-state plumbing
    // ------------------------------------------------------------------------

    fn shared(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push_runnable(&self, runnable: Runnable) -> Result<()> {
        {
            let mut shared = self.shared();
            if shared.status == ToolStatus::Terminated {
                return Err(anyhow!("the session has terminated"));
            }
            if shared.queue.len() >= self.config.queue_capacity {
                return Err(anyhow!("the session queue is full"));
            }
            shared.queue.push_back(runnable);
        }
        self.wake.notify_one();
        Ok(())
    }

    fn set_status(&self, to: ToolStatus) {
        let from = {
            let mut shared = self.shared();
            if shared.status == to || shared.status == ToolStatus::Terminated {
                return;
            }
            let from = shared.status;
            shared.status = to;
            from
        };
        log::debug!("session status: {:?} -> {:?}", from, to);
        self.emit(ToolEvent::StatusChanged { from, to });
    }

    fn mark_terminated(&self) {
        let (from, code) = {
            let mut shared = self.shared();
            if shared.status == ToolStatus::Terminated {
                return;
            }
            let from = shared.status;
            shared.status = ToolStatus::Terminated;
            shared.pause_requested = false;
            let code = if shared.disconnected {
                EXIT_CODE_DISCONNECTED
            } else {
                0
            };
            shared.exit_code = Some(code);
            (from, code)
        };
        log::info!("session terminated (exit code {})", code);
        self.emit(ToolEvent::StatusChanged {
            from,
            to: ToolStatus::Terminated,
        });
    }

    fn set_busy(&self, busy: bool) {
        let changed = {
            let mut shared = self.shared();
            if shared.busy == busy {
                false
            } else {
                shared.busy = busy;
                true
            }
        };
        if changed {
            self.emit(ToolEvent::BusyChanged(busy));
        }
    }

    fn emit(&self, event: ToolEvent) {
        // Nobody listening is fine; events are advisory.
        let _ = self.events.send(event);
    }
}
