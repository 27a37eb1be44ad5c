//
// mock_engine.rs
//
// Scripted engine double for session loop tests. Main-channel replies
// play back in order; the side channel answers pings according to a
// switchable flag. Every envelope the controller sends is recorded so
// tests can assert on the exact exchange.
//

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::controller::EngineConnection;
use crate::protocol::{MainItem, MainList, OutputStream, RjsCom, RjsStatus, StatusCode};

/// One scripted main-channel exchange.
#[derive(Debug, Clone)]
pub enum MainStep {
    /// Answer the next call with this envelope.
    Reply(RjsCom),
    /// Fail the next call with a transport error.
    Fail(&'static str),
}

pub struct ScriptedEngine {
    script: Mutex<VecDeque<MainStep>>,
    sent: Mutex<Vec<Option<RjsCom>>>,
    ping_ok: AtomicBool,
    main_calls: AtomicUsize,
    interrupts: AtomicUsize,
    disconnects: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            ping_ok: AtomicBool::new(true),
            main_calls: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(self, com: RjsCom) -> Self {
        self.push_reply(com);
        self
    }

    pub fn with_failure(self, message: &'static str) -> Self {
        self.push_failure(message);
        self
    }

    /// Appends a reply to the script; usable after the engine is shared.
    pub fn push_reply(&self, com: RjsCom) {
        self.lock_script().push_back(MainStep::Reply(com));
    }

    pub fn push_failure(&self, message: &'static str) {
        self.lock_script().push_back(MainStep::Fail(message));
    }

    /// Controls whether side-channel pings succeed.
    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    /// Envelopes received so far on the main channel, in call order.
    pub fn sent(&self) -> Vec<Option<RjsCom>> {
        self.lock(&self.sent).clone()
    }

    pub fn main_calls(&self) -> usize {
        self.main_calls.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn remaining_steps(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> MutexGuard<'_, VecDeque<MainStep>> {
        self.lock(&self.script)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineConnection for ScriptedEngine {
    async fn run_main_loop(&self, _ticket: u32, com: Option<RjsCom>) -> Result<RjsCom> {
        self.main_calls.fetch_add(1, Ordering::SeqCst);
        self.lock(&self.sent).push(com);
        match self.lock_script().pop_front() {
            Some(MainStep::Reply(reply)) => Ok(reply),
            Some(MainStep::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("engine script exhausted")),
        }
    }

    async fn run_async(&self, _ticket: u32, com: RjsCom) -> Result<RjsCom> {
        if !matches!(com, RjsCom::Ping) {
            return Err(anyhow!("unexpected side-channel envelope"));
        }
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(RjsCom::Status(RjsStatus::OK))
        } else {
            Err(anyhow!("ping refused"))
        }
    }

    async fn interrupt(&self, _ticket: u32) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _ticket: u32) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Envelope shorthand
// ============================================================================

/// Main-list envelope with the given items.
pub fn main_list(busy: bool, items: Vec<MainItem>) -> RjsCom {
    RjsCom::MainList(MainList { busy, items })
}

/// Console-read item whose input lands in the history.
pub fn console_read(prompt: &str) -> MainItem {
    MainItem::ConsoleRead {
        prompt: prompt.to_string(),
        options: 0x1,
        answer: None,
    }
}

/// Console output on the default stream.
pub fn console_write(text: &str) -> MainItem {
    MainItem::ConsoleWrite {
        stream: OutputStream::Default,
        text: text.to_string(),
    }
}

/// Console output on the error stream.
pub fn console_error(text: &str) -> MainItem {
    MainItem::ConsoleWrite {
        stream: OutputStream::Error,
        text: text.to_string(),
    }
}

/// Status envelope reporting an engine shutdown.
pub fn stopped_status() -> RjsCom {
    RjsCom::Status(RjsStatus::info(StatusCode::Stopped))
}

/// Status envelope confirming a client detach.
pub fn disconnected_status() -> RjsCom {
    RjsCom::Status(RjsStatus::info(StatusCode::Disconnected))
}
