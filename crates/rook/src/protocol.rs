//
// protocol.rs
//
// Wire-level value types for the remote R engine link. One envelope
// (`RjsCom`) travels in each direction per protocol cycle; a `MainList`
// envelope carries the engine's pending console and UI items, and a
// client-waiting item goes back attached to the next envelope once it
// has been answered. Everything here is plain data with serde derives so
// a transport can frame it as JSON; decode failures on the transport
// side surface as ordinary connection errors.
//

use serde::{Deserialize, Serialize};

// ============================================================================
// Status words
// ============================================================================

/// Severity attached to an engine status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
}

/// Session-level condition reported by a status envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Nothing to report; also the answer to a ping.
    Ok,
    /// The client detached from the engine on purpose.
    Disconnected,
    /// The link dropped without a prior disconnect.
    Lost,
    /// The engine shut down.
    Stopped,
}

/// Status word exchanged on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RjsStatus {
    pub severity: Severity,
    pub code: StatusCode,
}

impl RjsStatus {
    /// The all-clear word; also what a healthy engine answers to a ping.
    pub const OK: RjsStatus = RjsStatus {
        severity: Severity::Ok,
        code: StatusCode::Ok,
    };

    pub fn new(severity: Severity, code: StatusCode) -> Self {
        Self { severity, code }
    }

    pub fn info(code: StatusCode) -> Self {
        Self::new(Severity::Info, code)
    }
}

// ============================================================================
// Console-read options
// ============================================================================

/// Low nibble of a console-read option word; it selects whether the
/// submitted input is recorded in the command history.
pub const PROMPT_HISTORY_MASK: u32 = 0xF;

/// Nibble value marking input that belongs in the history.
pub const PROMPT_ADD_TO_HISTORY: u32 = 0x1;

/// Reads the add-to-history flag out of a console-read option word.
pub fn prompt_adds_to_history(options: u32) -> bool {
    options & PROMPT_HISTORY_MASK == PROMPT_ADD_TO_HISTORY
}

// ============================================================================
// Output streams
// ============================================================================

/// Output channel a piece of engine text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Default,
    Error,
    Info,
}

// ============================================================================
// Extended UI commands
// ============================================================================

/// UI request conveyed by the engine and served by the embedding client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiCommand {
    /// Ask the user for a file path. `new_file` distinguishes save-style
    /// pickers from open-style ones.
    ChooseFile { new_file: bool },
    LoadHistory { filename: String },
    SaveHistory { filename: String },
    AddToHistory { line: String },
    ShowHistory { pattern: String },
    OpenInEditor { filename: String },
}

impl UiCommand {
    /// Command name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            UiCommand::ChooseFile { .. } => "chooseFile",
            UiCommand::LoadHistory { .. } => "loadHistory",
            UiCommand::SaveHistory { .. } => "saveHistory",
            UiCommand::AddToHistory { .. } => "addToHistory",
            UiCommand::ShowHistory { .. } => "showHistory",
            UiCommand::OpenInEditor { .. } => "openInEditor",
        }
    }
}

/// Client-side answer to an extended UI item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiReply {
    Ok,
    Answer(String),
    Cancel,
    Error,
}

// ============================================================================
// Main-list items
// ============================================================================

/// One unit of work inside a `MainList` envelope.
///
/// Client-waiting items (`ConsoleRead` and waiting `ExtUi`) block the
/// engine until they come back answered; the other kinds are
/// fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MainItem {
    /// Console output produced by the engine.
    ConsoleWrite { stream: OutputStream, text: String },
    /// The engine waits for one line of console input.
    ConsoleRead {
        prompt: String,
        /// Raw option word; see [`prompt_adds_to_history`].
        options: u32,
        /// Input line filled in by the client before the item is sent back.
        answer: Option<String>,
    },
    /// Out-of-band notice shown on the info stream.
    Message { text: String },
    /// UI request served by the embedding client.
    ExtUi {
        command: UiCommand,
        /// The engine blocks until the answered item comes back.
        wait: bool,
        answer: Option<UiReply>,
    },
}

impl MainItem {
    /// True when the engine blocks until this item is answered.
    pub fn waits_for_client(&self) -> bool {
        match self {
            MainItem::ConsoleRead { .. } => true,
            MainItem::ExtUi { wait, .. } => *wait,
            MainItem::ConsoleWrite { .. } | MainItem::Message { .. } => false,
        }
    }
}

/// Engine-to-client envelope payload: the busy flag plus pending items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainList {
    pub busy: bool,
    pub items: Vec<MainItem>,
}

// ============================================================================
// Envelope
// ============================================================================

/// Envelope exchanged on the main channel, one per protocol cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RjsCom {
    /// Keepalive probe; answered with [`RjsStatus::OK`].
    Ping,
    /// Status word, standalone or as a ping answer.
    Status(RjsStatus),
    /// The engine's pending work.
    MainList(MainList),
    /// An answered client-waiting item on its way back to the engine.
    Answer(MainItem),
}

impl RjsCom {
    /// Short tag for log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            RjsCom::Ping => "ping",
            RjsCom::Status(_) => "status",
            RjsCom::MainList(_) => "main-list",
            RjsCom::Answer(_) => "answer",
        }
    }
}
