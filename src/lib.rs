//! tunnelvision - a terminal editor that routes prompts through AI tunnels
//!
//! ```text
//!  prompt ──▶ Router ──@name / default──▶ Circuit (direct | chain | parallel | fallback)
//!                                              │
//!                                              ▼
//!                                    TunnelRegistry ──▶ Tunnel::send
//!                                              │
//!  Buffer ◀── apply ◀── EditManager ◀── Bridge events (Response, Done)
//! ```

pub mod bridge;
pub mod buffer;
pub mod circuit;
pub mod config;
pub mod edits;
pub mod init;
pub mod lock;
pub mod session;
pub mod state;
pub mod tui;
pub mod tunnel;

pub use bridge::{Bridge, BridgeEvent, RequestId, Submission};
pub use buffer::{Buffer, BufferError, Cursor};
pub use circuit::{Circuit, CircuitKind, CircuitRegistry, CircuitResult, Router};
pub use config::{Config, ConfigError};
pub use edits::{apply_edits_to_buffer, AcceptMode, Edit, EditId, EditManager, LineSink};
pub use session::{EditorSession, PromptOutcome};
pub use state::{SessionState, StateError, StateStore};
pub use tunnel::{Tunnel, TunnelError, TunnelRegistry, TunnelResult};
