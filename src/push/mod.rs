//! Push channel: wire frames, the WebSocket connection and the event
//! dispatcher that folds events into session state.

pub mod connection;
pub mod dispatch;
pub mod events;

pub use connection::{ConnectionStatus, PushConnection, PushMessage};
pub use dispatch::{apply, Effect};
pub use events::{ClientFrame, PushEvent, QueueUpdate};
