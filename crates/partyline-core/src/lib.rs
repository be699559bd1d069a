//! Protocol core of the partyline shared-bus link layer.
//!
//! Three cooperating state machines give a multi-drop serial bus usable
//! semantics:
//!
//! - [`Enumeration`] discovers every node and assigns dense ids with no
//!   coordinator.
//! - [`Tdm`] slices bus time into per-node transmit slots and keeps clocks
//!   aligned with sync packets.
//! - [`Windowed`] delivers application payloads reliably and in order per
//!   destination over the lossy, colliding medium.
//!
//! [`Node`] wires the three to a transmit sink, receive source, and clock
//! (the [`bus`] and [`clock`] traits), and is driven by periodic
//! `process_rx`/`process_tx` calls. Nothing blocks and nothing panics;
//! wire damage is absorbed silently and every protocol self-heals by
//! restarting its own state.

pub mod bus;
pub mod clock;
pub mod config;
pub mod enumeration;
pub mod error;
pub mod node;
pub mod tdm;
pub mod window;

pub use bus::{ByteSink, ByteSource};
pub use clock::Clock;
pub use config::{ConfigError, LinkConfig, MAX_UUID_BYTES, MAX_WINDOW_SIZE};
pub use enumeration::{Enumeration, Uuid};
pub use error::LinkError;
pub use node::Node;
pub use tdm::{SYNC_TIME_BYTES, Tdm};
pub use window::Windowed;
