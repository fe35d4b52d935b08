//! Match synchronization client for the two-player tower duel game
//!
//! Two peers connect to a matchmaking relay, exchange build prompts, load
//! the generated per-match models, then play a synchronized session until
//! one tower falls. This crate is the synchronization core: the relay
//! transport, the wire protocol, the session state machine, the asset
//! readiness barrier, opponent pose interpolation and the tower health
//! authority. Rendering, physics and input stay outside and talk to the
//! core through [`session::SessionHandle`] and [`session::SessionEvent`].

pub mod assets;
pub mod config;
pub mod game;
pub mod net;
pub mod session;
pub mod util;

pub use config::Config;
pub use net::{NetError, RelayClient};
pub use session::{Session, SessionConfig, SessionEvent, SessionHandle, SessionStage};
