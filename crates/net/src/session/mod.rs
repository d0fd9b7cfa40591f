mod registry;
mod state;

pub use registry::{Session, SessionId, SessionRegistry};
pub use state::{
    AuthStage, DisconnectReason, InvalidTransition, MapCursor, SessionEvent, SessionState,
};
