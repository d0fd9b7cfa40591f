mod frame;
mod timestep;

pub use frame::{FrameSettings, Lockstep, SyncError};
pub use timestep::FixedTimestep;
