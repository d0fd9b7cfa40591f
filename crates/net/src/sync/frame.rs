use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandQueue, QueueError};
use crate::error::{ConfigError, NetworkError};
use crate::sim::Simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    pub ready_ahead: u16,
    pub sync_freq: u16,
    pub client_timeout: u32,
    pub lag_pause: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            ready_ahead: 2,
            sync_freq: 100,
            client_timeout: 518,
            lag_pause: 74,
        }
    }
}

impl FrameSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ready_ahead == 0 {
            return Err(ConfigError::OutOfRange {
                name: "ready_ahead",
                min: 1,
            });
        }
        if self.sync_freq == 0 {
            return Err(ConfigError::OutOfRange {
                name: "sync_freq",
                min: 1,
            });
        }
        if self.lag_pause == 0 {
            return Err(ConfigError::OutOfRange {
                name: "lag_pause",
                min: 1,
            });
        }
        Ok(())
    }

    pub fn is_sync_frame(&self, frame: u32) -> bool {
        frame % self.sync_freq as u32 == 0
    }

    /// Frame at which a command collected while advancing to `frame` runs.
    pub fn execution_frame(&self, frame: u32) -> u32 {
        frame.saturating_add(self.ready_ahead as u32)
    }

    pub fn schedule(&self, frame: u32, commands: impl IntoIterator<Item = Command>) -> Vec<Command> {
        let execution = self.execution_frame(frame);
        commands
            .into_iter()
            .map(|mut command| {
                command.frame = execution;
                command
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("command for frame {command_frame} arrived after frame {frame} ran")]
    LateCommand { command_frame: u32, frame: u32 },
    #[error(transparent)]
    MissedCommand(#[from] QueueError),
    #[error("checksum mismatch at frame {frame}: expected {expected:#018x}, got {actual:#018x}")]
    Desync { frame: u32, expected: u64, actual: u64 },
}

impl SyncError {
    pub fn frame(&self) -> u32 {
        match self {
            SyncError::LateCommand { frame, .. } => *frame,
            SyncError::MissedCommand(QueueError::MissedFrame { frame, .. }) => *frame,
            SyncError::Desync { frame, .. } => *frame,
        }
    }
}

impl From<SyncError> for NetworkError {
    fn from(err: SyncError) -> Self {
        NetworkError::Desync { frame: err.frame() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyncCheck {
    frame: u32,
    checksum: u64,
}

/// Executes frames in order, never past the frame the server released.
#[derive(Debug, Clone)]
pub struct Lockstep {
    frame: u32,
    frame_max: u32,
    queue: CommandQueue,
    pending_sync: Option<SyncCheck>,
}

impl Lockstep {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            frame_max: frame,
            queue: CommandQueue::new(),
            pending_sync: None,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn frame_max(&self) -> u32 {
        self.frame_max
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn release(&mut self, frame_max: u32) {
        self.frame_max = self.frame_max.max(frame_max);
    }

    pub fn schedule(&mut self, command: Command) -> Result<(), SyncError> {
        if command.frame <= self.frame {
            return Err(SyncError::LateCommand {
                command_frame: command.frame,
                frame: self.frame,
            });
        }
        self.queue.push(command);
        Ok(())
    }

    /// Registers the server checksum for `frame`. If that frame already ran,
    /// the comparison happens immediately against the current state.
    pub fn expect_checksum<S: Simulation + ?Sized>(
        &mut self,
        frame: u32,
        checksum: u64,
        sim: &S,
    ) -> Result<(), SyncError> {
        if frame == self.frame {
            return Self::compare(frame, checksum, sim.checksum());
        }
        if frame < self.frame {
            log::warn!("ignoring checksum for past frame {} (at {})", frame, self.frame);
            return Ok(());
        }
        self.pending_sync = Some(SyncCheck { frame, checksum });
        Ok(())
    }

    fn compare(frame: u32, expected: u64, actual: u64) -> Result<(), SyncError> {
        if expected == actual {
            Ok(())
        } else {
            Err(SyncError::Desync {
                frame,
                expected,
                actual,
            })
        }
    }

    pub fn can_advance(&self) -> bool {
        self.frame < self.frame_max
    }

    pub fn advance_one<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> Result<Option<u32>, SyncError> {
        if !self.can_advance() {
            return Ok(None);
        }

        let frame = self.frame + 1;
        for command in self.queue.take_frame(frame)? {
            sim.execute(&command);
        }
        sim.advance(frame);
        self.frame = frame;

        if let Some(check) = self.pending_sync.filter(|c| c.frame == frame) {
            self.pending_sync = None;
            Self::compare(frame, check.checksum, sim.checksum())?;
        }

        Ok(Some(frame))
    }

    /// Runs every released frame; returns how many ran.
    pub fn run<S: Simulation + ?Sized>(&mut self, sim: &mut S) -> Result<u32, SyncError> {
        let mut ran = 0;
        while self.advance_one(sim)?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    /// Commands scheduled but not yet executed, for seeding a joiner.
    pub fn pending(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }

    pub fn reset(&mut self, frame: u32) {
        *self = Self::new(frame);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::sim::JournalWorld;

    fn command(cmd: u32, frame: u32) -> Command {
        Command {
            frame,
            ..Command::new(0, cmd)
        }
    }

    #[test]
    fn test_does_not_pass_frame_max() {
        let mut lockstep = Lockstep::new(0);
        let mut world = JournalWorld::default();
        lockstep.release(3);

        assert_eq!(lockstep.run(&mut world).unwrap(), 3);
        assert_eq!(lockstep.frame(), 3);
        assert_eq!(lockstep.advance_one(&mut world).unwrap(), None);
        assert_eq!(world.frame(), 3);
    }

    #[test]
    fn test_executes_commands_on_their_frame() {
        let mut lockstep = Lockstep::new(0);
        let mut world = JournalWorld::default();
        lockstep.schedule(command(5, 2)).unwrap();
        lockstep.schedule(command(6, 4)).unwrap();
        lockstep.release(3);

        lockstep.run(&mut world).unwrap();
        assert_eq!(world.journal().len(), 1);
        assert_eq!(world.journal()[0].cmd, 5);
        assert_eq!(lockstep.queue().len(), 1);
    }

    #[test]
    fn test_late_command_is_rejected() {
        let mut lockstep = Lockstep::new(0);
        let mut world = JournalWorld::default();
        lockstep.release(5);
        lockstep.run(&mut world).unwrap();

        assert_eq!(
            lockstep.schedule(command(1, 5)),
            Err(SyncError::LateCommand {
                command_frame: 5,
                frame: 5
            })
        );
    }

    #[test]
    fn test_checksum_mismatch_is_desync() {
        let mut lockstep = Lockstep::new(0);
        let mut world = JournalWorld::default();
        lockstep.release(4);
        lockstep.expect_checksum(2, 0xBAD, &world).unwrap();

        let err = lockstep.run(&mut world).unwrap_err();
        assert!(matches!(err, SyncError::Desync { frame: 2, .. }));
        assert_eq!(lockstep.frame(), 2);
    }

    #[test]
    fn test_checksum_for_current_frame_checks_now() {
        let mut lockstep = Lockstep::new(0);
        let mut world = JournalWorld::default();
        lockstep.release(1);
        lockstep.run(&mut world).unwrap();

        let checksum = world.checksum();
        assert!(lockstep.expect_checksum(1, checksum, &world).is_ok());
        assert!(lockstep.expect_checksum(1, checksum ^ 1, &world).is_err());
    }

    #[test]
    fn test_settings_validation() {
        let settings = FrameSettings {
            ready_ahead: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(FrameSettings::default().validate().is_ok());

        let settings = FrameSettings {
            lag_pause: 0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::OutOfRange {
                name: "lag_pause",
                min: 1
            })
        );
    }

    #[test]
    fn test_execution_frame_saturates() {
        let settings = FrameSettings::default();
        assert_eq!(settings.execution_frame(10), 12);
        assert_eq!(settings.execution_frame(u32::MAX - 1), u32::MAX);

        let scheduled = settings.schedule(u32::MAX, [Command::new(0, 1)]);
        assert_eq!(scheduled[0].frame, u32::MAX);
    }

    proptest! {
        #[test]
        fn prop_execution_frames_never_precede_current(
            ready_ahead in 1u16..8,
            frames in proptest::collection::vec(0u32..10, 1..20),
        ) {
            let settings = FrameSettings { ready_ahead, ..Default::default() };
            let mut current = 0u32;
            let mut last = 0u32;
            for step in frames {
                current += step;
                for scheduled in settings.schedule(current, vec![Command::new(0, 1); 3]) {
                    prop_assert!(scheduled.frame >= current + ready_ahead as u32);
                    prop_assert!(scheduled.frame >= last);
                    last = scheduled.frame;
                }
            }
        }

        #[test]
        fn prop_same_schedule_same_state(
            cmds in proptest::collection::vec((0u32..50, 1u32..30), 0..40),
            release_steps in proptest::collection::vec(1u32..7, 1..10),
        ) {
            let mut reference = Lockstep::new(0);
            let mut reference_world = JournalWorld::default();
            let mut chunked = Lockstep::new(0);
            let mut chunked_world = JournalWorld::default();

            let mut sorted = cmds.clone();
            sorted.sort_by_key(|&(_, frame)| frame);
            for &(cmd, frame) in &sorted {
                reference.schedule(command(cmd, frame)).unwrap();
                chunked.schedule(command(cmd, frame)).unwrap();
            }

            reference.release(40);
            reference.run(&mut reference_world).unwrap();

            let mut released = 0;
            for step in release_steps {
                released += step;
                chunked.release(released.min(40));
                chunked.run(&mut chunked_world).unwrap();
            }
            chunked.release(40);
            chunked.run(&mut chunked_world).unwrap();

            prop_assert_eq!(reference_world.checksum(), chunked_world.checksum());
            prop_assert_eq!(reference_world.journal(), chunked_world.journal());
        }
    }
}
