// src/control.rs

use crate::audio_engine::command::{CommandMailbox, ControlCommand, LooperEvent};
use crate::audio_engine::frame_clock::FrameClock;
use crate::audio_engine::state_machine::accepts;
use crate::error::CommandError;
use crate::looper::{LooperStatus, SystemState};
use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const FRAME_LEN: usize = 6;

const ACCEPTED: u8 = b'p';
const REJECTED: u8 = b'f';
const TERMINATOR: u8 = b'\r';
const REPEAT_ON: u8 = b'r';
const REPEAT_OFF: u8 = b's';
const GROUP_MARKER: u8 = b'g';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Looper(ControlCommand),
    Quit,
}

/// Decodes one six-byte frame: opcode, two track digits, `g`, group digit, terminator.
pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<ControlFrame, CommandError> {
    let terminator = frame[5];
    if !matches!(terminator, TERMINATOR | REPEAT_ON | REPEAT_OFF) {
        return Err(CommandError::InvalidTerminator(terminator as char));
    }

    let command = match frame[0].to_ascii_lowercase() {
        b'r' => {
            group_marker(frame)?;
            ControlCommand::new(LooperEvent::RecordTrack, track(frame)?, digit(frame[4])?, None)?
        }
        b'o' => ControlCommand::new(LooperEvent::OverdubTrack, track(frame)?, 0, None)?,
        b'p' => match terminator {
            REPEAT_ON => ControlCommand::new(LooperEvent::PlayTrack, track(frame)?, 0, Some(true))?,
            REPEAT_OFF => {
                ControlCommand::new(LooperEvent::PlayTrack, track(frame)?, 0, Some(false))?
            }
            _ => ControlCommand::new(LooperEvent::PlayTrack, 0, 0, None)?,
        },
        b'm' => ControlCommand::new(LooperEvent::MuteTrack, track(frame)?, 0, None)?,
        b'u' => ControlCommand::new(LooperEvent::UnmuteTrack, track(frame)?, 0, None)?,
        b't' => {
            group_marker(frame)?;
            ControlCommand::new(LooperEvent::AddTrackToGroup, track(frame)?, digit(frame[4])?, None)?
        }
        b'd' => {
            group_marker(frame)?;
            ControlCommand::new(
                LooperEvent::RemoveTrackFromGroup,
                track(frame)?,
                digit(frame[4])?,
                None,
            )?
        }
        b'g' => ControlCommand::new(LooperEvent::SetActiveGroup, 0, digit(frame[1])?, None)?,
        b's' => ControlCommand::new(LooperEvent::Passthrough, 0, 0, None)?,
        b'q' => return Ok(ControlFrame::Quit),
        other => return Err(CommandError::UnknownOpcode(other as char)),
    };
    Ok(ControlFrame::Looper(command))
}

fn digit(byte: u8) -> Result<usize, CommandError> {
    if byte.is_ascii_digit() {
        Ok((byte - b'0') as usize)
    } else {
        Err(CommandError::NotADigit(byte as char))
    }
}

fn track(frame: &[u8; FRAME_LEN]) -> Result<usize, CommandError> {
    Ok(digit(frame[1])? * 10 + digit(frame[2])?)
}

fn group_marker(frame: &[u8; FRAME_LEN]) -> Result<(), CommandError> {
    if frame[3].to_ascii_lowercase() == GROUP_MARKER {
        Ok(())
    } else {
        Err(CommandError::MissingGroupMarker(frame[3] as char))
    }
}

/// Assembles bytes into frames, publishes decoded commands to the audio
/// thread and answers every frame with an accept or reject byte.
pub struct ControlLoop<W: Write> {
    mailbox: Arc<CommandMailbox>,
    status: LooperStatus,
    clock: Arc<FrameClock>,
    exit: Arc<AtomicBool>,
    ack: W,
    frame: [u8; FRAME_LEN],
    filled: usize,
    frame_delay: u32,
}

impl<W: Write> ControlLoop<W> {
    pub fn new(
        mailbox: Arc<CommandMailbox>,
        status: LooperStatus,
        clock: Arc<FrameClock>,
        exit: Arc<AtomicBool>,
        ack: W,
    ) -> Self {
        Self {
            mailbox,
            status,
            clock,
            exit,
            ack,
            frame: [0; FRAME_LEN],
            filled: 0,
            frame_delay: 0,
        }
    }

    /// Polls `bytes` until the exit flag is raised or the source closes.
    pub fn run(mut self, bytes: Receiver<u8>, poll_timeout: Duration) -> Result<()> {
        while !self.exit.load(Ordering::Relaxed) {
            match bytes.recv_timeout(poll_timeout) {
                Ok(byte) => {
                    if self.feed(byte)? == Some(REJECTED) {
                        // Whatever is already queued belongs to the bad frame.
                        let dropped = bytes.try_iter().count();
                        if dropped > 0 {
                            log::debug!("Flushed {} pending control bytes", dropped);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Control input closed, shutting down");
                    self.exit.store(true, Ordering::Relaxed);
                }
            }
        }
        log::info!("Control thread exiting");
        Ok(())
    }

    /// Takes one byte; returns the acknowledgment sent if it ended a frame.
    ///
    /// A carriage return before the last position can never be valid, so it
    /// closes the frame early and the next byte starts a new one.
    pub fn feed(&mut self, byte: u8) -> Result<Option<u8>> {
        if byte == TERMINATOR && self.filled < FRAME_LEN - 1 {
            let err = CommandError::ShortFrame(self.filled);
            log::warn!(
                "Rejected control frame {:?}: {}",
                String::from_utf8_lossy(&self.frame[..self.filled]),
                err
            );
            self.filled = 0;
            self.reply(REJECTED)?;
            return Ok(Some(REJECTED));
        }
        if self.filled == 0 {
            self.frame_delay = self.stamp(byte);
        }
        self.frame[self.filled] = byte;
        self.filled += 1;
        if self.filled < FRAME_LEN {
            return Ok(None);
        }
        self.filled = 0;
        let reply = self.handle_frame();
        self.reply(reply)?;
        Ok(Some(reply))
    }

    /// Record and overdub starts, and stops of a running take, remember how far
    /// into the current audio block their first byte arrived.
    fn stamp(&self, opcode: u8) -> u32 {
        let timed = match opcode.to_ascii_lowercase() {
            b'r' | b'o' => true,
            b'p' => matches!(
                self.status.state(),
                SystemState::Recording | SystemState::Overdubbing
            ),
            _ => false,
        };
        if timed {
            self.clock.frames_since_block_start()
        } else {
            0
        }
    }

    fn handle_frame(&mut self) -> u8 {
        match decode(&self.frame) {
            Ok(ControlFrame::Looper(command)) => {
                if !self.meaningful_now(&command) {
                    log::warn!(
                        "Rejected {:?}: nothing to do while {:?}",
                        command.event(),
                        self.status.state()
                    );
                    return REJECTED;
                }
                let command = command.with_frame_delay(self.frame_delay);
                if self.mailbox.publish(command) {
                    log::warn!("Previous command was replaced before the audio thread read it");
                }
                log::debug!("Accepted {:?}", command);
                ACCEPTED
            }
            Ok(ControlFrame::Quit) => {
                log::info!("Quit requested");
                self.exit.store(true, Ordering::Relaxed);
                ACCEPTED
            }
            Err(e) => {
                log::warn!(
                    "Rejected control frame {:?}: {}",
                    String::from_utf8_lossy(&self.frame),
                    e
                );
                REJECTED
            }
        }
    }

    /// Checks the command against the last published state. While an earlier
    /// command is still unread that state is stale, so only the engine decides.
    fn meaningful_now(&self, command: &ControlCommand) -> bool {
        if self.mailbox.is_pending() {
            return true;
        }
        accepts(
            self.status.state(),
            command.event(),
            self.status.track_state(command.track()),
        )
    }

    fn reply(&mut self, byte: u8) -> Result<()> {
        self.ack.write_all(&[byte])?;
        self.ack.flush()?;
        Ok(())
    }
}

/// Byte source and acknowledgment sink for the control loop.
pub struct ControlChannel {
    pub input: Box<dyn Read + Send>,
    pub ack: Box<dyn Write + Send>,
    /// Terminal input ends lines with `\n`; it is read as the frame terminator.
    pub newline_terminates: bool,
}

/// Opens a serial device (already configured for its line speed), or stdin/stdout.
pub fn open_channel(device: Option<&Path>) -> Result<ControlChannel> {
    match device {
        Some(path) => {
            let input = File::open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))?;
            let ack = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))?;
            log::info!("Reading control frames from {}", path.display());
            Ok(ControlChannel {
                input: Box::new(input),
                ack: Box::new(ack),
                newline_terminates: false,
            })
        }
        None => {
            log::info!("Reading control frames from stdin");
            Ok(ControlChannel {
                input: Box::new(io::stdin()),
                ack: Box::new(io::stdout()),
                newline_terminates: true,
            })
        }
    }
}

/// Blocking reads happen on their own thread so the control loop can still
/// time out and watch the exit flag. The thread ends when the source does.
pub fn spawn_reader(
    mut source: Box<dyn Read + Send>,
    bytes: Sender<u8>,
    newline_terminates: bool,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("control-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::error!("Control input read failed: {}", e);
                        break;
                    }
                };
                for &byte in &buf[..n] {
                    let byte = if newline_terminates && byte == b'\n' {
                        TERMINATOR
                    } else {
                        byte
                    };
                    if bytes.send(byte).is_err() {
                        return;
                    }
                }
            }
        })?;
    Ok(handle)
}

/// Wires a control channel to a reader thread and runs the control loop on
/// a thread of its own.
pub fn spawn(
    channel: ControlChannel,
    mailbox: Arc<CommandMailbox>,
    status: LooperStatus,
    clock: Arc<FrameClock>,
    exit: Arc<AtomicBool>,
    poll_timeout: Duration,
) -> Result<JoinHandle<Result<()>>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    // Not joined: it may be parked in a blocking read when we shut down.
    spawn_reader(channel.input, tx, channel.newline_terminates)?;
    let control = ControlLoop::new(mailbox, status, clock, exit, channel.ack);
    let handle = thread::Builder::new()
        .name("control".into())
        .spawn(move || control.run(rx, poll_timeout))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::TrackState;

    fn frame(text: &[u8]) -> [u8; FRAME_LEN] {
        let mut f = [0u8; FRAME_LEN];
        f.copy_from_slice(text);
        f
    }

    fn looper(text: &[u8]) -> ControlCommand {
        match decode(&frame(text)) {
            Ok(ControlFrame::Looper(cmd)) => cmd,
            other => panic!("expected a looper command, got {:?}", other),
        }
    }

    #[test]
    fn decodes_record_with_track_and_group() {
        let cmd = looper(b"r12g3\r");
        assert_eq!(cmd.event(), LooperEvent::RecordTrack);
        assert_eq!((cmd.track(), cmd.group()), (12, 3));
        assert_eq!(cmd.repeat(), None);
    }

    #[test]
    fn opcode_and_marker_are_case_insensitive() {
        let cmd = looper(b"T05G1\r");
        assert_eq!(cmd.event(), LooperEvent::AddTrackToGroup);
        assert_eq!((cmd.track(), cmd.group()), (5, 1));
    }

    #[test]
    fn play_terminator_selects_repeat() {
        let on = looper(b"p0700r");
        assert_eq!((on.track(), on.repeat()), (7, Some(true)));
        let off = looper(b"p0700s");
        assert_eq!((off.track(), off.repeat()), (7, Some(false)));
        let stop = looper(b"p0000\r");
        assert_eq!(stop.event(), LooperEvent::PlayTrack);
        assert_eq!(stop.repeat(), None);
    }

    #[test]
    fn group_select_reads_digit_one() {
        let cmd = looper(b"g2000\r");
        assert_eq!(cmd.event(), LooperEvent::SetActiveGroup);
        assert_eq!(cmd.group(), 2);
    }

    #[test]
    fn reset_and_quit() {
        assert_eq!(looper(b"s0000\r").event(), LooperEvent::Passthrough);
        assert_eq!(decode(&frame(b"Q0000\r")), Ok(ControlFrame::Quit));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(
            decode(&frame(b"x0000\r")),
            Err(CommandError::UnknownOpcode('x'))
        );
        assert_eq!(
            decode(&frame(b"r00g0x")),
            Err(CommandError::InvalidTerminator('x'))
        );
        assert_eq!(
            decode(&frame(b"r00x0\r")),
            Err(CommandError::MissingGroupMarker('x'))
        );
        assert_eq!(decode(&frame(b"m0a00\r")), Err(CommandError::NotADigit('a')));
    }

    #[test]
    fn rejects_out_of_range_track_and_group() {
        assert_eq!(
            decode(&frame(b"r16g0\r")),
            Err(CommandError::TrackOutOfRange(16))
        );
        assert_eq!(
            decode(&frame(b"r00g4\r")),
            Err(CommandError::GroupOutOfRange(4))
        );
        assert_eq!(
            decode(&frame(b"g9000\r")),
            Err(CommandError::GroupOutOfRange(9))
        );
    }

    struct Harness {
        control: ControlLoop<Vec<u8>>,
        mailbox: Arc<CommandMailbox>,
        status: LooperStatus,
        clock: Arc<FrameClock>,
        exit: Arc<AtomicBool>,
    }

    fn harness() -> Harness {
        let mailbox = Arc::new(CommandMailbox::new());
        let status = LooperStatus::new();
        let clock = Arc::new(FrameClock::new(48_000));
        let exit = Arc::new(AtomicBool::new(false));
        let control = ControlLoop::new(
            mailbox.clone(),
            status.clone(),
            clock.clone(),
            exit.clone(),
            Vec::new(),
        );
        Harness {
            control,
            mailbox,
            status,
            clock,
            exit,
        }
    }

    impl Harness {
        fn send(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.control.feed(b).unwrap();
            }
        }

        /// Looper in playback with `track` holding a playing take.
        fn playing(&self, track: usize) {
            self.status
                .set_system(SystemState::Playback, Some(0), Some(track), 0);
            self.status.set_track(track, TrackState::Playback, false, 1_000);
        }
    }

    #[test]
    fn acks_each_frame_and_publishes_accepted_ones() {
        let mut h = harness();
        h.send(b"r01g0\rzzzzz\r");
        assert_eq!(h.control.ack, b"pf");
        let cmd = h.mailbox.take().unwrap();
        assert_eq!(cmd.event(), LooperEvent::RecordTrack);
        assert_eq!(cmd.track(), 1);
        assert!(h.mailbox.take().is_none());
    }

    #[test]
    fn partial_frame_does_nothing() {
        let mut h = harness();
        h.send(b"m03");
        assert!(h.control.ack.is_empty());
        assert!(h.mailbox.take().is_none());
    }

    #[test]
    fn quit_raises_exit_without_touching_mailbox() {
        let mut h = harness();
        h.send(b"q0000\r");
        assert!(h.exit.load(Ordering::Relaxed));
        assert_eq!(h.control.ack, b"p");
        assert!(h.mailbox.take().is_none());
    }

    #[test]
    fn overdub_on_empty_track_is_rejected() {
        let mut h = harness();
        h.playing(0);
        h.send(b"o0500\r");
        assert_eq!(h.control.ack, b"f");
        assert!(h.mailbox.take().is_none());

        h.send(b"o0000\r");
        assert_eq!(h.control.ack, b"fp");
        assert_eq!(h.mailbox.take().unwrap().event(), LooperEvent::OverdubTrack);
    }

    #[test]
    fn commands_with_no_meaning_in_passthrough_are_rejected() {
        let mut h = harness();
        h.send(b"m0100\rg1000\rp0000\r");
        assert_eq!(h.control.ack, b"fff");
        assert!(h.mailbox.take().is_none());
    }

    #[test]
    fn unread_command_defers_the_decision_to_the_engine() {
        let mut h = harness();
        // The record is still in the mailbox, so the published state is stale.
        h.send(b"r00g0\rp0000\r");
        assert_eq!(h.control.ack, b"pp");
        assert_eq!(h.mailbox.take().unwrap().event(), LooperEvent::PlayTrack);
    }

    #[test]
    fn early_carriage_return_resyncs_framing() {
        let mut h = harness();
        h.send(b"m010\r");
        assert_eq!(h.control.ack, b"f");
        h.send(b"r01g0\r");
        assert_eq!(h.control.ack, b"fp");
        assert_eq!(h.mailbox.take().unwrap().event(), LooperEvent::RecordTrack);
    }

    #[test]
    fn untimed_frames_carry_no_delay() {
        let mut h = harness();
        h.playing(0);
        h.clock.mark_block_start(4_096);
        thread::sleep(Duration::from_millis(5));
        h.send(b"p0000\r");
        assert_eq!(h.control.ack, b"p");
        assert_eq!(h.mailbox.take().unwrap().frame_delay(), 0);
    }

    #[test]
    fn record_frame_is_stamped_with_block_offset() {
        let mut h = harness();
        h.clock.mark_block_start(4_096);
        thread::sleep(Duration::from_millis(5));
        h.send(b"r01g0\r");
        let delay = h.mailbox.take().unwrap().frame_delay();
        assert!(delay > 0 && delay <= 4_096, "delay {delay}");
    }

    #[test]
    fn stop_while_recording_is_stamped_with_block_offset() {
        let mut h = harness();
        h.status
            .set_system(SystemState::Recording, Some(0), Some(1), 0);
        h.clock.mark_block_start(4_096);
        thread::sleep(Duration::from_millis(5));
        h.send(b"p0000\r");
        assert_eq!(h.control.ack, b"p");
        let delay = h.mailbox.take().unwrap().frame_delay();
        assert!(delay > 0 && delay <= 4_096, "delay {delay}");
    }

    #[test]
    fn run_stops_when_source_closes() {
        let h = harness();
        h.playing(2);
        let (tx, rx) = crossbeam_channel::unbounded();
        for &b in b"u02\0\0\r" {
            tx.send(b).unwrap();
        }
        drop(tx);
        h.control.run(rx, Duration::from_millis(10)).unwrap();
        assert!(h.exit.load(Ordering::Relaxed));
        assert_eq!(h.mailbox.take().unwrap().event(), LooperEvent::UnmuteTrack);
    }

    #[test]
    fn run_flushes_queued_bytes_after_a_rejected_frame() {
        let h = harness();
        let (tx, rx) = crossbeam_channel::unbounded();
        for &b in b"x0000\rr00g0\r" {
            tx.send(b).unwrap();
        }
        drop(tx);
        h.control.run(rx, Duration::from_millis(10)).unwrap();
        assert!(h.mailbox.take().is_none());
    }

    #[test]
    fn reader_turns_newlines_into_terminators() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let source: Box<dyn Read + Send> = Box::new(io::Cursor::new(b"s0000\n".to_vec()));
        spawn_reader(source, tx, true).unwrap().join().unwrap();
        let bytes: Vec<u8> = rx.iter().collect();
        assert_eq!(bytes, b"s0000\r");
    }
}
