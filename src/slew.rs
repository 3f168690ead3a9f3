// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tts160_elements::astro_util::EquatorialCoordinates;

use crate::clock::Clock;
use crate::dispatcher::CommandDispatcher;
use crate::error::{MountError, MountResult};
use crate::motion_state::MotionState;
use crate::protocol;

// Tracking-resume detection, used when the mount tracked before the GoTo.
const TRACKING_POLL_INTERVAL: Duration = Duration::from_millis(200);
const TRACKING_RESUME_TIMEOUT: Duration = Duration::from_secs(300);

// Position sampling, used when it did not.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
// Movement between samples below which the mount is considered still.
const STEP_THRESHOLD: f64 = 0.5 / 3600.0;
// Coarse distance from target within which stillness counts as arrival.
const TARGET_THRESHOLD: f64 = 10.0;
const CONVERGE_SAMPLES: u32 = 3;
// Samples without motion before the GoTo is declared stalled.
const STALL_SAMPLES: u32 = 300;

// Distance in hour/degree units, RA difference wrapped to +/-12h.
pub fn residual(a: &EquatorialCoordinates, b: &EquatorialCoordinates) -> f64 {
    let mut d_ra = a.right_ascension - b.right_ascension;
    if d_ra > 12.0 {
        d_ra -= 24.0;
    } else if d_ra < -12.0 {
        d_ra += 24.0;
    }
    let d_dec = a.declination - b.declination;
    (d_ra * d_ra + d_dec * d_dec).sqrt()
}

// Arrival detector for a GoTo with no tracking-resume signal. Fed one
// position sample at a time.
#[derive(Debug)]
pub struct ConvergenceDetector {
    target: EquatorialCoordinates,
    previous: EquatorialCoordinates,
    converge_count: u32,
    stall_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    Moving,
    Arrived,
    Stalled,
}

impl ConvergenceDetector {
    pub fn new(target: EquatorialCoordinates, initial: EquatorialCoordinates)
               -> Self {
        ConvergenceDetector {
            target,
            previous: initial,
            converge_count: CONVERGE_SAMPLES,
            stall_count: STALL_SAMPLES,
        }
    }

    pub fn update(&mut self, sample: EquatorialCoordinates) -> Convergence {
        let step = residual(&sample, &self.previous);
        let to_target = residual(&sample, &self.target);
        self.previous = sample;

        let still = step <= STEP_THRESHOLD;
        if still && to_target <= TARGET_THRESHOLD {
            self.converge_count -= 1;
        } else if self.converge_count < CONVERGE_SAMPLES {
            self.converge_count += 1;
        }
        if self.converge_count == 0 {
            return Convergence::Arrived;
        }

        if still {
            self.stall_count -= 1;
        } else if self.stall_count < STALL_SAMPLES {
            self.stall_count += 1;
        }
        if self.stall_count == 0 {
            return Convergence::Stalled;
        }
        Convergence::Moving
    }
}

/// GoTo to the target: blocking and poll-driven async variants, the
/// Slewing status, and abort.
pub struct SlewController {
    dispatcher: Arc<CommandDispatcher>,
    state: Arc<MotionState>,
    clock: Arc<dyn Clock>,
    settle_time: Mutex<Duration>,
}

impl SlewController {
    pub fn new(dispatcher: Arc<CommandDispatcher>,
               state: Arc<MotionState>,
               clock: Arc<dyn Clock>,
               settle_time: Duration) -> Self {
        SlewController {
            dispatcher, state, clock, settle_time: Mutex::new(settle_time),
        }
    }

    pub fn settle_time(&self) -> Duration {
        *self.settle_time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_settle_time(&self, settle_time: Duration) {
        *self.settle_time.lock().unwrap_or_else(PoisonError::into_inner) =
            settle_time;
    }

    /// Starts a GoTo to the target and returns once the mount has arrived
    /// and settled.
    pub fn slew_to_target(&self) -> MountResult<()> {
        let (was_tracking, target) = self.start_goto(/*async_slew=*/false)?;
        let result = if was_tracking {
            self.wait_for_tracking_resume()
        } else {
            self.wait_for_convergence(target)
        };
        self.finish();
        result
    }

    /// Starts a GoTo to the target and returns immediately. Progress is
    /// advanced by calls to slewing().
    pub fn slew_to_target_async(&self) -> MountResult<()> {
        self.start_goto(/*async_slew=*/true)?;
        Ok(())
    }

    /// Reports whether the mount is in motion. For an async GoTo this is
    /// also what moves the slew through arrival and settling, so callers
    /// must keep polling.
    pub fn slewing(&self) -> MountResult<bool> {
        let settle_time = self.settle_time();
        {
            let mut flags = self.state.lock();
            if let Some(settle_start) = flags.slew_settle_start {
                if self.clock.now() - settle_start < settle_time {
                    return Ok(true);
                }
                flags.slew_settle_start = None;
                flags.is_slewing = false;
                info!("Slew settled");
                return Ok(false);
            }
            if !(flags.is_slewing && flags.is_slewing_async) {
                return Ok(flags.is_slewing);
            }
        }

        // The firmware suspends tracking during a GoTo and resumes it on
        // arrival.
        if !protocol::read_tracking(&self.dispatcher)? {
            return Ok(true);
        }
        let mut flags = self.state.lock();
        flags.is_slewing_to_target = false;
        flags.is_slewing_async = false;
        if settle_time > Duration::ZERO {
            flags.slew_settle_start = Some(self.clock.now());
            info!("Slew arrived, settling for {:?}", settle_time);
            Ok(true)
        } else {
            flags.is_slewing = false;
            info!("Slew arrived");
            Ok(false)
        }
    }

    /// Stops all motion. Never fails: device errors are logged and dropped.
    pub fn abort_slew(&self) {
        self.state.lock().target.invalidate();
        self.stop_and_restore_tracking();
        info!("Slew aborted");
    }

    // Hard stop, then put tracking back the way it was last commanded.
    fn stop_and_restore_tracking(&self) {
        self.halt();
        let (track, parked) = {
            let mut flags = self.state.lock();
            flags.clear_motion();
            (flags.track_set_follower, flags.is_parked)
        };
        if parked {
            return;
        }
        let restore = if track {
            protocol::TRACKING_ON
        } else {
            protocol::TRACKING_OFF
        };
        if let Err(e) = self.dispatcher.send_blind(restore) {
            warn!("Restoring tracking failed: {}", e);
        }
    }

    // Validates and sends the GoTo. Returns whether the mount was tracking,
    // and the target.
    fn start_goto(&self, async_slew: bool)
                  -> MountResult<(bool, EquatorialCoordinates)> {
        self.dispatcher.ensure_connected("SlewToTarget")?;
        let (target, alt_az_override) = {
            let flags = self.state.lock();
            if flags.is_parked {
                return Err(MountError::Parked("SlewToTarget".to_string()));
            }
            if flags.goto_in_flight() {
                return Err(MountError::ConcurrencyConflict(
                    "GoTo already in progress".to_string()));
            }
            if !flags.target.is_set() {
                return Err(MountError::ValueNotSet("target".to_string()));
            }
            (EquatorialCoordinates {
                right_ascension: flags.target.right_ascension,
                declination: flags.target.declination,
            }, flags.slew_alt_az_track_override)
        };
        let tracking = protocol::read_tracking(&self.dispatcher)?;
        if !tracking && !alt_az_override {
            return Err(MountError::InvalidOperation(
                "tracking must be enabled to slew".to_string()));
        }

        if self.dispatcher.send_bool(protocol::SLEW_TO_TARGET)? {
            warn!("GoTo to RA {} Dec {} refused",
                  protocol::format_ra(target.right_ascension),
                  protocol::format_dec(target.declination));
            return Err(MountError::RejectedByDevice(
                "target not reachable".to_string()));
        }

        let mut flags = self.state.lock();
        flags.is_slewing = true;
        flags.is_slewing_to_target = true;
        flags.is_slewing_async = async_slew;
        flags.slew_settle_start = None;
        // A further GoTo needs a freshly set target.
        flags.target.invalidate();
        info!("GoTo started to RA {} Dec {}{}",
              protocol::format_ra(target.right_ascension),
              protocol::format_dec(target.declination),
              if async_slew { " (async)" } else { "" });
        Ok((tracking, target))
    }

    fn aborted(&self) -> bool {
        !self.state.lock().is_slewing_to_target
    }

    fn wait_for_tracking_resume(&self) -> MountResult<()> {
        let start = self.clock.now();
        loop {
            self.clock.sleep(TRACKING_POLL_INTERVAL);
            if self.aborted() {
                info!("GoTo aborted while waiting for arrival");
                return Ok(());
            }
            if protocol::read_tracking(&self.dispatcher)? {
                break;
            }
            if self.clock.now() - start >= TRACKING_RESUME_TIMEOUT {
                self.stop_and_restore_tracking();
                return Err(MountError::Timeout(format!(
                    "tracking did not resume within {:?}",
                    TRACKING_RESUME_TIMEOUT)));
            }
        }
        info!("GoTo arrived after {:?}", self.clock.now() - start);
        self.settle();
        Ok(())
    }

    fn wait_for_convergence(&self, target: EquatorialCoordinates)
                            -> MountResult<()> {
        let start = self.clock.now();
        let initial = protocol::read_equatorial(&self.dispatcher)?;
        let mut detector = ConvergenceDetector::new(target, initial);
        loop {
            self.clock.sleep(SAMPLE_INTERVAL);
            if self.aborted() {
                info!("GoTo aborted while converging");
                return Ok(());
            }
            let sample = protocol::read_equatorial(&self.dispatcher)?;
            match detector.update(sample) {
                Convergence::Moving => (),
                Convergence::Arrived => {
                    info!("GoTo converged after {:?}", self.clock.now() - start);
                    self.settle();
                    return Ok(());
                }
                Convergence::Stalled => {
                    self.halt();
                    return Err(MountError::Stall(format!(
                        "no motion for {} samples, stopped at RA {} Dec {}",
                        STALL_SAMPLES,
                        protocol::format_ra(sample.right_ascension),
                        protocol::format_dec(sample.declination))));
                }
            }
        }
    }

    fn settle(&self) {
        let settle_time = self.settle_time();
        if settle_time > Duration::ZERO {
            debug!("Settling for {:?}", settle_time);
            self.clock.sleep(settle_time);
        }
    }

    fn halt(&self) {
        if let Err(e) = self.dispatcher.send_blind(protocol::HALT_ALL) {
            warn!("Halt failed: {}", e);
        }
    }

    fn finish(&self) {
        let mut flags = self.state.lock();
        flags.is_slewing = false;
        flags.is_slewing_to_target = false;
        flags.is_slewing_async = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::SimulatedMount;

    struct Fixture {
        sim: SimulatedMount,
        state: Arc<MotionState>,
        clock: Arc<ManualClock>,
        controller: SlewController,
    }

    fn fixture(settle_secs: u64) -> Fixture {
        let sim = SimulatedMount::new();
        let dispatcher = Arc::new(CommandDispatcher::new());
        dispatcher.attach(Box::new(sim.clone()));
        let state = Arc::new(MotionState::new());
        let clock = Arc::new(ManualClock::new());
        let controller = SlewController::new(
            dispatcher, state.clone(), clock.clone(),
            Duration::from_secs(settle_secs));
        Fixture { sim, state, clock, controller }
    }

    fn set_target(state: &MotionState, ra: f64, dec: f64) {
        let mut flags = state.lock();
        flags.target.right_ascension = ra;
        flags.target.declination = dec;
        flags.target.ra_set = true;
        flags.target.dec_set = true;
    }

    fn eq(ra: f64, dec: f64) -> EquatorialCoordinates {
        EquatorialCoordinates { right_ascension: ra, declination: dec }
    }

    #[test]
    fn test_residual_wraps_ra() {
        assert!((residual(&eq(23.9, 0.0), &eq(0.1, 0.0)) - 0.2).abs() < 1e-9);
        assert!((residual(&eq(1.0, 3.0), &eq(4.0, 7.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_detector_needs_consecutive_still_samples() {
        let target = eq(10.5, 20.0);
        let mut detector = ConvergenceDetector::new(target, eq(9.0, 18.0));
        assert_eq!(detector.update(eq(10.5, 20.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(10.5, 20.0)), Convergence::Moving);
        // A jump in the middle sets the count back.
        assert_eq!(detector.update(eq(10.6, 20.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(10.6, 20.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(10.6, 20.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(10.6, 20.0)), Convergence::Arrived);
    }

    #[test]
    fn test_detector_stall_recovers_with_motion() {
        let mut detector = ConvergenceDetector::new(eq(10.0, 20.0), eq(0.0, 0.0));
        for _ in 0..299 {
            assert_eq!(detector.update(eq(0.0, 0.0)), Convergence::Moving);
        }
        // Motion pushes the stall count back up.
        assert_eq!(detector.update(eq(0.5, 0.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(0.5, 0.0)), Convergence::Moving);
        assert_eq!(detector.update(eq(0.5, 0.0)), Convergence::Stalled);
    }

    #[test]
    fn test_preconditions() {
        let f = fixture(0);
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::ValueNotSet(_))));
        f.state.lock().target.ra_set = true;
        assert!(matches!(f.controller.slew_to_target_async(),
                         Err(MountError::ValueNotSet(_))));

        set_target(&f.state, 10.5, 20.0);
        f.sim.set_status_sequence(&["AN1"]);
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::InvalidOperation(_))));

        f.state.lock().is_parked = true;
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::Parked(_))));
        assert_eq!(f.sim.count(":MS#"), 0);
    }

    #[test]
    fn test_single_goto_in_flight() {
        let f = fixture(0);
        set_target(&f.state, 10.5, 20.0);
        f.sim.set_status_sequence(&["AT1"]);
        f.controller.slew_to_target_async().unwrap();

        set_target(&f.state, 11.0, 21.0);
        let before = f.clock.elapsed();
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::ConcurrencyConflict(_))));
        assert!(matches!(f.controller.slew_to_target_async(),
                         Err(MountError::ConcurrencyConflict(_))));
        assert_eq!(f.clock.elapsed(), before);
        assert_eq!(f.sim.count(":MS#"), 1);
    }

    #[test]
    fn test_refused_goto() {
        let f = fixture(0);
        set_target(&f.state, 10.5, -80.0);
        f.sim.set_goto_reply(true);
        assert!(matches!(f.controller.slew_to_target_async(),
                         Err(MountError::RejectedByDevice(_))));
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
        // Target survives a refusal.
        assert!(flags.target.is_set());
    }

    #[test]
    fn test_target_must_be_set_again_after_slew() {
        let f = fixture(0);
        set_target(&f.state, 10.5, 20.0);
        f.sim.set_status_sequence(&["AT1", "AN1", "AT1"]);
        f.controller.slew_to_target().unwrap();
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::ValueNotSet(_))));
    }

    #[test]
    fn test_blocking_goto_while_tracking() {
        let f = fixture(2);
        set_target(&f.state, 10.5, 20.0);
        // Precondition read, then tracking suspended for three polls.
        f.sim.set_status_sequence(&["AT1", "AN1", "AN1", "AN1", "AT1"]);
        f.controller.slew_to_target().unwrap();
        // Four polls at 200 ms then the settle time.
        assert_eq!(f.clock.elapsed(), Duration::from_millis(2800));
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
        assert_eq!(f.sim.count(":Q#"), 0);
    }

    #[test]
    fn test_blocking_goto_tracking_timeout() {
        let f = fixture(2);
        set_target(&f.state, 10.5, 20.0);
        f.state.lock().track_set_follower = true;
        f.sim.set_status_sequence(&["AT1", "AN1"]);
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::Timeout(_))));
        assert_eq!(f.clock.elapsed(), TRACKING_RESUME_TIMEOUT);
        assert_eq!(f.sim.count(":Q#"), 1);
        // Tracking is put back as it was before the GoTo.
        let commands = f.sim.commands();
        assert_eq!(&commands[commands.len() - 2..], [":Q#", ":T1#"]);
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
    }

    #[test]
    fn test_blocking_goto_converges() {
        let f = fixture(2);
        set_target(&f.state, 10.5, 20.0);
        f.state.lock().slew_alt_az_track_override = true;
        f.sim.set_status_sequence(&["AN1"]);
        f.sim.set_position_samples(&[
            ("08:00:00", "+10*00:00"),
            ("08:30:00", "+12*00:00"),
            ("09:00:00", "+14*00:00"),
            ("09:30:00", "+16*00:00"),
            ("10:00:00", "+18*00:00"),
            ("10:20:00", "+19*30:00"),
            ("10:30:00", "+20*00:00"),
        ]);
        f.controller.slew_to_target().unwrap();
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
        // Still from sample 6 on; three still samples after it.
        assert_eq!(f.sim.count(":GR#"), 10);
        assert_eq!(f.clock.elapsed(), Duration::from_millis(900 + 2000));
        assert_eq!(f.sim.count(":Q#"), 0);
    }

    #[test]
    fn test_blocking_goto_stalls() {
        let f = fixture(2);
        set_target(&f.state, 10.5, 20.0);
        f.state.lock().slew_alt_az_track_override = true;
        f.sim.set_status_sequence(&["AN1"]);
        f.sim.set_position_samples(&[("02:00:00", "-30*00:00")]);
        assert!(matches!(f.controller.slew_to_target(),
                         Err(MountError::Stall(_))));
        assert_eq!(f.sim.count(":Q#"), 1);
        assert_eq!(f.sim.count(":GR#"), 301);
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
    }

    #[test]
    fn test_async_poll_without_settle() {
        let f = fixture(0);
        set_target(&f.state, 10.5, 20.0);
        f.sim.set_status_sequence(&["AT1", "AN1", "AN1", "AT1"]);
        f.controller.slew_to_target_async().unwrap();
        assert!(f.controller.slewing().unwrap());
        assert!(f.controller.slewing().unwrap());
        // Tracking has resumed.
        assert!(!f.controller.slewing().unwrap());
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing_to_target && !flags.is_slewing_async);
        assert!(!f.controller.slewing().unwrap());
        assert_eq!(f.sim.count(":GW#"), 4);
    }

    #[test]
    fn test_async_poll_with_settle() {
        let f = fixture(2);
        set_target(&f.state, 10.5, 20.0);
        f.sim.set_status_sequence(&["AT1", "AN1", "AT1"]);
        f.controller.slew_to_target_async().unwrap();
        assert!(f.controller.slewing().unwrap());
        // Tracking resumed: settle timer starts.
        assert!(f.controller.slewing().unwrap());
        assert!(!f.state.snapshot().is_slewing_to_target);
        f.clock.advance(Duration::from_millis(1999));
        assert!(f.controller.slewing().unwrap());
        f.clock.advance(Duration::from_millis(1));
        assert!(!f.controller.slewing().unwrap());
        assert!(!f.controller.slewing().unwrap());
        assert!(f.state.snapshot().slew_settle_start.is_none());
    }

    #[test]
    fn test_async_without_polling_stays_slewing() {
        let f = fixture(0);
        set_target(&f.state, 10.5, 20.0);
        f.controller.slew_to_target_async().unwrap();
        f.clock.advance(Duration::from_secs(3600));
        assert!(f.state.snapshot().is_slewing);
    }

    #[test]
    fn test_abort_restores_tracking() {
        let f = fixture(0);
        set_target(&f.state, 10.5, 20.0);
        f.state.lock().track_set_follower = true;
        f.controller.slew_to_target_async().unwrap();
        f.state.lock().guiding_east_west = true;
        f.sim.clear_commands();

        f.controller.abort_slew();
        assert_eq!(f.sim.commands(), vec![":Q#", ":T1#"]);
        let flags = f.state.snapshot();
        assert!(!flags.is_slewing && !flags.is_slewing_to_target);
        assert!(!flags.is_slewing_async && !flags.is_pulse_guiding());
        assert!(!flags.target.is_set());
        assert!(!f.controller.slewing().unwrap());
    }

    #[test]
    fn test_abort_while_parked_leaves_tracking_alone() {
        let f = fixture(0);
        {
            let mut flags = f.state.lock();
            flags.is_parked = true;
            flags.track_set_follower = true;
        }
        f.controller.abort_slew();
        assert_eq!(f.sim.commands(), vec![":Q#"]);
    }

    #[test]
    fn test_abort_when_disconnected_does_not_fail() {
        let state = Arc::new(MotionState::new());
        state.lock().is_slewing = true;
        let controller = SlewController::new(
            Arc::new(CommandDispatcher::new()), state.clone(),
            Arc::new(ManualClock::new()), Duration::ZERO);
        controller.abort_slew();
        assert!(!state.snapshot().is_slewing);
    }
}
