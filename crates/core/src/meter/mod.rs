use std::{io::Read, thread, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    ballistics::{StereoDrive, StereoMeter},
    bus::RegisterBus,
    config::MeterConfig,
    controller::PeripheralController,
    registers::VuMode,
    stream::{AudioStream, Chunk},
    timing::{RunFlag, Throttle},
    PanelError, Result,
};

const SWEEP_STEP: Duration = Duration::from_millis(10);

/// Audio-level daemon: turns the stereo stream into meter drive values.
///
/// Outputs are switched off and the bus is released when the daemon is
/// stopped or dropped.
#[derive(Debug)]
pub struct MeterDaemon<B: RegisterBus> {
    controller: PeripheralController<B>,
    meter: StereoMeter,
    throttle: Throttle,
    idle_backoff: Duration,
    last_drive: StereoDrive,
    stopped: bool,
}

impl<B: RegisterBus> MeterDaemon<B> {
    /// Connects to the board and switches the meters on.
    pub fn start(bus: B, config: &MeterConfig) -> Result<Self> {
        config.validate()?;
        let meter = StereoMeter::from_config(config)?;
        let mut controller = PeripheralController::open(bus)?;

        let version = controller.firmware_version()?;
        info!(%version, "peripheral firmware");

        let mut daemon = Self {
            controller,
            meter,
            throttle: Throttle::new(config.update_period()),
            idle_backoff: config.idle_backoff(),
            last_drive: StereoDrive::default(),
            stopped: false,
        };
        daemon.controller.enable_vu_meters(true)?;
        daemon.controller.set_vu_mode(VuMode::Normal)?;
        info!("VU meter daemon started");
        Ok(daemon)
    }

    pub fn meter(&self) -> &StereoMeter {
        &self.meter
    }

    /// Most recent drive values computed (not necessarily written yet).
    pub fn last_drive(&self) -> StereoDrive {
        self.last_drive
    }

    /// Runs one block of interleaved samples through the ballistics and
    /// updates the meters if the update rate allows it.
    ///
    /// Returns the values written, if any.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<Option<StereoDrive>> {
        let drive = self.meter.process_interleaved(samples);
        self.last_drive = drive;

        if !self.throttle.ready() {
            return Ok(None);
        }
        self.controller.set_vu_meters(drive.left, drive.right)?;
        Ok(Some(drive))
    }

    /// Consumes `stream` until `running` is cleared.
    ///
    /// Malformed chunks are skipped. Bus and stream I/O failures end the loop.
    pub fn run<R: Read>(&mut self, stream: &mut AudioStream<R>, running: &RunFlag) -> Result<()> {
        info!("reading audio stream");
        while running.is_running() {
            match stream.read_chunk() {
                Ok(Chunk::Idle) => thread::sleep(self.idle_backoff),
                Ok(Chunk::Samples(samples)) => {
                    self.process_chunk(&samples)?;
                }
                Err(PanelError::StreamParse(reason)) => {
                    warn!(%reason, "skipping audio chunk");
                }
                Err(err) => return Err(err),
            }
        }
        debug!("audio loop finished");
        Ok(())
    }

    /// Sweeps both meters up to full scale and back down.
    pub fn sweep(&mut self, running: &RunFlag) -> Result<()> {
        self.sweep_with_step(running, SWEEP_STEP)
    }

    fn sweep_with_step(&mut self, running: &RunFlag, step: Duration) -> Result<()> {
        info!("running meter sweep");
        let levels = (0..=u8::MAX).chain((0..=u8::MAX).rev());
        for level in levels {
            if !running.is_running() {
                break;
            }
            self.controller.set_vu_meters(level, level)?;
            thread::sleep(step);
        }
        self.controller.set_vu_meters(0, 0)
    }

    /// Zeroes and disables the meters, then releases the bus. Only the first
    /// call does anything.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("stopping VU meter daemon");

        let outputs = self
            .controller
            .set_vu_meters(0, 0)
            .and_then(|_| self.controller.enable_vu_meters(false));
        self.controller.close();
        outputs
    }
}

impl<B: RegisterBus> Drop for MeterDaemon<B> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "failed to switch meters off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::sim::{BoardProbe, SimulatedBoard},
        registers::Register,
    };
    use std::{
        io::{self, Cursor},
        time::Instant,
    };

    fn encode(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn test_config() -> MeterConfig {
        MeterConfig {
            sample_rate: 10,
            min_db: -40.0,
            max_db: 0.0,
            reference_voltage: 1.0,
            chunk_bytes: 64,
            idle_backoff_ms: 0,
            ..MeterConfig::default()
        }
    }

    fn daemon(board: SimulatedBoard) -> (MeterDaemon<SimulatedBoard>, BoardProbe) {
        let probe = board.probe();
        (MeterDaemon::start(board, &test_config()).unwrap(), probe)
    }

    /// Reader that clears the run flag once its data is used up.
    struct StopAtEnd {
        inner: Cursor<Vec<u8>>,
        running: RunFlag,
    }

    impl Read for StopAtEnd {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let read = self.inner.read(buf)?;
            if read == 0 {
                self.running.stop();
            }
            Ok(read)
        }
    }

    #[test]
    fn start_enables_meters_in_normal_mode() {
        let (_daemon, probe) =
            daemon(SimulatedBoard::new().with_register(Register::Control, 0x10));
        assert_eq!(probe.register(Register::Control), 0x18);
        assert_eq!(probe.writes_to(Register::VuMode), vec![0x00]);
    }

    #[test]
    fn start_fails_on_wrong_device() {
        let board = SimulatedBoard::new().with_register(Register::DeviceId, 0);
        let err = MeterDaemon::start(board, &test_config()).unwrap_err();
        assert!(matches!(err, PanelError::Connection(_)));
    }

    #[test]
    fn updates_are_rate_limited() {
        let (mut daemon, probe) = daemon(SimulatedBoard::new());
        let written = daemon.process_chunk(&[1.0, 1.0]).unwrap();
        assert!(written.is_some());

        let skipped = daemon.process_chunk(&[1.0, 1.0]).unwrap();
        assert!(skipped.is_none());
        assert_eq!(probe.writes_to(Register::VuLeft).len(), 1);
        assert!(daemon.last_drive().left > written.unwrap().left);
    }

    #[test]
    fn run_skips_bad_chunks_and_keeps_going() {
        let (mut daemon, probe) = daemon(SimulatedBoard::new());
        let running = RunFlag::new();

        let mut bytes = encode(&[f32::NAN; 16]);
        bytes.extend(encode(&[1.0_f32, 0.0].repeat(8)));
        let reader = StopAtEnd {
            inner: Cursor::new(bytes),
            running: running.clone(),
        };
        let mut stream = AudioStream::new(reader, 64);

        daemon.run(&mut stream, &running).unwrap();

        let left = probe.writes_to(Register::VuLeft);
        let right = probe.writes_to(Register::VuRight);
        assert_eq!(left.len(), 1);
        assert!(left[0] > 0);
        assert_eq!(right, vec![0]);
    }

    #[test]
    fn bus_failure_ends_loop() {
        let (mut daemon, _probe) =
            daemon(SimulatedBoard::new().failing_writes(Register::VuLeft));
        let running = RunFlag::new();
        let mut stream = AudioStream::new(Cursor::new(encode(&[0.5, 0.5])), 64);

        let err = daemon.run(&mut stream, &running).unwrap_err();
        assert!(err.is_bus_failure());
    }

    #[test]
    fn stop_switches_off_and_releases_bus_once() {
        let (mut daemon, probe) = daemon(SimulatedBoard::new());
        daemon.process_chunk(&[1.0, 1.0]).unwrap();

        daemon.stop().unwrap();
        daemon.stop().unwrap();

        assert_eq!(probe.writes_to(Register::VuLeft).last(), Some(&0));
        assert_eq!(probe.writes_to(Register::VuRight).last(), Some(&0));
        assert_eq!(probe.register(Register::Control) & 0x08, 0);
        assert_eq!(probe.writes_to(Register::Control).len(), 2);
        assert!(probe.dropped());
    }

    #[test]
    fn drop_runs_shutdown() {
        let (daemon, probe) = daemon(SimulatedBoard::new());
        drop(daemon);
        assert_eq!(probe.register(Register::Control) & 0x08, 0);
        assert!(probe.dropped());
    }

    #[cfg(unix)]
    #[test]
    fn run_on_silent_fifo_stops_with_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = crate::stream::tests::make_fifo(&dir);
        let running = RunFlag::new();
        let mut stream = crate::stream::open_pipe(&path, 1, 64, &running).unwrap().unwrap();
        let (mut daemon, probe) = daemon(SimulatedBoard::new());

        let stopper = running.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.stop();
        });

        let started = Instant::now();
        daemon.run(&mut stream, &running).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        daemon.stop().unwrap();
        assert_eq!(probe.register(Register::Control) & 0x08, 0);
        assert!(probe.dropped());
    }

    #[test]
    fn sweep_covers_full_scale_and_ends_at_zero() {
        let (mut daemon, probe) = daemon(SimulatedBoard::new());
        daemon.sweep_with_step(&RunFlag::new(), Duration::ZERO).unwrap();

        let left = probe.writes_to(Register::VuLeft);
        assert_eq!(left.len(), 513);
        assert_eq!(left[255], 255);
        assert_eq!(left.last(), Some(&0));
    }
}
