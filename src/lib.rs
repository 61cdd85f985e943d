#![cfg_attr(not(test), no_std)]

//! Fuel gauge monitor running on a bit-banged two-wire bus.
//!
//! [`Monitor`] advances the bus master and the fuel gauge sequencer by one
//! tick at a time. The caller samples the bus lines, calls [`Monitor::tick`]
//! and applies the returned line drives before the next tick.

#[macro_use]
extern crate logger;

use bitbang_i2c::{BusConfig, BusEvent, BusMaster, ConfigError, Drive, LineLevels, TransferResult};
use fugit::HertzU32;
use max17055::{
    sequencer::{SequencerInput, Step},
    Sequencer, SequencerConfig, SequencerError, Telemetry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitorConfig {
    pub bus: BusConfig,
    pub gauge: SequencerConfig,
}

impl MonitorConfig {
    /// Default bus timing at `tick_rate`, with the gauge's POR settle delay
    /// set to 1 ms.
    pub fn new(tick_rate: HertzU32, nominal_capacity: u16, continuous: bool) -> Self {
        let mut gauge = SequencerConfig::new(nominal_capacity, continuous);
        gauge.settle_ticks = (tick_rate.to_Hz() / 1000).max(1);

        Self {
            bus: BusConfig {
                tick_rate,
                ..BusConfig::default()
            },
            gauge,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorInput {
    /// One-tick start pulse.
    pub start: bool,
    /// Bus line levels observed this tick.
    pub lines: LineLevels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutput {
    pub scl: Drive,
    pub sda: Drive,
    /// One-tick pulse after new telemetry was published.
    pub measurement_done: bool,
    /// One-tick pulse when the measurement sequence stopped.
    pub error: Option<SequencerError>,
}

pub struct Monitor {
    master: BusMaster,
    sequencer: Sequencer,
    completion: Option<TransferResult>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            master: BusMaster::new(config.bus)?,
            sequencer: Sequencer::new(config.gauge),
            completion: None,
        })
    }

    /// The last published measurement pass.
    pub fn telemetry(&self) -> Telemetry {
        self.sequencer.telemetry()
    }

    pub fn step(&self) -> Step {
        self.sequencer.step()
    }

    pub fn tick(&mut self, input: MonitorInput) -> MonitorOutput {
        // The sequencer sees last tick's completion, one tick of latency
        // like any other signal between the two machines.
        let gauge = self.sequencer.tick(SequencerInput {
            start: input.start,
            bus_ready: self.master.is_ready(),
            completion: self.completion.as_ref(),
        });

        if let Some(request) = gauge.request {
            if self.master.submit(request).is_err() {
                debug!("Bus master busy, deferring request");
                self.sequencer.retract();
            }
        }

        let bus = self.master.tick(input.lines);
        self.completion = match bus.event {
            Some(BusEvent::Finished(result)) => Some(result),
            _ => None,
        };

        MonitorOutput {
            scl: bus.scl,
            sda: bus.sda,
            measurement_done: gauge.measurement_done,
            error: gauge.error,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitbang_i2c::{sim::Wire, BusError, NackSource};
    use device_descriptor::Register;
    use fugit::RateExtU32;
    use max17055::{
        ll::{DesignCap, FullCapRep, Status},
        sequencer::Measurement,
        sim::{Access, FakeGauge},
    };

    const TICK_LIMIT: usize = 100_000;

    struct Bench {
        monitor: Monitor,
        wire: Wire<FakeGauge>,
    }

    impl Bench {
        fn new(gauge: FakeGauge, continuous: bool) -> Self {
            let config = MonitorConfig::new(400.kHz(), 0x0D16, continuous);
            Self {
                monitor: Monitor::new(config).unwrap(),
                wire: Wire::new(gauge),
            }
        }

        fn tick(&mut self, start: bool) -> MonitorOutput {
            let output = self.monitor.tick(MonitorInput {
                start,
                lines: self.wire.levels(),
            });
            self.wire.step(output.scl, output.sda);
            output
        }

        /// Pulses start, then runs until `until` matches an output.
        fn run(&mut self, until: impl Fn(&MonitorOutput) -> bool) -> MonitorOutput {
            let mut start = true;
            for _ in 0..TICK_LIMIT {
                let output = self.tick(start);
                start = false;
                if until(&output) {
                    return output;
                }
            }
            panic!("monitor did not finish within {TICK_LIMIT} ticks");
        }

        fn gauge(&self) -> &FakeGauge {
            self.wire.target.device()
        }
    }

    #[test]
    fn test_settle_delay_follows_tick_rate() {
        let config = MonitorConfig::new(400.kHz(), 0x0D16, false);
        assert_eq!(config.gauge.settle_ticks, 400);
        assert_eq!(config.bus.tick_rate.to_Hz(), 400_000);

        let config = MonitorConfig::new(800.kHz(), 0x0D16, false);
        assert_eq!(config.gauge.settle_ticks, 800);
    }

    #[test]
    fn test_invalid_bus_timing_is_rejected() {
        let config = MonitorConfig::new(300.kHz(), 0x0D16, false);
        assert!(matches!(
            Monitor::new(config),
            Err(ConfigError::DividerTooSmall)
        ));
    }

    #[test]
    fn test_bring_up_and_measure() {
        let _ = simple_logger::SimpleLogger::new().env().init();

        let mut bench = Bench::new(FakeGauge::new().with_data_not_ready(3), false);
        let output = bench.run(|output| output.measurement_done || output.error.is_some());

        assert!(output.measurement_done);
        assert_eq!(output.error, None);

        let gauge = bench.gauge();
        assert_eq!(gauge.register(DesignCap::ADDRESS), 0x1A2C);
        assert_eq!(gauge.register(Status::ADDRESS) & 0x0002, 0);
        assert!(gauge.log().contains(&Access::Write(DesignCap::ADDRESS, 0x1A2C)));

        let telemetry = bench.monitor.telemetry();
        assert_eq!(telemetry.full_capacity_mah(), 0x0D16);
        assert_eq!(telemetry.state_of_charge_percent(), 50);
        assert_eq!(telemetry.age_percent(), 100);
        assert_eq!(telemetry.temperature_celsius(), 25);
        assert_eq!(bench.monitor.step(), Step::AwaitStart);
    }

    #[test]
    fn test_one_shot_goes_quiet() {
        let mut bench = Bench::new(FakeGauge::new(), false);
        bench.run(|output| output.measurement_done);

        let accesses = bench.gauge().log().len();
        for _ in 0..2000 {
            let output = bench.tick(false);
            assert_eq!(output.scl, Drive::Released);
            assert_eq!(output.sda, Drive::Released);
        }
        assert_eq!(bench.gauge().log().len(), accesses);
    }

    #[test]
    fn test_continuous_mode_keeps_measuring() {
        let mut bench = Bench::new(FakeGauge::new(), true);
        bench.run(|output| output.measurement_done);

        assert_eq!(bench.monitor.step(), Step::Measure(Measurement::FullCapRep));
        bench.wire.target.device_mut().clear_log();
        bench.wire.target.device_mut().set_register(FullCapRep::ADDRESS, 0x2000);

        // no start pulse needed for the next pass
        let mut done = false;
        for _ in 0..TICK_LIMIT {
            if bench.tick(false).measurement_done {
                done = true;
                break;
            }
        }
        assert!(done);
        assert_eq!(
            bench.gauge().log().first(),
            Some(&Access::Read(FullCapRep::ADDRESS, 0x2000))
        );
        assert_eq!(bench.monitor.telemetry().full_capacity_mah(), 0x1000);
    }

    #[test]
    fn test_missing_gauge_reports_error() {
        let mut gauge = FakeGauge::new();
        gauge.set_present(false);

        let mut bench = Bench::new(gauge, false);
        let output = bench.run(|output| output.error.is_some());
        assert_eq!(
            output.error,
            Some(SequencerError::Bus(BusError::Nack(NackSource::Address)))
        );
        assert!(matches!(bench.monitor.step(), Step::Faulted(_)));
        assert_eq!(bench.monitor.telemetry(), Telemetry::default());

        for _ in 0..2000 {
            let output = bench.tick(false);
            assert_eq!(output.scl, Drive::Released);
            assert_eq!(output.sda, Drive::Released);
            assert_eq!(output.error, None);
        }
    }
}
