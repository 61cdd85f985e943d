//! Bus clock derived from the scheduler tick.
//!
//! One bus period spans `tick_rate / bus_rate` ticks: the first half with the
//! clock low, the second half with the clock high. Each period carries two
//! events, a [`Edge::Drive`] point a quarter period in (data may change) and a
//! [`Edge::Sample`] point three quarters in (data is settled and read).

use fugit::HertzU32;

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// Early in the low half of the period.
    Drive,
    /// Middle of the high half of the period.
    Sample,
}

/// Where the timebase currently is within the bus period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phase {
    pub clock_high: bool,
    pub edge: Option<Edge>,
}

#[derive(Debug, Clone)]
pub struct Timebase {
    period: u32,
    position: u32,
}

impl Timebase {
    /// The smallest period that still leaves a tick between the rising clock
    /// edge and the sample point.
    pub const MIN_PERIOD: u32 = 4;

    pub fn new(tick_rate: HertzU32, bus_rate: HertzU32) -> Result<Self, ConfigError> {
        let bus_hz = bus_rate.to_Hz();
        if bus_hz == 0 {
            return Err(ConfigError::DividerTooSmall);
        }

        Self::with_period(tick_rate.to_Hz() / bus_hz)
    }

    pub const fn with_period(period: u32) -> Result<Self, ConfigError> {
        if period < Self::MIN_PERIOD {
            return Err(ConfigError::DividerTooSmall);
        }
        if period % 2 != 0 {
            return Err(ConfigError::DividerNotEven);
        }

        Ok(Self {
            period,
            position: 0,
        })
    }

    /// Ticks per bus period.
    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn phase(&self) -> Phase {
        let half = self.period / 2;

        let edge = if self.position == half / 2 {
            Some(Edge::Drive)
        } else if self.position == half + half / 2 {
            Some(Edge::Sample)
        } else {
            None
        };

        Phase {
            clock_high: self.position >= half,
            edge,
        }
    }

    pub fn advance(&mut self) {
        self.position = (self.position + 1) % self.period;
    }

    /// Returns to the start of the low half. Only called while no transfer is
    /// in flight.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fugit::RateExtU32;

    fn one_period(timebase: &mut Timebase) -> heapless::Vec<Phase, 64> {
        let mut phases = heapless::Vec::new();
        for _ in 0..timebase.period() {
            phases.push(timebase.phase()).unwrap();
            timebase.advance();
        }
        phases
    }

    #[test]
    fn test_divider_from_rates() {
        let timebase = Timebase::new(400.kHz(), 100.kHz()).unwrap();
        assert_eq!(timebase.period(), 4);

        let timebase = Timebase::new(1.MHz(), 100.kHz()).unwrap();
        assert_eq!(timebase.period(), 10);
    }

    #[test]
    fn test_rejects_unusable_dividers() {
        assert_eq!(
            Timebase::new(200.kHz(), 100.kHz()).unwrap_err(),
            ConfigError::DividerTooSmall
        );
        assert_eq!(
            Timebase::with_period(6 + 1).unwrap_err(),
            ConfigError::DividerNotEven
        );
        assert_eq!(
            Timebase::new(400.kHz(), 0.Hz()).unwrap_err(),
            ConfigError::DividerTooSmall
        );
    }

    #[test]
    fn test_minimum_period_waveform() {
        let mut timebase = Timebase::with_period(4).unwrap();

        #[rustfmt::skip]
        let expected = [
            Phase { clock_high: false, edge: None },
            Phase { clock_high: false, edge: Some(Edge::Drive) },
            Phase { clock_high: true, edge: None },
            Phase { clock_high: true, edge: Some(Edge::Sample) },
        ];

        assert_eq!(one_period(&mut timebase).as_slice(), &expected);
        // free running
        assert_eq!(one_period(&mut timebase).as_slice(), &expected);
    }

    #[test]
    fn test_symmetric_duty_and_single_events() {
        for period in [4, 6, 8, 10, 32] {
            let mut timebase = Timebase::with_period(period).unwrap();
            let phases = one_period(&mut timebase);

            let high = phases.iter().filter(|p| p.clock_high).count() as u32;
            assert_eq!(high, period / 2);

            let drive: heapless::Vec<_, 64> = phases
                .iter()
                .filter(|p| p.edge == Some(Edge::Drive))
                .collect();
            let sample: heapless::Vec<_, 64> = phases
                .iter()
                .filter(|p| p.edge == Some(Edge::Sample))
                .collect();

            assert_eq!(drive.len(), 1);
            assert_eq!(sample.len(), 1);
            assert!(!drive[0].clock_high);
            assert!(sample[0].clock_high);
        }
    }

    #[test]
    fn test_reset_returns_to_low_half() {
        let mut timebase = Timebase::with_period(8).unwrap();
        for _ in 0..5 {
            timebase.advance();
        }
        assert!(timebase.phase().clock_high);

        timebase.reset();
        assert!(!timebase.phase().clock_high);
        assert_eq!(timebase.phase().edge, None);
    }
}
