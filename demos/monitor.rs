use bitbang_i2c::sim::Wire;
use fugit::RateExtU32;
use gauge_monitor::{Monitor, MonitorConfig, MonitorInput};
use log::LevelFilter;
use max17055::sim::FakeGauge;

const PASSES: usize = 3;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let config = MonitorConfig::new(400.kHz(), 3350, true);
    let mut monitor = Monitor::new(config).unwrap();
    let mut wire = Wire::new(FakeGauge::new().with_data_not_ready(5).with_refresh_polls(2));

    let mut start = true;
    let mut passes = 0;
    let mut ticks = 0u64;
    while passes < PASSES {
        let output = monitor.tick(MonitorInput {
            start,
            lines: wire.levels(),
        });
        wire.step(output.scl, output.sda);
        start = false;
        ticks += 1;

        if let Some(error) = output.error {
            log::error!("Measurement failed: {:?}", error);
            return;
        }

        if output.measurement_done {
            passes += 1;

            let telemetry = monitor.telemetry();
            log::info!(
                "[{} ticks] {}/{} mAh, {}%, age {}%, {} °C",
                ticks,
                telemetry.remaining_capacity_mah(),
                telemetry.full_capacity_mah(),
                telemetry.state_of_charge_percent(),
                telemetry.age_percent(),
                telemetry.temperature_celsius(),
            );
        }
    }

    log::info!("{} register accesses", wire.target.device().log().len());
}
