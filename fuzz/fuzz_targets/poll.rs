#![no_main]
use embedded_hal_fuzz::{i2c::I2cFuzz, shared_data::FuzzData};
use libfuzzer_sys::fuzz_target;
use ms5837_nb::{mock_utils::ManualClock, Config, SETTLING_TIME_US};

type Error = ();

fuzz_target!(|data: &[u8]| {
    let data = FuzzData::new(data);
    let i2c: I2cFuzz<'_, Error> = I2cFuzz::new(data);
    let clock = ManualClock::new(0);
    let pressure_sensor = ms5837_nb::new(i2c, &clock, Config::default());
    if let Ok(mut pressure_sensor) = pressure_sensor.init() {
        // Enough polls for a few full cycles, including retries. The readings
        // are likely garbage, we only care about crashes.
        for _ in 0..16 {
            let _ = pressure_sensor.poll();
            clock.advance(u64::from(SETTLING_TIME_US));
        }
    }
});
