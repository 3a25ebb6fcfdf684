//! Factory calibration data and the second order compensation algorithm that
//! turns raw ADC conversions into degrees C and mbar.
//!
//! Everything in here is pure integer arithmetic on `i64` accumulators. The
//! intermediate products (`dT * dT`, `D1 * SENS`) overflow 32 bits, and every
//! shift is arithmetic so negative terms keep their sign.

/// The factory calibration data as fetched from the PROM.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FactoryCalibrationData {
    /// Pressure sensitivity, C1.
    pressure_sensitivity: u16,
    /// Pressure offset, C2.
    pressure_offset: u16,
    /// Temperature coefficient of pressure sensitivity, C3.
    temperature_coefficient_of_pressure_sensitivity: u16,
    /// Temperature coefficient of pressure offset, C4.
    temperature_coefficient_of_pressure_offset: u16,
    /// Reference temperature, C5.
    reference_temperature: u16,
    /// Temperature coefficient of the temperature, C6.
    temperature_coefficient_of_temperature: u16,
}

impl FactoryCalibrationData {
    /// Builds the calibration data from the six PROM words C1..C6, in the order
    /// they are read off the sensor.
    pub const fn from_words(words: [u16; 6]) -> Self {
        FactoryCalibrationData {
            pressure_sensitivity: words[0],
            pressure_offset: words[1],
            temperature_coefficient_of_pressure_sensitivity: words[2],
            temperature_coefficient_of_pressure_offset: words[3],
            reference_temperature: words[4],
            temperature_coefficient_of_temperature: words[5],
        }
    }

    /// The six calibration words C1..C6 in PROM order.
    pub fn words(&self) -> [u16; 6] {
        [
            self.pressure_sensitivity,
            self.pressure_offset,
            self.temperature_coefficient_of_pressure_sensitivity,
            self.temperature_coefficient_of_pressure_offset,
            self.reference_temperature,
            self.temperature_coefficient_of_temperature,
        ]
    }
}

/// A pair of raw 24bit ADC conversions.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    /// Digital pressure value, D1.
    pub pressure: u32,
    /// Digital temperature value, D2.
    pub temperature: u32,
}

/// A group of temperature and pressure samples. These are grouped as pressure
/// normalisation requires sampling the current temperature.
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TemperaturePressure {
    /// Degrees C.
    pub temperature: f32,
    /// mbar.
    pub pressure: f32,
}

/// Compensated values before conversion to floating point.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedPointReading {
    /// Hundredths of a degree C.
    pub centi_celsius: i64,
    /// Tenths of a mbar.
    pub tenth_millibar: i64,
}

impl From<FixedPointReading> for TemperaturePressure {
    fn from(reading: FixedPointReading) -> Self {
        TemperaturePressure {
            temperature: reading.centi_celsius as f32 / 100.0,
            pressure: reading.tenth_millibar as f32 / 10.0,
        }
    }
}

/// Calibration words used to verify the algorithm without a sensor.
pub const SELF_TEST_CALIBRATION: FactoryCalibrationData =
    FactoryCalibrationData::from_words([34982, 36352, 20328, 22354, 26646, 26146]);

/// Raw conversions matching [`SELF_TEST_CALIBRATION`].
pub const SELF_TEST_SAMPLE: RawSample = RawSample {
    pressure: 4958179,
    temperature: 6815414,
};

/// Second order corrections subtracted from the first order results.
#[derive(PartialEq, Eq, Debug)]
struct SecondOrder {
    temperature: i64,
    offset: i64,
    sensitivity: i64,
}

fn second_order(temperature: i64, dt: i64) -> SecondOrder {
    if temperature < 2000 {
        let below = (temperature - 2000).pow(2);
        let mut correction = SecondOrder {
            temperature: (3 * dt.pow(2)) >> 33,
            offset: 3 * below / 2,
            sensitivity: 5 * below / 8,
        };
        if temperature < -1500 {
            let very_low = (temperature + 1500).pow(2);
            correction.offset += 7 * very_low;
            correction.sensitivity += 4 * very_low;
        }
        correction
    } else {
        SecondOrder {
            temperature: (2 * dt.pow(2)) >> 37,
            offset: (temperature - 2000).pow(2) / 16,
            sensitivity: 0,
        }
    }
}

/// Runs the compensation and returns the integer results.
pub fn compensate_fixed_point(
    calibration: &FactoryCalibrationData,
    raw: RawSample,
) -> FixedPointReading {
    let [c1, c2, c3, c4, c5, c6] = calibration.words().map(i64::from);
    let d1 = i64::from(raw.pressure);
    let d2 = i64::from(raw.temperature);

    // dT = D2 - C5 * 2^8
    let dt = d2 - (c5 << 8);
    // TEMP = 2000 + dT * C6 / 2^23
    let temperature = 2000 + ((dt * c6) >> 23);
    // OFF = C2 * 2^16 + (C4 * dT) / 2^7
    let offset = (c2 << 16) + ((c4 * dt) >> 7);
    // SENS = C1 * 2^15 + (C3 * dT) / 2^8
    let sensitivity = (c1 << 15) + ((c3 * dt) >> 8);

    let correction = second_order(temperature, dt);
    let offset = offset - correction.offset;
    let sensitivity = sensitivity - correction.sensitivity;

    FixedPointReading {
        centi_celsius: temperature - correction.temperature,
        // P = (D1 * SENS / 2^21 - OFF) / 2^13
        tenth_millibar: (((d1 * sensitivity) >> 21) - offset) >> 13,
    }
}

/// Normalises raw temperature and pressure readings and converts them into a
/// pair of temperature and pressure readings in deg C and mbar respectively.
pub fn compensate(calibration: &FactoryCalibrationData, raw: RawSample) -> TemperaturePressure {
    compensate_fixed_point(calibration, raw).into()
}

/// Runs the compensation on [`SELF_TEST_CALIBRATION`] and [`SELF_TEST_SAMPLE`].
///
/// The result is 19.81 deg C and 3999.8 mbar. This never touches the bus or a
/// driver's stored state.
///
/// ```
/// let reading = ms5837_nb::compensation::self_test();
/// assert!((reading.pressure - 3999.8).abs() < 0.01);
/// ```
pub fn self_test() -> TemperaturePressure {
    compensate(&SELF_TEST_CALIBRATION, SELF_TEST_SAMPLE)
}
