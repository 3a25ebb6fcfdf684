//! # Getting started
//!
//! A platform agnostic, non-blocking driver for the [MS5837](https://www.te.com/commerce/DocumentDelivery/DDEController?Action=showdoc&DocId=Data+Sheet%7FMS5837-30BA%7FB1%7Fpdf%7FEnglish%7FENG_DS_MS5837-30BA_B1.pdf%7FCAT-BLPS0017)
//! pressure sensor.
//!
//! The driver never sleeps. Each call to [`Initialised::poll`] advances the
//! pressure/temperature conversion cycle by at most one step, using a
//! [`Clock`] to decide whether the ADC has finished converting, and reports the
//! latest compensated reading.
//!
//! ## Example
//! ```rust
//! # // NOTE: Use real i2c instance for your app.
//! # use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
//! # let i2c = I2cMock::new(&[
//! #     I2cTransaction::write_read(0x76, vec![0xA2], vec![0x88, 0xA6]),
//! #     I2cTransaction::write_read(0x76, vec![0xA4], vec![0x8E, 0x00]),
//! #     I2cTransaction::write_read(0x76, vec![0xA6], vec![0x4F, 0x68]),
//! #     I2cTransaction::write_read(0x76, vec![0xA8], vec![0x57, 0x52]),
//! #     I2cTransaction::write_read(0x76, vec![0xAA], vec![0x68, 0x16]),
//! #     I2cTransaction::write_read(0x76, vec![0xAC], vec![0x66, 0x22]),
//! #     I2cTransaction::write(0x76, vec![0x48]),
//! #     I2cTransaction::write_read(0x76, vec![0x00], vec![0x4B, 0xA7, 0xE3]),
//! #     I2cTransaction::write(0x76, vec![0x58]),
//! #     I2cTransaction::write_read(0x76, vec![0x00], vec![0x67, 0xFE, 0xB6]),
//! # ]);
//! use ms5837_nb::{mock_utils::ManualClock, Config};
//! // NOTE: You should implement the Clock trait on your platform's monotonic
//! // timer.
//! let clock = ManualClock::new(0);
//! let pressure_sensor = ms5837_nb::new(i2c, &clock, Config::default());
//! let mut pressure_sensor = pressure_sensor.init().unwrap();
//! // Call this from your scheduling loop, more often than every 10ms.
//! for _ in 0..3 {
//!     let result = pressure_sensor.poll();
//!     if let Some(reading) = result.reading {
//!         println!("{:?}", reading);
//!     }
//!     clock.advance(10_000);
//! }
//! # let (mut i2c, _) = pressure_sensor.release();
//! # i2c.done();
//! ```

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

use core::fmt;

use embedded_hal::blocking::i2c::{Write, WriteRead};

pub mod compensation;

pub use compensation::{
    compensate, FactoryCalibrationData, FixedPointReading, RawSample, TemperaturePressure,
};

/// Mock utils is a set of tools to aid in testing and documenting you should not
/// use any of the mocks defined in this module in your release binaries.
pub mod mock_utils {
    use core::cell::Cell;

    /// A clock that only moves when told to. This is useful for testing and
    /// fuzzing.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: Cell<u64>,
    }

    impl ManualClock {
        pub const fn new(start_us: u64) -> Self {
            ManualClock {
                now: Cell::new(start_us),
            }
        }

        /// Moves the clock forward by `us` microseconds.
        pub fn advance(&self, us: u64) {
            self.now.set(self.now.get().wrapping_add(us));
        }

        pub fn set(&self, us: u64) {
            self.now.set(us);
        }
    }

    impl super::Clock for ManualClock {
        fn now_us(&self) -> u64 {
            self.now.get()
        }
    }
}

/// A monotonic microsecond time source. Only differences between two
/// timestamps are used, there are no wall clock semantics.
pub trait Clock {
    fn now_us(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// The bus operations issued by the driver.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    Reset,
    /// Reading calibration word `n` (0..6).
    ReadCalibration(u8),
    StartPressureConversion,
    ReadPressure,
    StartTemperatureConversion,
    ReadTemperature,
}

impl Operation {
    /// A human readable diagnostic for a failure of this operation.
    pub fn description(&self) -> &'static str {
        use Operation::*;
        match *self {
            Reset => "Failed to reset MS5837",
            ReadCalibration(_) => "Failed to read MS5837 calibration data",
            StartPressureConversion => "Failed to start MS5837 pressure conversion",
            ReadPressure => "Failed to read MS5837 pressure",
            StartTemperatureConversion => "Failed to start MS5837 temperature conversion",
            ReadTemperature => "Failed to read MS5837 temperature",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A catch all error for this driver
#[derive(Debug, PartialEq)]
pub enum SensorError<E> {
    I2cError { operation: Operation, source: E },
}

impl<E> SensorError<E> {
    /// The bus operation that failed.
    pub fn operation(&self) -> Operation {
        match *self {
            SensorError::I2cError { operation, .. } => operation,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for SensorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::I2cError { operation, source } => write!(f, "{}: {:?}", operation, source),
        }
    }
}

/// The fixed i2c address of the MS5837.
pub const I2C_ADDRESS: u8 = 0x76;

/// Time to wait after starting a conversion before reading the ADC.
pub const SETTLING_TIME_US: u32 = 10_000;

const CALIBRATION_WORDS: usize = 6;

pub(crate) mod sealed {
    pub trait Sealed {}
}

pub trait State: sealed::Sealed {}

pub trait I2cMarker: WriteRead + Write
where
    Self: Write<Error = <Self as WriteRead>::Error>,
{
}
impl<T: WriteRead + Write> I2cMarker for T where Self: Write<Error = <Self as WriteRead>::Error> {}

/// The error type of the i2c bus.
pub type BusError<I2C> = <I2C as WriteRead>::Error;

/// Create an uninitialised driver object
///
/// # Example
///
/// ```
/// // NOTE: Use real i2c instance for your app.
/// use embedded_hal_mock::i2c::Mock as I2cMock;
/// use ms5837_nb::{mock_utils::ManualClock, Config};
/// let i2c = I2cMock::new(&[]);
/// let pressure_sensor = ms5837_nb::new(i2c, ManualClock::new(0), Config::default());
/// ```
pub fn new<I2C: I2cMarker, C: Clock>(
    i2c: I2C,
    clock: C,
    config: Config,
) -> Uninitialised<I2C, C> {
    Uninitialised { i2c, clock, config }
}

/// The oversampling ratio to use internal to the ADC. This is analogous to taking
/// n samples and then takeing the average.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverSamplingRatio {
    R256 = 0x0,
    R512 = 0x2,
    R1024 = 0x4,
    R2048 = 0x6,
    R4096 = 0x8,
}

impl OverSamplingRatio {
    /// Maximum conversion time from the datasheet.
    pub fn conversion_time_us(&self) -> u32 {
        use OverSamplingRatio::*;
        match *self {
            R256 => 600,
            R512 => 1170,
            R1024 => 2280,
            R2048 => 4540,
            R4096 => 9040,
        }
    }
}

/// Driver configuration.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub address: u8,
    pub over_sampling_ratio: OverSamplingRatio,
    /// Wait between starting a conversion and reading it back.
    pub settling_time_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: I2C_ADDRESS,
            over_sampling_ratio: OverSamplingRatio::R4096,
            settling_time_us: SETTLING_TIME_US,
        }
    }
}

impl Config {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_over_sampling_ratio(mut self, over_sampling_ratio: OverSamplingRatio) -> Self {
        self.over_sampling_ratio = over_sampling_ratio;
        self
    }

    pub fn with_settling_time_us(mut self, settling_time_us: u32) -> Self {
        self.settling_time_us = settling_time_us;
        self
    }

    /// The settling time actually waited for, never shorter than the ADC's
    /// conversion time at the configured oversampling ratio.
    pub fn effective_settling_time_us(&self) -> u32 {
        self.settling_time_us
            .max(self.over_sampling_ratio.conversion_time_us())
    }
}

/// An I2C command to send to the pressure sensor.
enum Command {
    Reset,
    ConvertD1(OverSamplingRatio),
    ConvertD2(OverSamplingRatio),
    AdcRead,
    PromRead(u8),
}

/// Convert the command into a single byte that can be sent over i2c.
impl From<Command> for u8 {
    fn from(val: Command) -> u8 {
        use Command::*;
        match val {
            Reset => 0x1E,
            ConvertD1(osr) => 0x40u8 | osr as u8,
            ConvertD2(osr) => 0x50u8 | osr as u8,
            AdcRead => 0x00,
            PromRead(address) => 0xA0u8 | (address << 1),
        }
    }
}

/// Reads the six calibration words C1..C6 from the PROM, stopping at the first
/// failed read.
fn read_calibration_data<I2C: I2cMarker>(
    i2c: &mut I2C,
    address: u8,
) -> Result<FactoryCalibrationData, SensorError<BusError<I2C>>> {
    let mut words = [0u16; CALIBRATION_WORDS];
    for (index, word) in (0u8..).zip(words.iter_mut()) {
        let mut buffer = [0, 0];
        // PROM word 0 holds the crc and factory settings, C1 lives at word 1.
        i2c.write_read(address, &[Command::PromRead(index + 1).into()], &mut buffer)
            .map_err(|source| SensorError::I2cError {
                operation: Operation::ReadCalibration(index),
                source,
            })?;
        *word = u16::from_be_bytes(buffer);
    }
    Ok(FactoryCalibrationData::from_words(words))
}

/// An uninitialised ms5837 object.
pub struct Uninitialised<I2C: I2cMarker, C: Clock> {
    i2c: I2C,
    clock: C,
    config: Config,
}

impl<I2C: I2cMarker, C: Clock> State for Uninitialised<I2C, C> {}
impl<I2C: I2cMarker, C: Clock> sealed::Sealed for Uninitialised<I2C, C> {}

impl<I2C: I2cMarker, C: Clock> Uninitialised<I2C, C> {
    /// Reset the ms5837 internal state machine. This is optional, [`init`]
    /// does not reset the sensor.
    ///
    /// [`init`]: Uninitialised::init
    pub fn reset(&mut self) -> Result<(), SensorError<BusError<I2C>>> {
        self.i2c
            .write(self.config.address, &[Command::Reset.into()])
            .map_err(|source| SensorError::I2cError {
                operation: Operation::Reset,
                source,
            })
    }

    /// Releases the i2c handle and clock consuming the driver object.
    ///
    /// # Example
    ///
    /// ```
    /// // NOTE: Use real i2c instance for your app.
    /// use embedded_hal_mock::i2c::Mock as I2cMock;
    /// use ms5837_nb::{mock_utils::ManualClock, Config};
    /// let i2c = I2cMock::new(&[]);
    /// let pressure_sensor = ms5837_nb::new(i2c, ManualClock::new(0), Config::default());
    /// let (i2c, clock) = pressure_sensor.release();
    /// ```
    pub fn release(self) -> (I2C, C) {
        (self.i2c, self.clock)
    }

    /// Initialises the pressure sensor by reading the factory calibration data.
    ///
    /// # Errors
    /// Initialisation fails if any of the six calibration reads fails. The
    /// remaining reads are not attempted and the uninitialised driver is handed
    /// back inside the error so it can be retried or released.
    ///
    /// # Example
    ///
    /// ```rust
    /// // NOTE: Use real i2c instance for your app.
    /// # use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    /// # let i2c = I2cMock::new(&[
    /// #     I2cTransaction::write_read(0x76, vec![0xA2], vec![0x88, 0xA6]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA4], vec![0x8E, 0x00]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA6], vec![0x4F, 0x68]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA8], vec![0x57, 0x52]),
    /// #     I2cTransaction::write_read(0x76, vec![0xAA], vec![0x68, 0x16]),
    /// #     I2cTransaction::write_read(0x76, vec![0xAC], vec![0x66, 0x22]),
    /// # ]);
    /// use ms5837_nb::{mock_utils::ManualClock, Config};
    /// let pressure_sensor = ms5837_nb::new(i2c, ManualClock::new(0), Config::default());
    /// let pressure_sensor = pressure_sensor.init();
    /// assert!(pressure_sensor.is_ok());
    /// ```
    pub fn init(mut self) -> Result<Initialised<I2C, C>, InitError<I2C, C>> {
        match read_calibration_data(&mut self.i2c, self.config.address) {
            Ok(calibration_data) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("ms5837: calibration {}", calibration_data);
                Ok(Initialised {
                    i2c: self.i2c,
                    clock: self.clock,
                    config: self.config,
                    calibration_data,
                    state: ConversionState::Idle,
                    issued_at: 0,
                    raw: RawSample::default(),
                    latest: None,
                })
            }
            Err(error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("ms5837: {}", error.operation());
                Err(InitError {
                    error,
                    driver: self,
                })
            }
        }
    }
}

/// A failed initialisation, holding the driver that is still uninitialised.
pub struct InitError<I2C: I2cMarker, C: Clock> {
    pub error: SensorError<BusError<I2C>>,
    pub driver: Uninitialised<I2C, C>,
}

impl<I2C: I2cMarker, C: Clock> fmt::Debug for InitError<I2C, C>
where
    BusError<I2C>: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// The phase of the conversion cycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConversionState {
    /// No conversion in flight, the next poll starts a pressure conversion.
    Idle,
    AwaitingPressure,
    AwaitingTemperature,
}

/// What a single [`Initialised::poll`] reports.
#[derive(Debug, PartialEq)]
pub struct PollResult<E> {
    /// The most recent compensated reading. This can be from an earlier cycle
    /// while a new one is in flight. It is `None` until the first cycle
    /// completes, and on a poll that failed to start a new cycle.
    pub reading: Option<TemperaturePressure>,
    /// A bus failure during this poll. The failed step is retried on the next
    /// poll.
    pub fault: Option<SensorError<E>>,
}

impl<E> PollResult<E> {
    pub fn is_valid(&self) -> bool {
        self.reading.is_some()
    }

    /// Degrees C.
    pub fn temperature(&self) -> Option<f32> {
        self.reading.map(|reading| reading.temperature)
    }

    /// mbar.
    pub fn pressure(&self) -> Option<f32> {
        self.reading.map(|reading| reading.pressure)
    }
}

/// An initialised ms5837 object.
pub struct Initialised<I2C: I2cMarker, C: Clock> {
    i2c: I2C,
    clock: C,
    config: Config,
    calibration_data: FactoryCalibrationData,
    state: ConversionState,
    /// When the in-flight conversion command was issued.
    issued_at: u64,
    raw: RawSample,
    latest: Option<TemperaturePressure>,
}

impl<I2C: I2cMarker, C: Clock> State for Initialised<I2C, C> {}
impl<I2C: I2cMarker, C: Clock> sealed::Sealed for Initialised<I2C, C> {}

impl<I2C: I2cMarker, C: Clock> Initialised<I2C, C> {
    /// Release the i2c handle and clock consuming the driver.
    pub fn release(self) -> (I2C, C) {
        (self.i2c, self.clock)
    }

    pub fn calibration_data(&self) -> &FactoryCalibrationData {
        &self.calibration_data
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    /// The last completed reading, if any.
    pub fn latest(&self) -> Option<TemperaturePressure> {
        self.latest
    }

    /// Re-reads the factory calibration data.
    ///
    /// On success the calibration is replaced, any in-flight conversion is
    /// abandoned and the last reading is kept. On failure the driver goes back
    /// to being uninitialised.
    pub fn recalibrate(mut self) -> Result<Self, InitError<I2C, C>> {
        match read_calibration_data(&mut self.i2c, self.config.address) {
            Ok(calibration_data) => {
                self.calibration_data = calibration_data;
                self.enter(ConversionState::Idle);
                Ok(self)
            }
            Err(error) => Err(InitError {
                error,
                driver: Uninitialised {
                    i2c: self.i2c,
                    clock: self.clock,
                    config: self.config,
                },
            }),
        }
    }

    /// Advances the conversion cycle by at most one step and reports the latest
    /// reading.
    ///
    /// Bus failures are never fatal: the failing step is retried on the next
    /// poll and the failure is reported in [`PollResult::fault`].
    ///
    /// # Example
    ///
    /// ```rust
    /// # use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    /// # let i2c = I2cMock::new(&[
    /// #     I2cTransaction::write_read(0x76, vec![0xA2], vec![0x88, 0xA6]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA4], vec![0x8E, 0x00]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA6], vec![0x4F, 0x68]),
    /// #     I2cTransaction::write_read(0x76, vec![0xA8], vec![0x57, 0x52]),
    /// #     I2cTransaction::write_read(0x76, vec![0xAA], vec![0x68, 0x16]),
    /// #     I2cTransaction::write_read(0x76, vec![0xAC], vec![0x66, 0x22]),
    /// #     I2cTransaction::write(0x76, vec![0x48]),
    /// # ]);
    /// use ms5837_nb::{mock_utils::ManualClock, Config, ConversionState};
    /// let clock = ManualClock::new(0);
    /// let mut pressure_sensor = ms5837_nb::new(i2c, &clock, Config::default())
    ///     .init()
    ///     .unwrap();
    /// let result = pressure_sensor.poll();
    /// // The pressure conversion has started but nothing has been read yet.
    /// assert!(!result.is_valid());
    /// assert_eq!(pressure_sensor.state(), ConversionState::AwaitingPressure);
    /// # let (mut i2c, _) = pressure_sensor.release();
    /// # i2c.done();
    /// ```
    pub fn poll(&mut self) -> PollResult<BusError<I2C>> {
        if self.state == ConversionState::Idle {
            let command = Command::ConvertD1(self.config.over_sampling_ratio);
            if let Err(fault) = self.start_conversion(
                command,
                Operation::StartPressureConversion,
                ConversionState::AwaitingPressure,
            ) {
                Self::log_fault(&fault);
                return PollResult {
                    reading: None,
                    fault: Some(fault),
                };
            }
        }

        let fault = self.step().err();
        if let Some(fault) = &fault {
            Self::log_fault(fault);
        }
        PollResult {
            reading: self.latest,
            fault,
        }
    }

    fn step(&mut self) -> Result<(), SensorError<BusError<I2C>>> {
        match self.state {
            ConversionState::Idle => {}
            ConversionState::AwaitingPressure => {
                if !self.has_settled() {
                    return Ok(());
                }
                self.raw.pressure = self.read_adc(Operation::ReadPressure)?;
                let command = Command::ConvertD2(self.config.over_sampling_ratio);
                self.start_conversion(
                    command,
                    Operation::StartTemperatureConversion,
                    ConversionState::AwaitingTemperature,
                )?;
            }
            ConversionState::AwaitingTemperature => {
                if !self.has_settled() {
                    return Ok(());
                }
                self.raw.temperature = self.read_adc(Operation::ReadTemperature)?;
                let reading = compensate(&self.calibration_data, self.raw);
                #[cfg(feature = "defmt")]
                defmt::trace!("ms5837: {} from {}", reading, self.raw);
                self.latest = Some(reading);
                self.enter(ConversionState::Idle);
            }
        }
        Ok(())
    }

    fn has_settled(&self) -> bool {
        let elapsed = self.clock.now_us().wrapping_sub(self.issued_at);
        elapsed >= u64::from(self.config.effective_settling_time_us())
    }

    fn start_conversion(
        &mut self,
        command: Command,
        operation: Operation,
        next: ConversionState,
    ) -> Result<(), SensorError<BusError<I2C>>> {
        self.i2c
            .write(self.config.address, &[command.into()])
            .map_err(|source| SensorError::I2cError { operation, source })?;
        self.issued_at = self.clock.now_us();
        self.enter(next);
        Ok(())
    }

    fn read_adc(&mut self, operation: Operation) -> Result<u32, SensorError<BusError<I2C>>> {
        let mut buffer = [0u8; 4];
        self.i2c
            .write_read(
                self.config.address,
                &[Command::AdcRead.into()],
                // ADC is 24bit but we are storing in u32.
                &mut buffer[1..],
            )
            .map_err(|source| SensorError::I2cError { operation, source })?;
        Ok(u32::from_be_bytes(buffer))
    }

    fn enter(&mut self, next: ConversionState) {
        #[cfg(feature = "defmt")]
        defmt::debug!("ms5837: {} -> {}", self.state, next);
        self.state = next;
    }

    #[allow(unused_variables)]
    fn log_fault(fault: &SensorError<BusError<I2C>>) {
        #[cfg(feature = "defmt")]
        defmt::warn!("ms5837: {}", fault.operation());
    }
}
