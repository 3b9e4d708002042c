use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

pub const BAUD_RATE: u32 = 115_200;
pub const PARITY: Parity = Parity::None;
pub const DATA_BITS: DataBits = DataBits::Eight;
pub const STOP_BITS: StopBits = StopBits::One;
pub const FLOW_CONTROL: FlowControl = FlowControl::None;

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const STOP_COMMAND: &[u8] = b"STP\r\n";
pub const START_COMMAND: &[u8] = b"STA\r\n";

pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
pub const RESTART_DELAY: Duration = Duration::from_millis(500);
pub const SHUTDOWN_DELAY: Duration = Duration::from_millis(500);

/// UD-CO2S sensor attached over USB serial.
#[derive(Debug)]
pub struct UDCO2S<P> {
    port: P,
}

impl UDCO2S<Box<dyn SerialPort>> {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let path = path
            .to_str()
            .with_context(|| format!("Device path {} is not valid UTF-8", path.display()))?;

        let port = serialport::new(path, BAUD_RATE)
            .parity(PARITY)
            .data_bits(DATA_BITS)
            .stop_bits(STOP_BITS)
            .flow_control(FLOW_CONTROL)
            .timeout(POLL_INTERVAL)
            .open()
            .with_context(|| format!("Failed to open serial port {path}"))?;

        Ok(Self::new(port))
    }
}

impl<P: Read + Write> UDCO2S<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn start(&mut self) -> Result<(), anyhow::Error> {
        // A previous run may have left the device logging.
        thread::sleep(SETTLE_DELAY);
        self.send(STOP_COMMAND)
            .context("Failed to write stop command to serial port")?;

        thread::sleep(RESTART_DELAY);
        self.send(START_COMMAND)
            .context("Failed to write start command to serial port")?;

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), anyhow::Error> {
        let sent = self.send(STOP_COMMAND);
        thread::sleep(SHUTDOWN_DELAY);
        sent.context("Failed to write stop command to serial port")?;

        Ok(())
    }

    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        self.port.write_all(command)?;
        self.port.flush()
    }
}

impl<P: Read> Read for UDCO2S<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}
