use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use line_reader::LineReader;
use log::LevelFilter;
use measurement::Measurement;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use ud_co2s::UDCO2S;

mod device;
mod line_reader;
mod measurement;
mod presenter;
mod ud_co2s;

#[tokio::main]
async fn main() -> Result<ExitCode, anyhow::Error> {
    TermLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run().await {
        log::error!("{e:#}");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

pub async fn run() -> Result<(), anyhow::Error> {
    let path = device::locate(device::DEVICE_DIR)?.with_context(|| {
        format!(
            "No device matching {}* found in {}",
            device::DEVICE_PREFIX,
            device::DEVICE_DIR
        )
    })?;
    log::info!("Found device {}", path.display());

    let mut udco2s = UDCO2S::open(&path).context("Failed to initialize UD-CO2S")?;
    let mut shutdown = ShutdownSignal::install()?;
    udco2s.start().context("Failed to start measurement")?;
    log::info!("Measurement started");

    let cancel = Arc::new(AtomicBool::new(false));
    let mut worker = tokio::task::spawn_blocking({
        let cancel = Arc::clone(&cancel);
        move || {
            let mut reader = LineReader::new(udco2s);
            stream(&mut reader, &mut io::stdout(), &cancel)?;
            Ok::<_, anyhow::Error>(reader.into_inner())
        }
    });

    let mut udco2s = tokio::select! {
        joined = &mut worker => joined.context("Read loop panicked")??,
        () = shutdown.recv() => {
            cancel.store(true, Ordering::SeqCst);
            log::info!("Shutdown signal received. Sending stop command...");
            worker.await.context("Read loop panicked")??
        }
    };

    udco2s.stop().context("Failed to stop measurement")?;
    drop(udco2s);
    log::info!("Serial port closed");

    Ok(())
}

fn stream<R: Read, W: Write>(
    reader: &mut LineReader<R>,
    out: &mut W,
    cancel: &AtomicBool,
) -> Result<(), anyhow::Error> {
    while !cancel.load(Ordering::SeqCst) {
        let Some(line) = reader
            .read_line()
            .context("Failed to read from serial port")?
        else {
            continue;
        };

        let measurement = match line.parse::<Measurement>() {
            Ok(measurement) => measurement,
            Err(e) => {
                log::error!("Failed to parse sensor data ({}): {e}", e.stage());
                continue;
            }
        };

        presenter::present(out, &measurement).context("Failed to write to stdout")?;
    }

    Ok(())
}

/// SIGINT/SIGTERM listeners. Signals delivered after `install` are kept
/// until `recv` is polled.
#[cfg(unix)]
struct ShutdownSignal {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn install() -> Result<Self, anyhow::Error> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())
                .context("Failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => (),
            _ = self.terminate.recv() => (),
        }
    }
}

#[cfg(windows)]
struct ShutdownSignal {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignal {
    fn install() -> Result<Self, anyhow::Error> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()
                .context("Failed to install Ctrl+C handler")?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, ErrorKind};

    fn run_stream(input: &[u8]) -> (String, anyhow::Error) {
        let mut reader = LineReader::new(Cursor::new(input.to_vec()));
        let mut out = Vec::new();
        let err = stream(&mut reader, &mut out, &AtomicBool::new(false)).unwrap_err();
        (String::from_utf8(out).unwrap(), err)
    }

    #[test]
    fn test_stream_end_to_end() {
        let (out, err) = run_stream(b"CO2=415,HUM=55.2,TMP=24.0\r\nECHO=STA\r\n...garbage...");

        assert_eq!(
            out,
            "{\n  \"co2\": 415,\n  \"hum\": 55.2,\n  \"temp\": 24.0\n}\n"
        );
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_stream_skips_malformed_lines() {
        let (out, _) = run_stream(
            b"CO2=abc,HUM=55.2,TMP=24.0\r\nCO2=415,HUM=55.2\r\nCO2=1=2\r\nCO2=412,HUM=45.3,TMP=23.1\r\n",
        );

        assert_eq!(out.matches("\"co2\"").count(), 1);
        assert!(out.contains("\"co2\": 412"));
    }

    #[test]
    fn test_stream_stops_when_cancelled() {
        struct Unreachable;

        impl Read for Unreachable {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                panic!("read after cancellation");
            }
        }

        let mut reader = LineReader::new(Unreachable);
        let mut out = Vec::new();
        stream(&mut reader, &mut out, &AtomicBool::new(true)).unwrap();
        assert!(out.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_signal_received_before_recv() {
        let mut shutdown = ShutdownSignal::install().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        shutdown.recv().await;
    }

    #[test]
    fn test_stream_fails_on_write_error() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut reader = LineReader::new(Cursor::new(b"CO2=415,HUM=55.2,TMP=24.0\r\n".to_vec()));
        let err = stream(&mut reader, &mut Closed, &AtomicBool::new(false)).unwrap_err();
        assert!(err.to_string().contains("stdout"));
    }
}
