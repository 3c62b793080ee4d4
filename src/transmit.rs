// src/transmit.rs - Sending the chosen command to the pump over IR serial.
use crate::command::Command;
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("Serial error: {0}")]
    Serial(#[from] std::io::Error),
}

/// Pushes a command to the physical pump. Failures are reported but must
/// never abort the control cycle.
#[async_trait]
pub trait CommandTransmitter: Send + Sync {
    async fn send(&mut self, command: Command, extra_info: &[String]) -> Result<(), TransmitError>;
}

/// Writes the command token to the IR blaster's serial port.
pub struct SerialTransmitter {
    port: SerialPort,
}

impl SerialTransmitter {
    pub fn open(device: &str, baud: u32) -> Result<Self, TransmitError> {
        tracing::info!("Opening IR transmitter: {} at {} baud", device, baud);
        let port = SerialPort::open(device, baud)?;
        Ok(Self { port })
    }
}

#[async_trait]
impl CommandTransmitter for SerialTransmitter {
    async fn send(&mut self, command: Command, extra_info: &[String]) -> Result<(), TransmitError> {
        tracing::info!("IR <- {}", command);
        for line in extra_info {
            tracing::debug!("IR context: {}", line);
        }
        let frame = format!("{}\n", command.token());
        self.port.write_all(frame.as_bytes()).await?;
        Ok(())
    }
}
