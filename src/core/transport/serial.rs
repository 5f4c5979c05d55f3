//! Serial port transport implementation

use super::{ConnectionError, Link, TransportError, TransportTrait, TransportType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

/// Line settings passed to `open`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOptions {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialOptions {
    /// 8N1 at the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Short frame description, e.g. `8N1`
    pub fn frame(&self) -> String {
        format!(
            "{}{}{}",
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits
        )
    }

    fn validate(&self) -> Result<(), ConnectionError> {
        if self.baud_rate == 0 {
            return Err(ConnectionError::Unsupported("baud rate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConnectionError::Unsupported(format!("{} data bits", self.data_bits)));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConnectionError::Unsupported(format!("{} stop bits", self.stop_bits)));
        }
        Ok(())
    }
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self::new(115200)
    }
}

/// Serial port transport
pub struct SerialTransport {
    port: String,
    options: Option<SerialOptions>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            options: None,
        }
    }

    fn map_open_error(&self, e: tokio_serial::Error) -> ConnectionError {
        let port = self.port.clone();
        match e.kind() {
            tokio_serial::ErrorKind::NoDevice => ConnectionError::NotFound(port),
            tokio_serial::ErrorKind::InvalidInput => {
                ConnectionError::Unsupported(format!("{port}: {}", e.description))
            }
            tokio_serial::ErrorKind::Io(io_kind) => match io_kind {
                std::io::ErrorKind::PermissionDenied => ConnectionError::Denied(port),
                std::io::ErrorKind::NotFound => ConnectionError::NotFound(port),
                _ if e.description.to_lowercase().contains("busy") => ConnectionError::Busy(port),
                _ => ConnectionError::Failed(e.to_string()),
            },
            _ => ConnectionError::Failed(e.to_string()),
        }
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn open(&mut self, options: &SerialOptions) -> Result<Link, ConnectionError> {
        options.validate()?;

        let data_bits = match options.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match options.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match options.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match options.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let stream = tokio_serial::new(&self.port, options.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .open_native_async()
            .map_err(|e| self.map_open_error(e))?;

        tracing::info!(port = %self.port, baud = options.baud_rate, frame = %options.frame(), "serial port opened");
        self.options = Some(options.clone());

        let (reader, writer) = tokio::io::split(stream);
        Ok(Link {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.options.take().is_some() {
            tracing::info!(port = %self.port, "serial port closed");
        }
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        match &self.options {
            Some(options) => format!(
                "{} @ {} baud ({} {})",
                self.port,
                options.baud_rate,
                options.frame(),
                match options.flow_control {
                    SerialFlowControl::None => "No FC",
                    SerialFlowControl::Hardware => "HW FC",
                    SerialFlowControl::Software => "SW FC",
                }
            ),
            None => self.port.clone(),
        }
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::Io(e.into()))
}
