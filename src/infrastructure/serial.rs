//! Output transport
//!
//! Opens the configured serial port, or stdout when the port is "-".

use crate::domain::settings::SerialSettings;
use anyhow::{bail, Context, Result};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::io::Write;
use std::time::Duration;
use tracing::info;

pub const STDOUT_PORT: &str = "-";

pub fn open_transport(settings: &SerialSettings) -> Result<Box<dyn Write + Send>> {
    if settings.port == STDOUT_PORT {
        info!("Publishing to stdout");
        return Ok(Box::new(std::io::stdout()));
    }

    let port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(data_bits(settings.data_bits)?)
        .parity(parity(&settings.parity)?)
        .stop_bits(stop_bits(settings.stop_bits)?)
        .flow_control(flow_control(&settings.flow_control)?)
        .timeout(Duration::from_millis(settings.write_timeout_ms))
        .open()
        .with_context(|| format!("Failed to open serial port {}", settings.port))?;

    info!(
        "Publishing to {} at {} baud ({}{}{}, flow control {})",
        settings.port,
        settings.baud_rate,
        settings.data_bits,
        settings.parity.chars().next().unwrap_or('n').to_ascii_uppercase(),
        settings.stop_bits,
        settings.flow_control
    );
    Ok(Box::new(port))
}

fn data_bits(bits: u8) -> Result<DataBits> {
    Ok(match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => bail!("Unsupported data bits: {}", other),
    })
}

fn parity(name: &str) -> Result<Parity> {
    Ok(match name.to_lowercase().as_str() {
        "none" => Parity::None,
        "odd" => Parity::Odd,
        "even" => Parity::Even,
        other => bail!("Unsupported parity: {}", other),
    })
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    Ok(match bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => bail!("Unsupported stop bits: {}", other),
    })
}

fn flow_control(name: &str) -> Result<FlowControl> {
    Ok(match name.to_lowercase().as_str() {
        "none" => FlowControl::None,
        "software" => FlowControl::Software,
        "hardware" => FlowControl::Hardware,
        other => bail!("Unsupported flow control: {}", other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_line_settings() {
        let s = SerialSettings::default();
        assert_eq!(data_bits(s.data_bits).unwrap(), DataBits::Eight);
        assert_eq!(parity(&s.parity).unwrap(), Parity::None);
        assert_eq!(stop_bits(s.stop_bits).unwrap(), StopBits::One);
        assert_eq!(flow_control(&s.flow_control).unwrap(), FlowControl::Hardware);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(data_bits(9).is_err());
        assert!(parity("mark").is_err());
        assert!(stop_bits(3).is_err());
        assert!(flow_control("xon").is_err());
    }

    #[test]
    fn dash_selects_stdout() {
        let settings = SerialSettings {
            port: STDOUT_PORT.to_string(),
            ..Default::default()
        };
        assert!(open_transport(&settings).is_ok());
    }
}
