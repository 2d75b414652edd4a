use crate::domain::error::BridgeError;
use crate::infrastructure::serial::PortSummary;
use std::io::{self, Write};
use tabled::{Table, Tabled};

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

#[derive(Tabled)]
struct PortTableRow {
    #[tabled(rename = "Port")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
}

impl From<&PortSummary> for PortTableRow {
    fn from(port: &PortSummary) -> Self {
        Self {
            name: port.name.clone(),
            kind: port.kind.clone(),
        }
    }
}

/// Console output writer
pub struct ConsoleWriter<W: Write> {
    out: W,
}

impl ConsoleWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_ports(&mut self, ports: &[PortSummary]) -> Result<(), OutputError> {
        if ports.is_empty() {
            return self.write_message("No serial ports found");
        }

        let rows: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
        writeln!(self.out, "{}", Table::new(rows))?;
        Ok(())
    }

    pub fn write_message(&mut self, message: &str) -> Result<(), OutputError> {
        writeln!(self.out, "{}", message)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
