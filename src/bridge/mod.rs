//! Line-oriented text bridge to a web front-end
//!
//! Each line is one command with fields separated by `/`. Only `GET/RADIATORS`
//! produces a reply: the radiator table as one JSON line.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::core::{Error, Result};
use crate::radiator::{RadiatorManager, MAX_TEMPERATURE, MIN_TEMPERATURE};

/// Network details reported by the web front-end
#[derive(Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub ip: String,
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for LinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkInfo")
            .field("ip", &self.ip)
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed bridge command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ALL/T/<temp>` or `ALL/T<temp>`
    SetAll(u8),
    /// `SET/TEMP/<index>/<temp>`
    Set { index: usize, temperature: u8 },
    /// `GET/RADIATORS`
    GetRadiators,
    /// `INFO/<ip>/<ssid>/<password>`
    Info(LinkInfo),
}

/// Parses a temperature field and clamps it into the radiator range
fn parse_temperature(field: &str) -> Result<u8> {
    let value: i64 = field
        .trim()
        .parse()
        .map_err(|_| Error::command(format!("'{}' is not a temperature", field)))?;
    Ok(value.clamp(MIN_TEMPERATURE as i64, MAX_TEMPERATURE as i64) as u8)
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split('/').collect();
        match parts.as_slice() {
            ["ALL", "T", temp, ..] => Ok(Command::SetAll(parse_temperature(temp)?)),
            ["ALL", compact] if compact.len() > 1 && compact.starts_with('T') => {
                Ok(Command::SetAll(parse_temperature(&compact[1..])?))
            }
            ["SET", "TEMP", index, temp, ..] => {
                let index = index
                    .parse()
                    .map_err(|_| Error::command(format!("'{}' is not a radiator index", index)))?;
                Ok(Command::Set {
                    index,
                    temperature: parse_temperature(temp)?,
                })
            }
            ["GET", "RADIATORS", ..] => Ok(Command::GetRadiators),
            ["INFO", ip, ssid, password, ..] => Ok(Command::Info(LinkInfo {
                ip: ip.to_string(),
                ssid: ssid.to_string(),
                password: password.to_string(),
            })),
            _ => Err(Error::command(format!("unrecognised command '{}'", parts[0]))),
        }
    }
}

/// Serial bridge in front of a radiator manager
pub struct SerialBridge {
    manager: Arc<RadiatorManager>,
    link_info: Mutex<Option<LinkInfo>>,
}

impl SerialBridge {
    /// Creates a bridge driving `manager`
    pub fn new(manager: Arc<RadiatorManager>) -> Self {
        SerialBridge {
            manager,
            link_info: Mutex::new(None),
        }
    }

    /// Last network details reported with `INFO`
    pub fn link_info(&self) -> Option<LinkInfo> {
        self.link_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Executes one command; returns the reply line, if the command has one
    pub fn execute(&self, command: Command) -> Result<Option<String>> {
        match command {
            Command::SetAll(temperature) => {
                let sent = self.manager.set_target_all(temperature);
                info!("Setting all radiators to {}°C ({} commands sent)", temperature, sent);
                Ok(None)
            }
            Command::Set { index, temperature } => {
                info!("Setting temperature of [{}]: {}°C", index, temperature);
                self.manager.set_target(index, temperature)?;
                Ok(None)
            }
            Command::GetRadiators => {
                debug!("Sending radiators JSON");
                Ok(Some(serde_json::to_string(&self.manager.radiators())?))
            }
            Command::Info(info) => {
                info!("Front-end at {} on '{}'", info.ip, info.ssid);
                *self.link_info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
                Ok(None)
            }
        }
    }

    /// Parses and executes one line
    pub fn handle_line(&self, line: &str) -> Result<Option<String>> {
        let command: Command = line.parse()?;
        self.execute(command)
    }

    /// Serves commands from `reader` until it is exhausted, writing replies to
    /// `writer`. Bad lines are logged and skipped.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match self.handle_line(&line) {
                Ok(Some(reply)) => {
                    writer.write_all(reply.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring bridge line: {}", e),
            }
        }
        Ok(())
    }
}
