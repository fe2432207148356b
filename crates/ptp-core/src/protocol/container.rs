//! USB container framing.
//!
//! ```text
//! u32 length | u16 type | u16 code | u32 transaction_id | payload...
//! ```

use std::fmt;

use crate::cursor::PtpCursor;
use crate::error::{PtpError, Result};
use crate::protocol::codes;

/// Size of the fixed container header.
pub const HEADER_LEN: usize = 12;

/// Maximum number of parameters a Command or Response may carry.
pub const MAX_PARAMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

impl ContainerType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Command),
            2 => Some(Self::Data),
            3 => Some(Self::Response),
            4 => Some(Self::Event),
            _ => None,
        }
    }

    /// Whether the payload is a parameter list rather than opaque bytes.
    pub fn carries_params(self) -> bool {
        self != Self::Data
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerType::Command => write!(f, "Command"),
            ContainerType::Data => write!(f, "Data"),
            ContainerType::Response => write!(f, "Response"),
            ContainerType::Event => write!(f, "Event"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerType,
    pub code: u16,
    pub transaction_id: u32,
    pub payload: Vec<u8>,
}

impl Container {
    fn with_params(kind: ContainerType, code: u16, transaction_id: u32, params: &[u32]) -> Self {
        let mut c = PtpCursor::with_capacity(params.len() * 4);
        for &p in params {
            c.write_u32(p);
        }
        Self {
            kind,
            code,
            transaction_id,
            payload: c.finalize(),
        }
    }

    pub fn command(code: u16, transaction_id: u32, params: &[u32]) -> Self {
        Self::with_params(ContainerType::Command, code, transaction_id, params)
    }

    pub fn data(code: u16, transaction_id: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: ContainerType::Data,
            code,
            transaction_id,
            payload,
        }
    }

    pub fn response(code: u16, transaction_id: u32, params: &[u32]) -> Self {
        Self::with_params(ContainerType::Response, code, transaction_id, params)
    }

    pub fn event(code: u16, transaction_id: u32, params: &[u32]) -> Self {
        Self::with_params(ContainerType::Event, code, transaction_id, params)
    }

    /// Total length on the wire, header included.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut c = PtpCursor::with_capacity(self.len());
        c.write_u32(self.len() as u32);
        c.write_u16(self.kind as u16);
        c.write_u16(self.code);
        c.write_u32(self.transaction_id);
        c.write_bytes(&self.payload);
        c.finalize()
    }

    /// Declared total length from a (possibly partial) container.
    pub fn declared_len(bytes: &[u8]) -> Result<usize> {
        let mut c = PtpCursor::from_bytes(bytes.get(..4).unwrap_or(bytes));
        Ok(c.read_u32()? as usize)
    }

    /// Decode one complete container. Bytes past the declared length are
    /// ignored; a declared length shorter than the header or longer than
    /// the input is rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut c = PtpCursor::from_bytes(bytes);
        let length = c.read_u32()? as usize;
        let raw_kind = c.read_u16()?;
        let code = c.read_u16()?;
        let transaction_id = c.read_u32()?;

        if length < HEADER_LEN {
            return Err(PtpError::ProtocolViolation(format!(
                "container length {} shorter than header",
                length
            )));
        }
        let kind = ContainerType::from_u16(raw_kind).ok_or_else(|| {
            PtpError::ProtocolViolation(format!("unknown container type {}", raw_kind))
        })?;
        let payload = c.read_bytes(length - HEADER_LEN)?;

        Ok(Self {
            kind,
            code,
            transaction_id,
            payload,
        })
    }

    /// Decode the payload as a u32 parameter list.
    pub fn params(&self) -> Result<Vec<u32>> {
        if self.payload.len() % 4 != 0 {
            return Err(PtpError::ProtocolViolation(format!(
                "{} payload of {} bytes is not a parameter list",
                self.kind,
                self.payload.len()
            )));
        }
        let mut c = PtpCursor::from_bytes(self.payload.as_slice());
        (0..self.payload.len() / 4).map(|_| c.read_u32()).collect()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} tid={} len={})",
            self.kind,
            codes::describe(self.code),
            self.transaction_id,
            self.len()
        )
    }
}
