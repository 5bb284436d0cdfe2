//! Expedited SDO message codec
//!
//! The fleet master only ever moves 1 to 4 bytes per SDO access, so only the expedited transfer
//! subset of the protocol is modelled. Every SDO frame is 8 bytes:
//!
//! | byte | content |
//! |------|---------|
//! | 0    | command specifier |
//! | 1-2  | object index, little endian |
//! | 3    | sub index |
//! | 4-7  | data |

use snafu::Snafu;

/// Client command specifier for an expedited download (bits 5-7 of byte 0)
const CCS_DOWNLOAD: u8 = 1;
/// Client command specifier for an upload request
const CCS_UPLOAD: u8 = 2;
/// Server command specifier for an upload response
const SCS_UPLOAD: u8 = 2;
/// Server command specifier for a download confirmation
const SCS_DOWNLOAD: u8 = 3;
/// Command specifier for an abort, shared by client and server
const CS_ABORT: u8 = 4;

/// Error decoding an SDO frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum SdoDecodeError {
    /// The frame did not contain the 8 bytes every SDO frame carries
    #[snafu(display("SDO frame too short: {len} bytes"))]
    TooShort {
        /// Number of bytes received
        len: usize,
    },
    /// The command byte is not one this codec understands
    #[snafu(display("Unrecognized SDO command byte 0x{command:02X}"))]
    UnknownCommand {
        /// The offending command byte
        command: u8,
    },
}

/// Standard SDO abort codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit not alternated
    ToggleNotAlternated = 0x0503_0000,
    /// SDO protocol timed out
    SdoTimeout = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    InvalidCommandSpecifier = 0x0504_0001,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read a write only object
    WriteOnly = 0x0601_0001,
    /// Attempt to write a read only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the dictionary
    NoSuchObject = 0x0602_0000,
    /// Data type does not match, length of service parameter does not match
    DataTypeMismatch = 0x0607_0010,
    /// Sub-index does not exist
    NoSuchSubIndex = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application because of the device state
    CantStoreDeviceState = 0x0800_0022,
}

impl TryFrom<u32> for AbortCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use AbortCode::*;
        const KNOWN: [AbortCode; 12] = [
            ToggleNotAlternated,
            SdoTimeout,
            InvalidCommandSpecifier,
            UnsupportedAccess,
            WriteOnly,
            ReadOnly,
            NoSuchObject,
            DataTypeMismatch,
            NoSuchSubIndex,
            InvalidValue,
            GeneralError,
            CantStoreDeviceState,
        ];
        KNOWN
            .into_iter()
            .find(|code| *code as u32 == value)
            .ok_or(value)
    }
}

/// Up to 4 bytes of expedited SDO data
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SdoPayload {
    len: u8,
    bytes: [u8; 4],
}

impl SdoPayload {
    /// Create a payload from a slice. Bytes beyond the fourth are dropped.
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(4);
        let mut bytes = [0; 4];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }

    /// The valid bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True when no bytes are valid
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Interpret the payload as a little endian u32, zero extending short payloads
    pub fn to_u32(&self) -> u32 {
        u32::from_le_bytes(self.bytes_zero_padded())
    }

    /// Interpret the payload as a little endian u16
    ///
    /// Returns None if fewer than 2 bytes are valid
    pub fn to_u16(&self) -> Option<u16> {
        (self.len >= 2).then(|| u16::from_le_bytes([self.bytes[0], self.bytes[1]]))
    }

    /// Interpret the payload as a little endian i32
    ///
    /// Returns None unless exactly 4 bytes are valid
    pub fn to_i32(&self) -> Option<i32> {
        (self.len == 4).then(|| i32::from_le_bytes(self.bytes))
    }

    fn bytes_zero_padded(&self) -> [u8; 4] {
        let mut out = [0; 4];
        out[..self.len as usize].copy_from_slice(self.as_slice());
        out
    }
}

/// A request sent from the SDO client (the master) to a node's SDO server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoRequest {
    /// Request the value of a sub object
    InitiateUpload {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
    },
    /// Write up to 4 bytes to a sub object
    ExpeditedDownload {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
        /// Data to write
        data: SdoPayload,
    },
    /// Abort a transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
        /// Reason for the abort
        abort_code: u32,
    },
}

impl SdoRequest {
    /// Create an upload (read) request
    pub fn initiate_upload(index: u16, sub: u8) -> Self {
        SdoRequest::InitiateUpload { index, sub }
    }

    /// Create an expedited download (write) request
    pub fn expedited_download(index: u16, sub: u8, data: &[u8]) -> Self {
        SdoRequest::ExpeditedDownload {
            index,
            sub,
            data: SdoPayload::new(data),
        }
    }

    /// Create an abort request
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        SdoRequest::Abort {
            index,
            sub,
            abort_code: abort_code as u32,
        }
    }

    /// The (index, sub) addressed by this request
    pub fn object(&self) -> (u16, u8) {
        match *self {
            SdoRequest::InitiateUpload { index, sub } => (index, sub),
            SdoRequest::ExpeditedDownload { index, sub, .. } => (index, sub),
            SdoRequest::Abort { index, sub, .. } => (index, sub),
        }
    }

    /// Encode the request into an 8 byte SDO frame payload
    pub fn to_bytes(&self) -> [u8; 8] {
        match *self {
            SdoRequest::InitiateUpload { index, sub } => {
                frame_bytes(CCS_UPLOAD << 5, index, sub, [0; 4])
            }
            SdoRequest::ExpeditedDownload { index, sub, data } => {
                // e = 1, and s = 1 with n unused bytes. The 2 bit n field cannot express an
                // empty payload, so that is sent with the size unspecified.
                let command = match data.len() as u8 {
                    0 => (CCS_DOWNLOAD << 5) | 0x2,
                    len => (CCS_DOWNLOAD << 5) | ((4 - len) << 2) | 0x3,
                };
                frame_bytes(command, index, sub, data.bytes_zero_padded())
            }
            SdoRequest::Abort {
                index,
                sub,
                abort_code,
            } => frame_bytes(CS_ABORT << 5, index, sub, abort_code.to_le_bytes()),
        }
    }
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = SdoDecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (command, index, sub, data) = split_frame(value)?;
        match command >> 5 {
            CCS_UPLOAD => Ok(SdoRequest::InitiateUpload { index, sub }),
            CCS_DOWNLOAD if command & 0x2 != 0 => {
                // Size indicated: n gives the number of unused bytes. Otherwise all 4 are used.
                let len = if command & 0x1 != 0 {
                    4 - ((command >> 2) & 0x3) as usize
                } else {
                    4
                };
                Ok(SdoRequest::ExpeditedDownload {
                    index,
                    sub,
                    data: SdoPayload::new(&data[..len]),
                })
            }
            CS_ABORT => Ok(SdoRequest::Abort {
                index,
                sub,
                abort_code: u32::from_le_bytes(data),
            }),
            _ => UnknownCommandSnafu { command }.fail(),
        }
    }
}

/// A response sent from a node's SDO server back to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoResponse {
    /// Expedited upload response carrying the object value
    ConfirmUpload {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
        /// Object value
        data: SdoPayload,
    },
    /// Confirms a download completed
    ConfirmDownload {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
    },
    /// The server aborted the access
    Abort {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
        /// Reason for the abort
        abort_code: u32,
    },
}

impl SdoResponse {
    /// Create an expedited upload response
    pub fn upload(index: u16, sub: u8, data: &[u8]) -> Self {
        SdoResponse::ConfirmUpload {
            index,
            sub,
            data: SdoPayload::new(data),
        }
    }

    /// Create a download confirmation
    pub fn download_confirmed(index: u16, sub: u8) -> Self {
        SdoResponse::ConfirmDownload { index, sub }
    }

    /// Create an abort response
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        SdoResponse::Abort {
            index,
            sub,
            abort_code: abort_code as u32,
        }
    }

    /// The (index, sub) this response refers to
    pub fn object(&self) -> (u16, u8) {
        match *self {
            SdoResponse::ConfirmUpload { index, sub, .. } => (index, sub),
            SdoResponse::ConfirmDownload { index, sub } => (index, sub),
            SdoResponse::Abort { index, sub, .. } => (index, sub),
        }
    }

    /// Encode the response into an 8 byte SDO frame payload
    pub fn to_bytes(&self) -> [u8; 8] {
        match *self {
            SdoResponse::ConfirmUpload { index, sub, data } => {
                let n = 4 - data.len() as u8;
                let command = (SCS_UPLOAD << 5) | (n << 2) | 0x3;
                frame_bytes(command, index, sub, data.bytes_zero_padded())
            }
            SdoResponse::ConfirmDownload { index, sub } => {
                frame_bytes(SCS_DOWNLOAD << 5, index, sub, [0; 4])
            }
            SdoResponse::Abort {
                index,
                sub,
                abort_code,
            } => frame_bytes(CS_ABORT << 5, index, sub, abort_code.to_le_bytes()),
        }
    }
}

impl TryFrom<&[u8]> for SdoResponse {
    type Error = SdoDecodeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (command, index, sub, data) = split_frame(value)?;
        match command >> 5 {
            // Only expedited upload responses are accepted; segmented transfers are never
            // requested by this master.
            SCS_UPLOAD if command & 0x2 != 0 => {
                let len = if command & 0x1 != 0 {
                    4 - ((command >> 2) & 0x3) as usize
                } else {
                    4
                };
                Ok(SdoResponse::ConfirmUpload {
                    index,
                    sub,
                    data: SdoPayload::new(&data[..len]),
                })
            }
            SCS_DOWNLOAD => Ok(SdoResponse::ConfirmDownload { index, sub }),
            CS_ABORT => Ok(SdoResponse::Abort {
                index,
                sub,
                abort_code: u32::from_le_bytes(data),
            }),
            _ => UnknownCommandSnafu { command }.fail(),
        }
    }
}

fn frame_bytes(command: u8, index: u16, sub: u8, data: [u8; 4]) -> [u8; 8] {
    let index = index.to_le_bytes();
    [
        command, index[0], index[1], sub, data[0], data[1], data[2], data[3],
    ]
}

fn split_frame(value: &[u8]) -> Result<(u8, u16, u8, [u8; 4]), SdoDecodeError> {
    if value.len() < 8 {
        return TooShortSnafu { len: value.len() }.fail();
    }
    let index = u16::from_le_bytes([value[1], value[2]]);
    let data = [value[4], value[5], value[6], value[7]];
    Ok((value[0], index, value[3], data))
}
