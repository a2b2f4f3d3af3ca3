//! Framed request/response protocol.
//!
//! Every integer is little-endian. A session's request channel carries
//! `[opcode: u8][session id: u32][fields]` frames; its response channel
//! carries the session id once, then one response per request:
//! `[status: i32]` followed, on success only, by the operation's payload.
//!
//! | Request | Fields |
//! |---------|--------|
//! | create  | event id `u32`, rows `u64`, cols `u64` |
//! | reserve | event id `u32`, count `u64`, rows `[u64; count]`, cols `[u64; count]` |
//! | show    | event id `u32` |
//! | list    | none |
//! | quit    | none, and no response |
//!
//! Registration uses a separate fixed-size setup record, see [`SetupRequest`].

use crate::error::{EngineError, Status};
use crate::types::{EventId, Seat, SeatGrid, SessionId};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum length, in bytes, of a channel path in a setup record
pub const MAX_CHANNEL_PATH: usize = 40;

/// Size of an encoded setup record: opcode plus two padded paths
pub const SETUP_RECORD_LEN: usize = 1 + 2 * MAX_CHANNEL_PATH;

/// Cells or ids preallocated before the payload has actually arrived
const PREALLOC_LIMIT: usize = 4096;

/// Errors raised while decoding or encoding frames.
///
/// Any of these terminates the session it occurred on; other sessions are
/// unaffected.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The first byte of a frame is not a known opcode
    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),

    /// A known opcode arrived where it is not allowed
    #[error("Unexpected opcode {0:?}")]
    UnexpectedOpcode(OpCode),

    /// The peer closed the channel in the middle of a frame
    #[error("Truncated frame")]
    Truncated,

    /// A reserve frame names more seats than the server accepts per frame
    #[error("Frame carries {count} seats, limit is {max}")]
    TooManySeats {
        /// Count announced by the frame
        count: u64,
        /// Accepted maximum
        max: usize,
    },

    /// A seat grid in a response has impossible dimensions
    #[error("Invalid grid dimensions {rows}x{cols}")]
    InvalidGrid {
        /// Announced rows
        rows: u64,
        /// Announced columns
        cols: u64,
    },

    /// A setup record path is too long, empty or not UTF-8
    #[error("Invalid channel path: {0}")]
    InvalidPath(String),

    /// The channel failed
    #[error("Channel I/O error: {0}")]
    Io(#[source] io::Error),
}

impl ProtocolError {
    /// Whether the channel was closed under us (broken pipe, reset).
    ///
    /// A frame cut short is [`ProtocolError::Truncated`] instead, which is
    /// a protocol violation rather than a disconnect.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            )
        )
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(e)
        }
    }
}

/// Frame opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Registration (setup record only)
    Setup = 1,
    /// End the session
    Quit = 2,
    /// Create an event
    Create = 3,
    /// Reserve seats
    Reserve = 4,
    /// Show an event's seat map
    Show = 5,
    /// List event ids
    List = 6,
}

impl OpCode {
    /// Short lowercase name, used as a metrics label
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Quit => "quit",
            Self::Create => "create",
            Self::Reserve => "reserve",
            Self::Show => "show",
            Self::List => "list",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(Self::Setup),
            2 => Ok(Self::Quit),
            3 => Ok(Self::Create),
            4 => Ok(Self::Reserve),
            5 => Ok(Self::Show),
            6 => Ok(Self::List),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

// ============================================================================
// Setup record
// ============================================================================

/// A client's registration: the paths of its request and response channels.
///
/// Encoded as `[1][request path][response path]`, each path NUL-padded to
/// [`MAX_CHANNEL_PATH`] bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupRequest {
    request_path: String,
    response_path: String,
}

impl SetupRequest {
    /// Validates both paths.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPath`] if a path is empty, longer than
    /// [`MAX_CHANNEL_PATH`] bytes, or contains a NUL byte.
    pub fn new(request_path: impl Into<String>, response_path: impl Into<String>) -> Result<Self, ProtocolError> {
        let request_path = request_path.into();
        let response_path = response_path.into();
        check_path(&request_path)?;
        check_path(&response_path)?;
        Ok(Self {
            request_path,
            response_path,
        })
    }

    /// Path of the client-to-server channel
    #[must_use]
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// Path of the server-to-client channel
    #[must_use]
    pub fn response_path(&self) -> &str {
        &self.response_path
    }

    /// Encodes the fixed-size record
    #[must_use]
    pub fn encode(&self) -> [u8; SETUP_RECORD_LEN] {
        let mut record = [0u8; SETUP_RECORD_LEN];
        record[0] = OpCode::Setup as u8;
        let request = self.request_path.as_bytes();
        let response = self.response_path.as_bytes();
        record[1..=request.len()].copy_from_slice(request);
        let offset = 1 + MAX_CHANNEL_PATH;
        record[offset..offset + response.len()].copy_from_slice(response);
        record
    }

    /// Decodes a fixed-size record.
    ///
    /// # Errors
    ///
    /// Fails on a wrong opcode or an invalid path.
    pub fn decode(record: &[u8; SETUP_RECORD_LEN]) -> Result<Self, ProtocolError> {
        let opcode = OpCode::try_from(record[0])?;
        if opcode != OpCode::Setup {
            return Err(ProtocolError::UnexpectedOpcode(opcode));
        }
        let request_path = unpad(&record[1..=MAX_CHANNEL_PATH])?;
        let response_path = unpad(&record[1 + MAX_CHANNEL_PATH..])?;
        Self::new(request_path, response_path)
    }

    /// Reads one record from the registration endpoint.
    ///
    /// # Errors
    ///
    /// Fails on a short read or an invalid record.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut record = [0u8; SETUP_RECORD_LEN];
        reader.read_exact(&mut record).await?;
        Self::decode(&record)
    }

    /// Writes the record in one call.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint cannot be written.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn check_path(path: &str) -> Result<(), ProtocolError> {
    if path.is_empty() {
        return Err(ProtocolError::InvalidPath("empty path".to_string()));
    }
    if path.len() > MAX_CHANNEL_PATH {
        return Err(ProtocolError::InvalidPath(format!(
            "{path} is longer than {MAX_CHANNEL_PATH} bytes"
        )));
    }
    if path.contains('\0') {
        return Err(ProtocolError::InvalidPath(format!("{path:?} contains NUL")));
    }
    Ok(())
}

fn unpad(field: &[u8]) -> Result<String, ProtocolError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8(field[..end].to_vec()).map_err(|e| ProtocolError::InvalidPath(e.to_string()))
}

// ============================================================================
// Requests
// ============================================================================

/// A decoded session request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// End the session; no response follows
    Quit,
    /// Create an event
    Create {
        /// New event's id
        event_id: EventId,
        /// Rows
        rows: usize,
        /// Columns
        cols: usize,
    },
    /// Reserve seats
    Reserve {
        /// Target event
        event_id: EventId,
        /// Seats, in request order
        seats: Vec<Seat>,
    },
    /// Show an event's seat map
    Show {
        /// Target event
        event_id: EventId,
    },
    /// List event ids
    List,
}

impl Request {
    /// Opcode this request is framed with
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Quit => OpCode::Quit,
            Self::Create { .. } => OpCode::Create,
            Self::Reserve { .. } => OpCode::Reserve,
            Self::Show { .. } => OpCode::Show,
            Self::List => OpCode::List,
        }
    }

    /// Encodes the request, tagged with `session`, and flushes it.
    ///
    /// # Errors
    ///
    /// Fails if the channel cannot be written.
    pub async fn write_to<W>(&self, session: SessionId, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut frame = Vec::with_capacity(64);
        frame.push(self.opcode() as u8);
        frame.extend_from_slice(&session.get().to_le_bytes());
        match self {
            Self::Quit | Self::List => {}
            Self::Create { event_id, rows, cols } => {
                frame.extend_from_slice(&event_id.get().to_le_bytes());
                frame.extend_from_slice(&(*rows as u64).to_le_bytes());
                frame.extend_from_slice(&(*cols as u64).to_le_bytes());
            }
            Self::Reserve { event_id, seats } => {
                frame.extend_from_slice(&event_id.get().to_le_bytes());
                frame.extend_from_slice(&(seats.len() as u64).to_le_bytes());
                for seat in seats {
                    frame.extend_from_slice(&(seat.row as u64).to_le_bytes());
                }
                for seat in seats {
                    frame.extend_from_slice(&(seat.col as u64).to_le_bytes());
                }
            }
            Self::Show { event_id } => {
                frame.extend_from_slice(&event_id.get().to_le_bytes());
            }
        }
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// A request together with the session id its sender claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
    /// Session id carried by the frame
    pub session: SessionId,
    /// The request itself
    pub request: Request,
}

/// Decodes request frames from one session's request channel.
#[derive(Debug, Clone, Copy)]
pub struct RequestDecoder {
    max_seats: usize,
}

impl RequestDecoder {
    /// A decoder accepting at most `max_seats` seats per reserve frame
    #[must_use]
    pub const fn new(max_seats: usize) -> Self {
        Self { max_seats }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the channel is closed cleanly between frames.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownOpcode`] / [`ProtocolError::UnexpectedOpcode`]
    ///   for a bad first byte (`setup` is not valid on a session channel).
    /// - [`ProtocolError::Truncated`] if the channel closes mid-frame.
    /// - [`ProtocolError::TooManySeats`] if a reserve frame announces more
    ///   seats than this decoder accepts.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<RequestFrame>, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ProtocolError::Io(e)),
        };
        let opcode = OpCode::try_from(byte)?;
        let session = SessionId::new(reader.read_u32_le().await?);

        let request = match opcode {
            OpCode::Setup => return Err(ProtocolError::UnexpectedOpcode(opcode)),
            OpCode::Quit => Request::Quit,
            OpCode::List => Request::List,
            OpCode::Create => Request::Create {
                event_id: read_event_id(reader).await?,
                rows: read_size(reader).await?,
                cols: read_size(reader).await?,
            },
            OpCode::Show => Request::Show {
                event_id: read_event_id(reader).await?,
            },
            OpCode::Reserve => {
                let event_id = read_event_id(reader).await?;
                let count = reader.read_u64_le().await?;
                let len = usize::try_from(count)
                    .ok()
                    .filter(|&len| len <= self.max_seats)
                    .ok_or(ProtocolError::TooManySeats {
                        count,
                        max: self.max_seats,
                    })?;
                let mut rows = Vec::with_capacity(len);
                for _ in 0..len {
                    rows.push(read_size(reader).await?);
                }
                let mut seats = Vec::with_capacity(len);
                for row in rows {
                    seats.push(Seat::new(row, read_size(reader).await?));
                }
                Request::Reserve { event_id, seats }
            }
        };
        Ok(Some(RequestFrame { session, request }))
    }
}

async fn read_event_id<R>(reader: &mut R) -> Result<EventId, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(EventId::new(reader.read_u32_le().await?))
}

/// Reads a `u64` size field. Values beyond `usize` saturate, which the
/// engine then rejects as out of bounds or unallocatable.
async fn read_size<R>(reader: &mut R) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let value = reader.read_u64_le().await?;
    Ok(usize::try_from(value).unwrap_or(usize::MAX))
}

// ============================================================================
// Responses
// ============================================================================

/// A response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Status only: every failure, and a successful create or reserve
    Status(Status),
    /// Successful show
    Grid(SeatGrid),
    /// Successful list
    Events(Vec<EventId>),
}

impl Response {
    /// Response to a create or reserve
    #[must_use]
    pub fn ack<T>(result: &Result<T, EngineError>) -> Self {
        Self::Status(Status::from(result))
    }

    /// Response to a show
    #[must_use]
    pub fn grid(result: Result<SeatGrid, EngineError>) -> Self {
        match result {
            Ok(grid) => Self::Grid(grid),
            Err(e) => Self::Status(e.status()),
        }
    }

    /// Status code this response starts with
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Status(status) => *status,
            Self::Grid(_) | Self::Events(_) => Status::Ok,
        }
    }

    /// Encodes the response and flushes it.
    ///
    /// # Errors
    ///
    /// Fails if the channel cannot be written.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut frame = Vec::new();
        frame.extend_from_slice(&self.status().code().to_le_bytes());
        match self {
            Self::Status(_) => {}
            Self::Grid(grid) => {
                frame.reserve(16 + grid.cells().len() * 4);
                frame.extend_from_slice(&(grid.rows() as u64).to_le_bytes());
                frame.extend_from_slice(&(grid.cols() as u64).to_le_bytes());
                for cell in grid.cells() {
                    frame.extend_from_slice(&cell.to_le_bytes());
                }
            }
            Self::Events(ids) => {
                frame.reserve(8 + ids.len() * 4);
                frame.extend_from_slice(&(ids.len() as u64).to_le_bytes());
                for id in ids {
                    frame.extend_from_slice(&id.get().to_le_bytes());
                }
            }
        }
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads the response to a request sent with `opcode`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnexpectedOpcode`] for `setup` and `quit`, which
    ///   have no response.
    /// - [`ProtocolError::InvalidGrid`] if a grid's dimensions overflow.
    /// - [`ProtocolError::Truncated`] if the channel closes mid-frame.
    pub async fn read_from<R>(opcode: OpCode, reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if matches!(opcode, OpCode::Setup | OpCode::Quit) {
            return Err(ProtocolError::UnexpectedOpcode(opcode));
        }
        let status = Status::from_code(reader.read_i32_le().await?);
        if !status.is_ok() {
            return Ok(Self::Status(status));
        }

        match opcode {
            OpCode::Show => {
                let rows = reader.read_u64_le().await?;
                let cols = reader.read_u64_le().await?;
                let invalid = ProtocolError::InvalidGrid { rows, cols };
                let (Ok(r), Ok(c)) = (usize::try_from(rows), usize::try_from(cols)) else {
                    return Err(invalid);
                };
                let Some(len) = r.checked_mul(c) else {
                    return Err(invalid);
                };
                let cells = read_u32s(reader, len).await?;
                SeatGrid::from_cells(r, c, cells).map(Self::Grid).ok_or(invalid)
            }
            OpCode::List => {
                let count = reader.read_u64_le().await?;
                let len = usize::try_from(count).map_err(|_| ProtocolError::Truncated)?;
                let ids = read_u32s(reader, len).await?;
                Ok(Self::Events(ids.into_iter().map(EventId::new).collect()))
            }
            _ => Ok(Self::Status(status)),
        }
    }
}

/// Reads `len` little-endian `u32`s without trusting `len` for allocation
async fn read_u32s<R>(reader: &mut R, len: usize) -> Result<Vec<u32>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut values = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    for _ in 0..len {
        values.push(reader.read_u32_le().await?);
    }
    Ok(values)
}

/// Writes the session id as the first bytes of a response channel.
///
/// # Errors
///
/// Fails if the channel cannot be written.
pub async fn write_session_id<W>(writer: &mut W, session: SessionId) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_u32_le(session.get()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the session id the server writes after activation.
///
/// # Errors
///
/// Fails on a short read.
pub async fn read_session_id<R>(reader: &mut R) -> Result<SessionId, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(SessionId::new(reader.read_u32_le().await?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SESSION: SessionId = SessionId::new(3);

    async fn decode(bytes: &[u8]) -> Result<Option<RequestFrame>, ProtocolError> {
        let mut reader = bytes;
        RequestDecoder::new(8).read_frame(&mut reader).await
    }

    #[tokio::test]
    async fn create_frame_layout() {
        let mut buf = Vec::new();
        Request::Create {
            event_id: EventId::new(1),
            rows: 2,
            cols: 3,
        }
        .write_to(SESSION, &mut buf)
        .await
        .unwrap();

        let mut expected = vec![3];
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&3u64.to_le_bytes());
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn reserve_sends_all_rows_then_all_cols() {
        let request = Request::Reserve {
            event_id: EventId::new(9),
            seats: vec![Seat::new(1, 4), Seat::new(2, 5)],
        };
        let mut buf = Vec::new();
        request.write_to(SESSION, &mut buf).await.unwrap();

        let rows_at = 1 + 4 + 4 + 8;
        assert_eq!(&buf[rows_at..rows_at + 8], &1u64.to_le_bytes());
        assert_eq!(&buf[rows_at + 8..rows_at + 16], &2u64.to_le_bytes());
        assert_eq!(&buf[rows_at + 16..rows_at + 24], &4u64.to_le_bytes());

        let frame = decode(&buf).await.unwrap().unwrap();
        assert_eq!(frame, RequestFrame { session: SESSION, request });
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        assert!(decode(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_frames() {
        assert!(matches!(decode(&[42]).await, Err(ProtocolError::UnknownOpcode(42))));
        assert!(matches!(
            decode(&[1, 0, 0, 0, 0]).await,
            Err(ProtocolError::UnexpectedOpcode(OpCode::Setup))
        ));
        // show with a half-written event id
        assert!(matches!(decode(&[5, 0, 0, 0, 0, 7, 0]).await, Err(ProtocolError::Truncated)));

        let mut oversized = vec![4, 0, 0, 0, 0, 1, 0, 0, 0];
        oversized.extend_from_slice(&9u64.to_le_bytes());
        assert!(matches!(
            decode(&oversized).await,
            Err(ProtocolError::TooManySeats { count: 9, max: 8 })
        ));
    }

    #[tokio::test]
    async fn grid_response_round_trip() {
        let grid = SeatGrid::from_cells(2, 2, vec![1, 0, 0, 1]).unwrap();
        let mut buf = Vec::new();
        Response::Grid(grid.clone()).write_to(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &0i32.to_le_bytes());

        let mut reader = buf.as_slice();
        let response = Response::read_from(OpCode::Show, &mut reader).await.unwrap();
        assert_eq!(response, Response::Grid(grid));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn failure_carries_status_only() {
        let mut buf = Vec::new();
        Response::grid(Err(EngineError::NotFound(EventId::new(4))))
            .write_to(&mut buf)
            .await
            .unwrap();
        assert_eq!(buf, 2i32.to_le_bytes());

        let mut reader = buf.as_slice();
        assert_eq!(
            Response::read_from(OpCode::Show, &mut reader).await.unwrap(),
            Response::Status(Status::NotFound)
        );
    }

    #[tokio::test]
    async fn oversized_grid_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        let mut reader = buf.as_slice();
        assert!(matches!(
            Response::read_from(OpCode::Show, &mut reader).await,
            Err(ProtocolError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn setup_record_layout() {
        let setup = SetupRequest::new("/tmp/req", "/tmp/resp").unwrap();
        let record = setup.encode();
        assert_eq!(record.len(), 81);
        assert_eq!(record[0], 1);
        assert_eq!(&record[1..9], b"/tmp/req");
        assert!(record[9..41].iter().all(|&b| b == 0));
        assert_eq!(&record[41..50], b"/tmp/resp");
        assert_eq!(SetupRequest::decode(&record).unwrap(), setup);
    }

    #[test]
    fn setup_paths_are_validated() {
        let long = "x".repeat(MAX_CHANNEL_PATH + 1);
        assert!(matches!(SetupRequest::new(long, "/r"), Err(ProtocolError::InvalidPath(_))));
        assert!(matches!(SetupRequest::new("", "/r"), Err(ProtocolError::InvalidPath(_))));
        assert!(SetupRequest::new("x".repeat(MAX_CHANNEL_PATH), "/r").is_ok());

        let mut record = SetupRequest::new("/a", "/b").unwrap().encode();
        record[0] = OpCode::Quit as u8;
        assert!(matches!(
            SetupRequest::decode(&record),
            Err(ProtocolError::UnexpectedOpcode(OpCode::Quit))
        ));
    }
}
