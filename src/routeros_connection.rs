//! RouterOS API connection
//!
//! The management API speaks length-prefixed words over TCP. A sentence is a
//! list of words terminated by an empty word. The first word of a request is
//! the command (`/ip/hotspot/ip-binding/print`), the remaining words are
//! `=key=value` attributes. The router answers with `!re` sentences (one per
//! record) and finishes with `!done`. Errors arrive as `!trap` (followed by
//! `!done`) or `!fatal` (after which the router closes the connection).

use log::debug;
use std::{collections::BTreeMap, io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("login rejected: {0}")]
    Login(String),
    #[error("router trap: {message}")]
    Trap {
        message: String,
        category: Option<String>,
    },
    #[error("router fatal: {0}")]
    Fatal(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Attribute set of one reply sentence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Internal router identifier (`.id`), required for removal.
    pub fn id(&self) -> Option<&str> {
        self.get(".id")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, PartialEq)]
pub enum Reply {
    Re(Record),
    Done(Record),
    Trap(Record),
    Fatal(String),
}

/// Collected answer to a single command.
#[derive(Debug, Default)]
pub struct Response {
    pub records: Vec<Record>,
    pub done: Record,
}

pub fn encode_length(len: u32, out: &mut Vec<u8>) {
    match len {
        0..0x80 => out.push(len as u8),
        0x80..0x4000 => out.extend_from_slice(&((len | 0x8000) as u16).to_be_bytes()),
        0x4000..0x20_0000 => out.extend_from_slice(&(len | 0xC0_0000).to_be_bytes()[1..]),
        0x20_0000..0x1000_0000 => out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes()),
        _ => {
            out.push(0xF0);
            out.extend_from_slice(&len.to_be_bytes());
        }
    }
}

pub fn encode_sentence<W: AsRef<str>>(words: &[W]) -> Result<Vec<u8>, ApiError> {
    let mut out = Vec::new();

    for word in words {
        let word = word.as_ref().as_bytes();
        let len = u32::try_from(word.len())
            .map_err(|_| ApiError::Protocol(format!("word too long: {} bytes", word.len())))?;
        encode_length(len, &mut out);
        out.extend_from_slice(word);
    }

    out.push(0);
    Ok(out)
}

pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, ApiError> {
    let first = reader.read_u8().await?;

    let (extra_bytes, mut len) = match first {
        b if b & 0x80 == 0x00 => (0, u32::from(b)),
        b if b & 0xC0 == 0x80 => (1, u32::from(b & 0x3F)),
        b if b & 0xE0 == 0xC0 => (2, u32::from(b & 0x1F)),
        b if b & 0xF0 == 0xE0 => (3, u32::from(b & 0x0F)),
        0xF0 => (4, 0),
        b => {
            return Err(ApiError::Protocol(format!(
                "unexpected control byte {b:#04x}"
            )));
        }
    };

    for _ in 0..extra_bytes {
        len = (len << 8) | u32::from(reader.read_u8().await?);
    }

    Ok(len)
}

/// Longest reply word accepted from the router.
pub const MAX_WORD_LEN: usize = 1024 * 1024;

pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>, ApiError> {
    let mut words = Vec::new();

    loop {
        let len = read_length(reader).await? as usize;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(ApiError::Protocol(format!(
                "word of {len} bytes exceeds {MAX_WORD_LEN} bytes"
            )));
        }

        let mut word = vec![0; len];
        reader.read_exact(&mut word).await?;
        // comments may be written by other tools in a non utf-8 code page
        words.push(String::from_utf8_lossy(&word).into_owned());
    }
}

pub fn parse_reply(words: &[String]) -> Result<Reply, ApiError> {
    let (reply_word, rest) = words
        .split_first()
        .ok_or_else(|| ApiError::Protocol("empty reply sentence".to_string()))?;

    if reply_word == "!fatal" {
        return Ok(Reply::Fatal(rest.join(" ")));
    }

    let record = rest
        .iter()
        .filter_map(|word| word.strip_prefix('=')?.split_once('='))
        .collect::<Record>();

    match reply_word.as_str() {
        "!re" => Ok(Reply::Re(record)),
        "!done" => Ok(Reply::Done(record)),
        "!trap" => Ok(Reply::Trap(record)),
        other => Err(ApiError::Protocol(format!("unexpected reply word {other}"))),
    }
}

/// An authenticated API session.
pub struct Connection<S> {
    stream: BufStream<S>,
}

impl Connection<TcpStream> {
    /// Open a TCP connection and log in.
    pub async fn connect(
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, ApiError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        let mut connection = Connection::new(stream);
        connection.login(username, password).await?;

        Ok(connection)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Connection {
            stream: BufStream::new(stream),
        }
    }

    /// Plain-text login as supported since RouterOS 6.43.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError> {
        let attributes = [
            ("name".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ];

        match self.call("/login", &attributes).await {
            Ok(response) if response.done.get("ret").is_some() => Err(ApiError::Login(
                "router requested legacy challenge login".to_string(),
            )),
            Ok(_) => Ok(()),
            Err(ApiError::Trap { message, .. }) => Err(ApiError::Login(message)),
            Err(e) => Err(e),
        }
    }

    /// Send one command and collect every reply up to `!done`.
    pub async fn call(
        &mut self,
        command: &str,
        attributes: &[(String, String)],
    ) -> Result<Response, ApiError> {
        let mut words = vec![command.to_string()];
        words.extend(attributes.iter().map(|(k, v)| format!("={k}={v}")));

        self.stream.write_all(&encode_sentence(&words)?).await?;
        self.stream.flush().await?;

        let mut response = Response::default();
        let mut trap = None;

        loop {
            let sentence = read_sentence(&mut self.stream).await?;
            if sentence.is_empty() {
                continue;
            }

            match parse_reply(&sentence)? {
                Reply::Re(record) => response.records.push(record),
                Reply::Trap(record) => {
                    debug!("{command} trapped: {record:?}");
                    trap.get_or_insert(record);
                }
                Reply::Fatal(message) => return Err(ApiError::Fatal(message)),
                Reply::Done(record) => {
                    if let Some(trap) = trap {
                        return Err(ApiError::Trap {
                            message: trap.get("message").unwrap_or("unknown").to_string(),
                            category: trap.get("category").map(str::to_string),
                        });
                    }
                    response.done = record;
                    return Ok(response);
                }
            }
        }
    }
}
