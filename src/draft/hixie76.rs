//! draft-hixie-thewebsocketprotocol-76.
//!
//! The handshake proves the server read the request by answering an MD5
//! challenge built from two numeric keys and eight bytes of body. The keys
//! hide a 32-bit number: its digits, divided by the count of spaces.

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};

use crate::codec::SentinelCodec;
use crate::config::Config;
use crate::connection::Role;
use crate::draft::{HandshakeState, basic_accept, random_u32};
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::protocol::handshake::{ClientHandshake, ServerHandshake};

pub(crate) const NAME: &str = "hixie-76";

const KEY3_LEN: usize = 8;
const CHALLENGE_LEN: usize = 16;

/// Number hidden in a `Sec-WebSocket-Key1`/`Key2` value.
fn key_part(key: &str) -> Result<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let number: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidHandshake("invalid Sec-WebSocket-Key (/key1/ or /key2/)".into()))?;
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
    if spaces == 0 {
        return Err(Error::InvalidHandshake(
            "invalid Sec-WebSocket-Key (/key2/)".into(),
        ));
    }
    u32::try_from(number / spaces)
        .map_err(|_| Error::InvalidHandshake("Sec-WebSocket-Key out of range".into()))
}

/// `MD5(part(key1) || part(key2) || key3)`, parts big-endian.
///
/// # Errors
///
/// `Error::InvalidHandshake` for malformed keys or a key3 that is not
/// eight bytes.
pub fn create_challenge(key1: &str, key2: &str, key3: &[u8]) -> Result<[u8; CHALLENGE_LEN]> {
    if key3.len() != KEY3_LEN {
        return Err(Error::InvalidHandshake("Bad keys".into()));
    }
    let mut hasher = Md5::new();
    hasher.update(key_part(key1)?.to_be_bytes());
    hasher.update(key_part(key2)?.to_be_bytes());
    hasher.update(key3);
    let mut challenge = [0u8; CHALLENGE_LEN];
    challenge.copy_from_slice(&hasher.finalize());
    Ok(challenge)
}

fn random_below(bound: u32) -> Result<u32> {
    Ok(random_u32()? % bound.max(1))
}

/// Generate a `Sec-WebSocket-Key1`/`Key2` value.
///
/// # Errors
///
/// Returns `Error::Io` if no randomness is available.
pub fn generate_key() -> Result<String> {
    let spaces = random_below(12)? + 1;
    let max = u32::MAX / spaces;
    let number = random_below(max)? + 1;
    let mut key: Vec<char> = (u64::from(number) * u64::from(spaces))
        .to_string()
        .chars()
        .collect();

    for _ in 0..=random_below(12)? {
        let position = random_below(key.len() as u32 + 1)? as usize;
        // Printable non-digit characters only.
        let mut c = (random_below(95)? + 33) as u8;
        if c.is_ascii_digit() {
            c -= 15;
        }
        key.insert(position, char::from(c));
    }
    for _ in 0..spaces {
        let position = random_below(key.len() as u32 - 1)? as usize + 1;
        key.insert(position, ' ');
    }
    Ok(key.into_iter().collect())
}

/// Sentinel framing plus the `0xFF 0x00` close frame and a challenge
/// handshake.
#[derive(Debug, Clone)]
pub struct Hixie76Draft {
    role: Role,
    codec: SentinelCodec,
}

impl Default for Hixie76Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Hixie76Draft {
    #[must_use]
    pub fn new() -> Self {
        Self {
            role: Role::Server,
            codec: SentinelCodec::new(NAME, Config::default().limits.max_frame_size).with_close(),
        }
    }

    pub(crate) fn accept_as_server(&mut self, request: &ClientHandshake) -> HandshakeState {
        let matched = request.field("Upgrade") == "WebSocket"
            && request.field("Connection").contains("Upgrade")
            && !request.field("Sec-WebSocket-Key1").is_empty()
            && !request.field("Sec-WebSocket-Key2").is_empty()
            && request.headers.contains("Origin");
        if matched {
            HandshakeState::Matched
        } else {
            HandshakeState::NotMatched
        }
    }

    pub(crate) fn accept_as_client(
        &mut self,
        request: &ClientHandshake,
        response: &ServerHandshake,
    ) -> HandshakeState {
        if response.field("Sec-WebSocket-Origin") != request.field("Origin")
            || !basic_accept(&response.headers)
        {
            return HandshakeState::NotMatched;
        }
        if response.content.is_empty() {
            return HandshakeState::Matching;
        }
        match create_challenge(
            request.field("Sec-WebSocket-Key1"),
            request.field("Sec-WebSocket-Key2"),
            &request.content,
        ) {
            Ok(expected) if expected[..] == response.content[..] => HandshakeState::Matched,
            _ => HandshakeState::NotMatched,
        }
    }

    pub(crate) fn post_process_request_as_client(
        &mut self,
        request: &mut ClientHandshake,
    ) -> Result<()> {
        request.headers.set("Upgrade", "WebSocket");
        request.headers.set("Connection", "Upgrade");
        request.headers.set("Sec-WebSocket-Key1", generate_key()?);
        request.headers.set("Sec-WebSocket-Key2", generate_key()?);
        if !request.headers.contains("Origin") {
            request
                .headers
                .set("Origin", format!("random{}", random_u32()?));
        }
        let mut key3 = [0u8; KEY3_LEN];
        getrandom::getrandom(&mut key3).map_err(|e| Error::Io(e.to_string()))?;
        request.content = Bytes::copy_from_slice(&key3);
        Ok(())
    }

    pub(crate) fn post_process_response_as_server(
        &mut self,
        request: &ClientHandshake,
        response: &mut ServerHandshake,
    ) -> Result<()> {
        response.status_message = "WebSocket Protocol Handshake".to_string();
        response.headers.set("Upgrade", "WebSocket");
        response
            .headers
            .set("Connection", request.field("Connection"));
        response
            .headers
            .set("Sec-WebSocket-Origin", request.field("Origin"));
        response.headers.set(
            "Sec-WebSocket-Location",
            format!("ws://{}{}", request.field("Host"), request.resource),
        );
        let (Some(key1), Some(key2)) = (
            request.headers.get("Sec-WebSocket-Key1"),
            request.headers.get("Sec-WebSocket-Key2"),
        ) else {
            return Err(Error::InvalidHandshake("Bad keys".into()));
        };
        let challenge = create_challenge(key1, key2, &request.content)?;
        response.content = Bytes::copy_from_slice(&challenge);
        Ok(())
    }

    /// Hixie-76 handshakes carry no version header; a request with `Key1`
    /// (or any response, on the client) owns the bytes after the header.
    fn content_len(&self, headers_have_key1: bool, has_version: bool) -> Option<usize> {
        if (headers_have_key1 || self.role == Role::Client) && !has_version {
            Some(match self.role {
                Role::Server => KEY3_LEN,
                Role::Client => CHALLENGE_LEN,
            })
        } else {
            None
        }
    }

    fn take_content(buf: &[u8], consumed: usize, len: usize) -> Result<Bytes> {
        let available = buf.len() - consumed;
        if available < len {
            return Err(Error::IncompleteHandshake {
                needed: len - available,
            });
        }
        Ok(Bytes::copy_from_slice(&buf[consumed..consumed + len]))
    }

    pub(crate) fn translate_request(&self, buf: &[u8]) -> Result<(ClientHandshake, usize)> {
        let (mut request, consumed) = ClientHandshake::parse(buf)?;
        match self.content_len(
            request.headers.contains("Sec-WebSocket-Key1"),
            request.headers.contains("Sec-WebSocket-Version"),
        ) {
            Some(len) => {
                request.content = Self::take_content(buf, consumed, len)?;
                Ok((request, consumed + len))
            }
            None => Ok((request, consumed)),
        }
    }

    pub(crate) fn translate_response(&self, buf: &[u8]) -> Result<(ServerHandshake, usize)> {
        let (mut response, consumed) = ServerHandshake::parse(buf)?;
        match self.content_len(
            response.headers.contains("Sec-WebSocket-Key1"),
            response.headers.contains("Sec-WebSocket-Version"),
        ) {
            Some(len) => {
                response.content = Self::take_content(buf, consumed, len)?;
                Ok((response, consumed + len))
            }
            None => Ok((response, consumed)),
        }
    }

    pub(crate) fn decode(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        self.codec.decode(data, out)
    }

    pub(crate) fn encode(&self, frame: &Frame, out: &mut BytesMut) -> Result<()> {
        self.codec.encode(frame, out)
    }

    pub(crate) fn copy_instance(&self) -> Self {
        Self {
            role: self.role,
            codec: self.codec.fresh(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.codec.reset();
    }

    pub(crate) fn configure(&mut self, role: Role, config: &Config) {
        self.role = role;
        self.codec = SentinelCodec::new(NAME, config.limits.max_frame_size).with_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CloseCode, CloseFrame};
    use crate::protocol::OpCode;

    // Sample handshake from draft-hixie-thewebsocketprotocol-76, section 1.3.
    const KEY1: &str = "4 @1  46546xW%0l 1 5";
    const KEY2: &str = "12998 5 Y3 1  .P00";
    const KEY3: &[u8] = b"^n:ds[4U";
    const ANSWER: &[u8] = b"8jKS'y:G*Co,Wxa-";

    #[test]
    fn test_challenge_sample() {
        assert_eq!(&create_challenge(KEY1, KEY2, KEY3).unwrap()[..], ANSWER);
    }

    #[test]
    fn test_key_without_spaces_rejected() {
        assert!(matches!(
            create_challenge("12345", KEY2, KEY3),
            Err(Error::InvalidHandshake(_))
        ));
        assert!(create_challenge("no digits ", KEY2, KEY3).is_err());
        assert!(create_challenge(KEY1, KEY2, b"short").is_err());
    }

    #[test]
    fn test_generated_keys_are_well_formed() {
        for _ in 0..50 {
            let key = generate_key().unwrap();
            assert!(!key.starts_with(' '));
            assert!(!key.ends_with(' '));
            let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
            let digits: u64 = key
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap();
            assert_eq!(digits % spaces, 0);
            assert!(key_part(&key).is_ok());
        }
    }

    #[test]
    fn test_handshake_round_trip() {
        let mut client = Hixie76Draft::new();
        client.configure(Role::Client, &Config::default());
        let mut request = ClientHandshake::new("/demo");
        request.headers.set("Host", "example.com");
        client.post_process_request_as_client(&mut request).unwrap();
        assert_eq!(request.content.len(), 8);

        let mut wire = BytesMut::new();
        request.write(&mut wire).unwrap();
        let server = Hixie76Draft::new();
        let (parsed, used) = server.translate_request(&wire).unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(parsed.content, request.content);

        let mut server = server;
        assert_eq!(server.accept_as_server(&parsed), HandshakeState::Matched);
        let mut response = ServerHandshake::default();
        server
            .post_process_response_as_server(&parsed, &mut response)
            .unwrap();
        assert_eq!(response.content.len(), 16);
        assert_eq!(response.field("Sec-WebSocket-Location"), "ws://example.com/demo");

        let mut wire = BytesMut::new();
        response.write(&mut wire).unwrap();
        let (parsed_response, _) = client.translate_response(&wire).unwrap();
        assert_eq!(
            client.accept_as_client(&request, &parsed_response),
            HandshakeState::Matched
        );
    }

    #[test]
    fn test_short_key3_is_incomplete() {
        let raw = format!(
            "GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\nOrigin: x\r\n\
             Sec-WebSocket-Key1: {KEY1}\r\nSec-WebSocket-Key2: {KEY2}\r\n\r\n^n:"
        );
        assert_eq!(
            Hixie76Draft::new().translate_request(raw.as_bytes()),
            Err(Error::IncompleteHandshake { needed: 5 })
        );
    }

    #[test]
    fn test_rfc_request_keeps_trailing_bytes() {
        let raw = b"GET / HTTP/1.1\r\nSec-WebSocket-Version: 13\r\n\r\n\x81\x00";
        let (request, used) = Hixie76Draft::new().translate_request(raw).unwrap();
        assert!(request.content.is_empty());
        assert_eq!(used, raw.len() - 2);
    }

    #[test]
    fn test_client_waits_for_challenge() {
        let mut request = ClientHandshake::new("/");
        request.headers.set("Origin", "o");
        let mut response = ServerHandshake::default();
        response.headers.set("Upgrade", "WebSocket");
        response.headers.set("Connection", "Upgrade");
        response.headers.set("Sec-WebSocket-Origin", "o");
        assert_eq!(
            Hixie76Draft::new().accept_as_client(&request, &response),
            HandshakeState::Matching
        );
    }

    #[test]
    fn test_missing_keys_rejected_when_responding() {
        let mut request = ClientHandshake::new("/");
        request.content = Bytes::from_static(KEY3);
        let mut response = ServerHandshake::default();
        assert_eq!(
            Hixie76Draft::new().post_process_response_as_server(&request, &mut response),
            Err(Error::InvalidHandshake("Bad keys".into()))
        );
    }

    #[test]
    fn test_close_frame() {
        let mut draft = Hixie76Draft::new();
        let mut wire = BytesMut::new();
        let close = Frame::close(&CloseFrame::new(CloseCode::Normal, "")).unwrap();
        draft.encode(&close, &mut wire).unwrap();
        assert_eq!(&wire[..], &[0xFF, 0x00]);

        let mut frames = Vec::new();
        draft.decode(&wire, &mut frames).unwrap();
        assert_eq!(frames[0].opcode, OpCode::Close);
    }
}
