//! TLS ClientHello inspection.

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn skip_vec8(&mut self) -> Option<()> {
        let len = self.u8()? as usize;
        self.take(len).map(|_| ())
    }

    fn skip_vec16(&mut self) -> Option<()> {
        let len = self.u16()? as usize;
        self.take(len).map(|_| ())
    }
}

/// Length of a TLS record header (type, version, length).
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest record a client may send: header plus 2^14 bytes of plaintext.
pub const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + (1 << 14);

/// What the first bytes of a tunneled connection say about its TLS server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientHello {
    /// A handshake record has started; `needed` bytes make the whole record.
    Incomplete { needed: usize },
    /// Not a TLS handshake at all.
    NotTls,
    /// A complete ClientHello naming this server.
    ServerName(String),
    /// A complete ClientHello without a host name.
    Anonymous,
    /// A handshake record that does not read as a ClientHello.
    Malformed,
}

/// Check whether the bytes start a TLS handshake record carrying a ClientHello.
pub fn is_client_hello(buf: &[u8]) -> bool {
    buf.len() > RECORD_HEADER_LEN
        && buf[0] == CONTENT_TYPE_HANDSHAKE
        && buf[RECORD_HEADER_LEN] == HANDSHAKE_CLIENT_HELLO
}

/// Classify the first bytes a client sent.
///
/// Only the first record is examined; bytes after it are ignored.
pub fn inspect(buf: &[u8]) -> ClientHello {
    match buf.first() {
        None => {
            return ClientHello::Incomplete {
                needed: RECORD_HEADER_LEN,
            }
        }
        Some(&CONTENT_TYPE_HANDSHAKE) => {}
        Some(_) => return ClientHello::NotTls,
    }
    if buf.len() < RECORD_HEADER_LEN {
        return ClientHello::Incomplete {
            needed: RECORD_HEADER_LEN,
        };
    }

    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    let needed = RECORD_HEADER_LEN + record_len;
    if buf.len() < needed {
        return ClientHello::Incomplete { needed };
    }

    match server_name(&buf[RECORD_HEADER_LEN..needed]) {
        Some(Some(name)) => ClientHello::ServerName(name),
        Some(None) => ClientHello::Anonymous,
        None => ClientHello::Malformed,
    }
}

/// Extract the `server_name` host name from the first TLS record of a connection.
///
/// Returns None when the bytes are not a complete ClientHello record or carry
/// no SNI extension.
pub fn parse_sni(buf: &[u8]) -> Option<String> {
    match inspect(buf) {
        ClientHello::ServerName(name) => Some(name),
        _ => None,
    }
}

/// Host name of the ClientHello in one handshake record body.
/// The outer None means the body is not a readable ClientHello.
fn server_name(record: &[u8]) -> Option<Option<String>> {
    let mut handshake = Reader::new(record);
    if handshake.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    // a hello fragmented over several records cannot be checked
    let body_len = handshake.u24()?;
    let mut hello = Reader::new(handshake.take(body_len)?);

    hello.take(2 + 32)?; // client version + random
    hello.skip_vec8()?; // session id
    hello.skip_vec16()?; // cipher suites
    hello.skip_vec8()?; // compression methods

    if hello.pos == hello.buf.len() {
        return Some(None);
    }
    let extensions_len = hello.u16()? as usize;
    let mut extensions = Reader::new(hello.take(extensions_len)?);

    while let Some(ext_type) = extensions.u16() {
        let ext_len = extensions.u16()? as usize;
        let data = extensions.take(ext_len)?;
        if ext_type != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut names = Reader::new(data);
        let list_len = names.u16()? as usize;
        let mut list = Reader::new(names.take(list_len)?);
        while let Some(name_type) = list.u8() {
            let name_len = list.u16()? as usize;
            let name = list.take(name_len)?;
            if name_type == NAME_TYPE_HOST_NAME {
                let name = std::str::from_utf8(name).ok()?;
                return Some(Some(name.to_ascii_lowercase()));
            }
        }
        return Some(None);
    }

    Some(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal ClientHello record, optionally with an SNI extension.
    pub(crate) fn client_hello(server_name: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();
        // an unrelated extension first (supported_versions)
        extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
        if let Some(name) = server_name {
            let name = name.as_bytes();
            let entry_len = 3 + name.len();
            extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&((entry_len + 2) as u16).to_be_bytes());
            extensions.extend_from_slice(&(entry_len as u16).to_be_bytes());
            extensions.push(NAME_TYPE_HOST_NAME);
            extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
            extensions.extend_from_slice(name);
        }

        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[0u8; 32]);
        hello.push(0); // empty session id
        hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
        hello.extend_from_slice(&[0x01, 0x00]);
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        let len = hello.len();
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn test_parse_sni() {
        let hello = client_hello(Some("Example.COM"));
        assert!(is_client_hello(&hello));
        assert_eq!(parse_sni(&hello), Some("example.com".to_string()));
    }

    #[test]
    fn test_parse_sni_without_extension() {
        assert_eq!(parse_sni(&client_hello(None)), None);
    }

    #[test]
    fn test_parse_sni_rejects_truncated_and_plaintext() {
        let hello = client_hello(Some("example.com"));
        assert_eq!(parse_sni(&hello[..hello.len() - 4]), None);
        assert_eq!(parse_sni(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n"), None);
        assert_eq!(parse_sni(&[]), None);
    }

    #[test]
    fn test_inspect_waits_for_the_whole_record() {
        let hello = client_hello(Some("example.com"));

        assert_eq!(
            inspect(&[]),
            ClientHello::Incomplete {
                needed: RECORD_HEADER_LEN
            }
        );
        assert_eq!(
            inspect(&hello[..3]),
            ClientHello::Incomplete {
                needed: RECORD_HEADER_LEN
            }
        );
        assert_eq!(
            inspect(&hello[..10]),
            ClientHello::Incomplete {
                needed: hello.len()
            }
        );
        assert_eq!(
            inspect(&hello),
            ClientHello::ServerName("example.com".to_string())
        );

        let mut with_data = hello.clone();
        with_data.extend_from_slice(b"early data");
        assert_eq!(
            inspect(&with_data),
            ClientHello::ServerName("example.com".to_string())
        );
    }

    #[test]
    fn test_inspect_classifies_other_openings() {
        assert_eq!(inspect(b"SSH-2.0-OpenSSH_9.6\r\n"), ClientHello::NotTls);
        assert_eq!(inspect(&client_hello(None)), ClientHello::Anonymous);

        // a complete record whose handshake body claims more than it holds
        let mut fragmented = client_hello(Some("example.com"));
        fragmented[RECORD_HEADER_LEN + 3] = 0xff;
        assert_eq!(inspect(&fragmented), ClientHello::Malformed);

        // a handshake record that is not a ClientHello
        let mut server_hello = client_hello(Some("example.com"));
        server_hello[RECORD_HEADER_LEN] = 0x02;
        assert_eq!(inspect(&server_hello), ClientHello::Malformed);
    }
}
