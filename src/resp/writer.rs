//! RESP request serializer.
//!
//! Requests always go out as an array of bulk strings:
//! `*<N>\r\n$<len>\r\n<id>\r\n$<len>\r\n<arg1>\r\n…`

use itoa::Buffer;

/// Encode a command id and its arguments into RESP wire format.
///
/// Each argument is treated as a binary-safe bulk string.
///
/// # Example
/// ```
/// let bytes = redlink::resp::encode_command("SET", &[&b"k"[..], &b"v"[..]]);
/// assert_eq!(bytes, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
/// ```
pub fn encode_command<A: AsRef<[u8]>>(id: &str, args: &[A]) -> Vec<u8> {
    let mut cap = 1 + 10 + 2; // '*' + max_digits + \r\n
    cap += 1 + 10 + 2 + id.len() + 2;
    for arg in args {
        cap += 1 + 10 + 2 + arg.as_ref().len() + 2;
    }

    let mut buf = Vec::with_capacity(cap);
    let mut itoa_buf = Buffer::new();

    // *<N>\r\n
    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(args.len() + 1).as_bytes());
    buf.extend_from_slice(b"\r\n");

    push_bulk(&mut buf, &mut itoa_buf, id.as_bytes());
    for arg in args {
        push_bulk(&mut buf, &mut itoa_buf, arg.as_ref());
    }

    buf
}

/// `$<len>\r\n<data>\r\n`
#[inline]
fn push_bulk(buf: &mut Vec<u8>, itoa_buf: &mut Buffer, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

// ── Tests ──────────────────────────────────────────────────────────
