//! Fixed-layout big-endian record encoding
//!
//! Control-plane records (file handles, lock service answers, statistics
//! records) are fixed-size structures with network byte order fields. Unlike
//! XDR there is no 4-byte alignment padding; fixed-width string fields are
//! NUL-padded to their declared size.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::WireError;

/// Address family tag for IPv4 in encoded socket addresses.
pub const AF_INET_TAG: u8 = 4;
/// Address family tag for IPv6 in encoded socket addresses.
pub const AF_INET6_TAG: u8 = 6;
/// Encoded size of an [`IpAddr`]: family tag plus 16 address bytes.
pub const IP_ADDR_SIZE: usize = 17;
/// Encoded size of a [`SocketAddr`]: address plus port.
pub const SOCKET_ADDR_SIZE: usize = IP_ADDR_SIZE + 2;

/// Encoder for fixed-layout records.
pub struct WireEncoder {
    buf: BytesMut,
}

impl WireEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Creates an encoder with preallocated capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    /// Encodes one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Encodes a 16-bit unsigned integer.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    /// Encodes a 32-bit unsigned integer.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Encodes a 32-bit signed integer.
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    /// Encodes a 64-bit unsigned integer.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// Encodes a 64-bit signed integer.
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Appends raw bytes.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Writes `data` into a fixed-width field, NUL-padding the remainder.
    ///
    /// Data longer than `width` is truncated.
    pub fn put_fixed(&mut self, data: &[u8], width: usize) {
        let n = data.len().min(width);
        self.buf.put_slice(&data[..n]);
        self.buf.put_bytes(0, width - n);
    }

    /// Encodes an IP address as family tag plus 16 bytes.
    pub fn put_ip_addr(&mut self, addr: &IpAddr) {
        match addr {
            IpAddr::V4(v4) => {
                self.put_u8(AF_INET_TAG);
                self.put_fixed(&v4.octets(), 16);
            }
            IpAddr::V6(v6) => {
                self.put_u8(AF_INET6_TAG);
                self.put_bytes(&v6.octets());
            }
        }
    }

    /// Encodes a socket address as IP address plus port.
    pub fn put_socket_addr(&mut self, addr: &SocketAddr) {
        self.put_ip_addr(&addr.ip());
        self.put_u16(addr.port());
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for WireEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder for fixed-layout records.
pub struct WireDecoder<'a> {
    buf: &'a [u8],
}

impl<'a> WireDecoder<'a> {
    /// Creates a decoder over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure_available(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Decodes one byte.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        self.ensure_available(1)?;
        Ok(self.buf.get_u8())
    }

    /// Decodes a 16-bit unsigned integer.
    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.ensure_available(2)?;
        Ok(self.buf.get_u16())
    }

    /// Decodes a 32-bit unsigned integer.
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.ensure_available(4)?;
        Ok(self.buf.get_u32())
    }

    /// Decodes a 32-bit signed integer.
    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        self.ensure_available(4)?;
        Ok(self.buf.get_i32())
    }

    /// Decodes a 64-bit unsigned integer.
    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        self.ensure_available(8)?;
        Ok(self.buf.get_u64())
    }

    /// Decodes a 64-bit signed integer.
    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        self.ensure_available(8)?;
        Ok(self.buf.get_i64())
    }

    /// Takes `len` raw bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        self.ensure_available(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a NUL-padded fixed-width string field.
    pub fn get_fixed_str(
        &mut self,
        width: usize,
        field: &'static str,
    ) -> Result<String, WireError> {
        let raw = self.get_bytes(width)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).map_err(|e| WireError::InvalidField {
            field,
            reason: e.to_string(),
        })
    }

    /// Decodes an IP address written by [`WireEncoder::put_ip_addr`].
    pub fn get_ip_addr(&mut self) -> Result<IpAddr, WireError> {
        let family = self.get_u8()?;
        let raw = self.get_bytes(16)?;
        match family {
            AF_INET_TAG => Ok(IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))),
            AF_INET6_TAG => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                Ok(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            other => Err(WireError::InvalidField {
                field: "address family",
                reason: format!("unknown family tag {}", other),
            }),
        }
    }

    /// Decodes a socket address written by [`WireEncoder::put_socket_addr`].
    pub fn get_socket_addr(&mut self) -> Result<SocketAddr, WireError> {
        let ip = self.get_ip_addr()?;
        let port = self.get_u16()?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        let mut enc = WireEncoder::new();
        enc.put_u32(0x0102_0304);
        enc.put_u16(0x0506);
        let bytes = enc.finish();
        assert_eq!(&bytes[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_fixed_field_is_nul_padded() {
        let mut enc = WireEncoder::new();
        enc.put_fixed(b"/data", 8);
        let bytes = enc.finish();
        assert_eq!(&bytes[..], b"/data\0\0\0");

        let mut dec = WireDecoder::new(&bytes);
        assert_eq!(dec.get_fixed_str(8, "path").unwrap(), "/data");
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn test_fixed_field_truncates_long_input() {
        let mut enc = WireEncoder::new();
        enc.put_fixed(b"abcdef", 4);
        assert_eq!(&enc.finish()[..], b"abcd");
    }

    #[test]
    fn test_truncated_read_fails() {
        let data = [0u8; 3];
        let mut dec = WireDecoder::new(&data);
        assert_eq!(
            dec.get_u32(),
            Err(WireError::Truncated {
                needed: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_socket_addr_layout() {
        let addr: SocketAddr = "10.1.2.3:2049".parse().unwrap();
        let mut enc = WireEncoder::new();
        enc.put_socket_addr(&addr);
        let bytes = enc.finish();
        assert_eq!(bytes.len(), SOCKET_ADDR_SIZE);
        assert_eq!(bytes[0], AF_INET_TAG);
        assert_eq!(&bytes[1..5], &[10, 1, 2, 3]);

        let mut dec = WireDecoder::new(&bytes);
        assert_eq!(dec.get_socket_addr().unwrap(), addr);
    }

    #[test]
    fn test_unknown_family_rejected() {
        let mut data = vec![9u8];
        data.extend_from_slice(&[0u8; 16]);
        let mut dec = WireDecoder::new(&data);
        assert!(matches!(
            dec.get_ip_addr(),
            Err(WireError::InvalidField { .. })
        ));
    }
}
