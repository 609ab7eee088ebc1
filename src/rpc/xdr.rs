//! External Data Representation (XDR), as defined by RFC4506.

use crate::error::{Error, RpcError, Result};

pub trait XdrPack {
    /// Consume self, appending its XDR representation onto `out`.
    fn pack_xdr(self, out: &mut Vec<u8>);
}

impl XdrPack for u32 {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        out.extend(self.to_be_bytes());
    }
}

impl XdrPack for i32 {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        out.extend(self.to_be_bytes());
    }
}

impl XdrPack for bool {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        (self as u32).pack_xdr(out);
    }
}

impl XdrPack for Vec<u8> {
    /// Applies only to "opaque" byte buffers, which are length-prefixed.
    fn pack_xdr(self, out: &mut Vec<u8>) {
        let len = self.len();
        (len as u32).pack_xdr(out);
        out.extend(self);
        if !len.is_multiple_of(4) {
            for _ in 0..(4 - (len % 4)) {
                out.push(0);
            }
        }
    }
}

impl XdrPack for String {
    fn pack_xdr(self, out: &mut Vec<u8>) {
        self.into_bytes().pack_xdr(out);
    }
}

impl XdrPack for () {
    /// Void-bodied calls (`destroy_intr_chan`) still need an `XdrPack` impl
    /// to go through `CoreTransport::call_raw`.
    fn pack_xdr(self, _out: &mut Vec<u8>) {}
}

fn malformed(what: &str) -> Error {
    Error::Rpc(RpcError::Malformed(what.to_string()))
}

pub fn unpack_u32(src: &mut Vec<u8>) -> Result<u32> {
    if src.len() < 4 {
        return Err(malformed("not enough bytes to read u32"));
    }
    let bytes: [u8; 4] = src.drain(0..4).collect::<Vec<_>>().try_into().unwrap();
    Ok(u32::from_be_bytes(bytes))
}

pub fn unpack_i32(src: &mut Vec<u8>) -> Result<i32> {
    if src.len() < 4 {
        return Err(malformed("not enough bytes to read i32"));
    }
    let bytes: [u8; 4] = src.drain(0..4).collect::<Vec<_>>().try_into().unwrap();
    Ok(i32::from_be_bytes(bytes))
}

pub fn unpack_u16(src: &mut Vec<u8>) -> Result<u16> {
    let val = unpack_u32(src)?;
    val.try_into()
        .map_err(|_| malformed(&format!("value {val} does not represent a 16-bit value")))
}

pub fn unpack_bool(src: &mut Vec<u8>) -> Result<bool> {
    Ok(unpack_u32(src)? != 0)
}

pub fn unpack_opaque(src: &mut Vec<u8>) -> Result<Vec<u8>> {
    let length = unpack_u32(src)? as usize;
    let padding = if !length.is_multiple_of(4) {
        4 - (length % 4)
    } else {
        0
    };

    if src.len() < (length + padding) {
        return Err(malformed("not enough bytes to read opaque value"));
    }

    let res = src.drain(0..length).collect();
    src.drain(0..padding);
    Ok(res)
}

pub fn unpack_string(src: &mut Vec<u8>) -> Result<String> {
    let bytes = unpack_opaque(src)?;
    String::from_utf8(bytes).map_err(|_| malformed("string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_opaque_with_padding() {
        let mut buf = vec![];
        vec![1u8, 2, 3].pack_xdr(&mut buf);
        assert_eq!(buf.len(), 4 + 4); // len word + 3 bytes padded to 4
        let unpacked = unpack_opaque(&mut buf).unwrap();
        assert_eq!(unpacked, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn unpack_u32_rejects_short_buffer() {
        let mut buf = vec![0u8, 1];
        assert!(unpack_u32(&mut buf).is_err());
    }
}
