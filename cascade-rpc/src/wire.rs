//! Binary packet codec for endpoint RPC traffic
//!
//! Packets travel as opaque byte blobs over the cluster substrate's
//! reliable channel. The leading type byte lets the receiving member tell
//! requests from responses; both carry the target endpoint id so the
//! member can route without inspecting the payload.
//!
//! Layout:
//!
//! ```text
//! request:  [u8 RPC_REQUEST ][u64 endpoint id][u64 request id][payload]
//! response: [u8 RPC_RESPONSE][u64 endpoint id][u64 request id][u8 success][payload]
//! ```
//!
//! On a failed response the payload is the UTF-8 text of the handler
//! failure; on success it is the bincode-encoded result value.

use crate::error::{EndpointError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Type byte of a request packet
pub const RPC_REQUEST: u8 = 0x01;
/// Type byte of a response packet
pub const RPC_RESPONSE: u8 = 0x02;

/// A decoded inbound request
#[derive(Debug, Clone)]
pub struct RequestPacket {
    pub endpoint_id: u64,
    pub request_id: u64,
    pub payload: Bytes,
}

/// A decoded inbound response
#[derive(Debug, Clone)]
pub struct ResponsePacket {
    pub endpoint_id: u64,
    pub request_id: u64,
    pub success: bool,
    pub payload: Bytes,
}

/// Either kind of RPC packet
#[derive(Debug, Clone)]
pub enum Packet {
    Request(RequestPacket),
    Response(ResponsePacket),
}

/// Encode a request packet
pub fn encode_request(endpoint_id: u64, request_id: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8 + 8 + payload.len());
    buf.put_u8(RPC_REQUEST);
    buf.put_u64(endpoint_id);
    buf.put_u64(request_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a response packet
pub fn encode_response(endpoint_id: u64, request_id: u64, success: bool, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8 + 8 + 1 + payload.len());
    buf.put_u8(RPC_RESPONSE);
    buf.put_u64(endpoint_id);
    buf.put_u64(request_id);
    buf.put_u8(success as u8);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode an inbound RPC packet.
///
/// Truncated or unrecognized packets decode to a `Serialization` error so
/// the member can log and drop them without crashing a worker.
pub fn decode_packet(mut buf: Bytes) -> Result<Packet> {
    if buf.remaining() < 1 {
        return Err(EndpointError::Serialization("empty packet".into()));
    }
    let packet_type = buf.get_u8();
    match packet_type {
        RPC_REQUEST => {
            if buf.remaining() < 16 {
                return Err(EndpointError::Serialization(
                    "truncated request header".into(),
                ));
            }
            let endpoint_id = buf.get_u64();
            let request_id = buf.get_u64();
            Ok(Packet::Request(RequestPacket {
                endpoint_id,
                request_id,
                payload: buf,
            }))
        }
        RPC_RESPONSE => {
            if buf.remaining() < 17 {
                return Err(EndpointError::Serialization(
                    "truncated response header".into(),
                ));
            }
            let endpoint_id = buf.get_u64();
            let request_id = buf.get_u64();
            let success = buf.get_u8() != 0;
            Ok(Packet::Response(ResponsePacket {
                endpoint_id,
                request_id,
                success,
                payload: buf,
            }))
        }
        other => Err(EndpointError::Serialization(format!(
            "unknown packet type {other:#04x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let packet = encode_request(7, 42, b"hello");
        match decode_packet(packet).unwrap() {
            Packet::Request(req) => {
                assert_eq!(req.endpoint_id, 7);
                assert_eq!(req.request_id, 42);
                assert_eq!(&req.payload[..], b"hello");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_response_round_trip() {
        let packet = encode_response(7, 42, false, b"boom");
        match decode_packet(packet).unwrap() {
            Packet::Response(resp) => {
                assert_eq!(resp.endpoint_id, 7);
                assert_eq!(resp.request_id, 42);
                assert!(!resp.success);
                assert_eq!(&resp.payload[..], b"boom");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_payload() {
        let packet = encode_request(1, 0, b"");
        match decode_packet(packet).unwrap() {
            Packet::Request(req) => assert!(req.payload.is_empty()),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_packet() {
        let packet = encode_request(7, 42, b"hello");
        let truncated = packet.slice(0..10);
        assert!(matches!(
            decode_packet(truncated),
            Err(EndpointError::Serialization(_))
        ));
    }

    #[test]
    fn test_unknown_type() {
        let packet = Bytes::from_static(&[0xff, 0, 0, 0]);
        assert!(matches!(
            decode_packet(packet),
            Err(EndpointError::Serialization(_))
        ));
    }

    #[test]
    fn test_empty_packet() {
        assert!(decode_packet(Bytes::new()).is_err());
    }
}
