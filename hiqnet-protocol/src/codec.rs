//! Message encoder and decoder.

use crate::command::Command;
use crate::error::CodecError;
use crate::header::Header;
use crate::message::{DiscoInfo, Message, Parameter, Payload};
use crate::value::{decode_block, encode_block, ensure, DataType, ParamValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encodes a complete message: header followed by payload.
pub fn encode_message(message: &Message) -> Result<BytesMut, CodecError> {
    let mut payload = BytesMut::new();
    encode_payload(&message.payload, &mut payload)?;

    let mut buf = BytesMut::with_capacity(message.header.encoded_len() + payload.len());
    message.header.encode(payload.len(), &mut buf)?;
    buf.put_slice(&payload);
    Ok(buf)
}

/// Encodes a payload body.
pub fn encode_payload(payload: &Payload, dst: &mut BytesMut) -> Result<(), CodecError> {
    match payload {
        Payload::DiscoInfo(info) => {
            dst.put_u16(info.device);
            dst.put_u8(info.cost);
            encode_block(&info.serial_number, dst)?;
            dst.put_u32(info.max_message_size);
            dst.put_u16(info.keep_alive_ms);
            dst.put_u8(info.network_id);
            dst.put_slice(&info.network_info);
        }
        Payload::ParamGet { ids } => {
            put_count(ids.len(), dst)?;
            for id in ids {
                dst.put_u16(*id);
            }
        }
        Payload::Parameters { parameters } | Payload::ParamSet { parameters } => {
            put_count(parameters.len(), dst)?;
            for param in parameters {
                dst.put_u16(param.id);
                dst.put_u8(param.value.data_type().tag());
                param.value.encode(dst)?;
            }
        }
        Payload::Locate { duration_ms } => dst.put_u16(*duration_ms),
        Payload::Raw { data } => dst.put_slice(data),
    }
    Ok(())
}

fn put_count(count: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
    if count > u16::MAX as usize {
        return Err(CodecError::TooLarge {
            what: "parameter list",
            size: count,
            max: u16::MAX as usize,
        });
    }
    dst.put_u16(count as u16);
    Ok(())
}

/// Decodes a command-specific payload.
///
/// Multi-parameter get is a reply when the info flag is set and a request
/// otherwise. Unrecognised commands and empty bodies stay raw.
pub fn decode_payload(header: &Header, payload: Bytes) -> Result<Payload, CodecError> {
    if payload.is_empty() {
        return Ok(Payload::empty());
    }

    let mut src = &payload[..];
    let decoded = match Command::from_code(header.command) {
        Some(Command::DiscoInfo) => Payload::DiscoInfo(decode_disco_info(&mut src)?),
        Some(Command::MultiParamGet) if header.flags.is_info() => Payload::Parameters {
            parameters: decode_parameters(&mut src)?,
        },
        Some(Command::MultiParamGet) => {
            ensure(src, 2)?;
            let count = src.get_u16() as usize;
            ensure(src, count * 2)?;
            Payload::ParamGet {
                ids: (0..count).map(|_| src.get_u16()).collect(),
            }
        }
        Some(Command::MultiParamSet) => Payload::ParamSet {
            parameters: decode_parameters(&mut src)?,
        },
        Some(Command::Locate) => {
            ensure(src, 2)?;
            Payload::Locate {
                duration_ms: src.get_u16(),
            }
        }
        _ => Payload::Raw { data: payload },
    };
    Ok(decoded)
}

fn decode_disco_info(src: &mut &[u8]) -> Result<DiscoInfo, CodecError> {
    ensure(src, 3)?;
    let device = src.get_u16();
    let cost = src.get_u8();
    let serial_number = decode_block(src)?;
    ensure(src, 7)?;
    let max_message_size = src.get_u32();
    let keep_alive_ms = src.get_u16();
    let network_id = src.get_u8();
    let network_info = src.to_vec();
    src.advance(network_info.len());
    Ok(DiscoInfo {
        device,
        cost,
        serial_number,
        max_message_size,
        keep_alive_ms,
        network_id,
        network_info,
    })
}

fn decode_parameters(src: &mut &[u8]) -> Result<Vec<Parameter>, CodecError> {
    ensure(src, 2)?;
    let count = src.get_u16() as usize;
    let mut parameters = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        ensure(src, 3)?;
        let id = src.get_u16();
        let data_type = DataType::from_tag(src.get_u8())?;
        let value = ParamValue::decode(data_type, src)?;
        parameters.push(Parameter { id, value });
    }
    Ok(parameters)
}

/// Decodes a complete message.
///
/// Error replies have no command-specific body, so their payload is kept raw.
/// Bytes past the declared total length are ignored.
pub fn decode_message(src: &[u8]) -> Result<Message, CodecError> {
    let header = Header::decode(src)?;
    let total = header.total_length as usize;
    ensure(src, total)?;

    let body = Bytes::copy_from_slice(&src[header.header_length as usize..total]);
    let payload = if header.is_error() {
        Payload::raw(body)
    } else {
        decode_payload(&header, body)?
    };
    Ok(Message { header, payload })
}

/// Reads the declared total length from the start of an encoded message.
///
/// Returns `None` until the length field is available.
pub fn peek_total_length(src: &[u8]) -> Option<u32> {
    if src.len() < 6 {
        return None;
    }
    Some(u32::from_be_bytes([src[2], src[3], src[4], src[5]]))
}
