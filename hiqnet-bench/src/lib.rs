//! Shared fixtures for the benchmarks.

use hiqnet_protocol::{Address, Message, ParamValue, Parameter};

pub fn source() -> Address {
    Address::device(0x0001)
}

pub fn destination() -> Address {
    Address::new(0x0042, 1, [0, 1, 0])
}

/// A multi-parameter set carrying `count` parameters of mixed types.
pub fn param_set(count: u16) -> Message {
    let parameters = (0..count)
        .map(|id| {
            let value = match id % 4 {
                0 => ParamValue::F32(id as f32 * 0.5),
                1 => ParamValue::U16(id),
                2 => ParamValue::String(format!("channel {}", id)),
                _ => ParamValue::Block(vec![id as u8; 8]),
            };
            Parameter::new(id, value)
        })
        .collect();
    Message::multi_param_set(source(), destination(), parameters)
}
