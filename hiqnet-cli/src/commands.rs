//! Command execution.

use crate::{Commands, EncodeCommand};
use colored::Colorize;
use hiqnet_client::Config;
use hiqnet_protocol::{
    decode_message, encode_message, Address, DataType, Message, ParamValue, Parameter,
};
use hiqnet_transport::{segment_message, Reassembler, DEFAULT_MAX_MESSAGE_SIZE};
use std::error::Error;

/// Executes a command and returns the formatted output.
pub fn execute(config: &Config, cmd: Commands) -> Result<String, Box<dyn Error>> {
    tracing::debug!("Executing {}", cmd.name());
    match cmd {
        Commands::Decode { hex } => {
            let message = decode_message(&parse_hex(&hex)?)?;
            Ok(serde_json::to_string_pretty(&message)?)
        }

        Commands::Encode(encode) => {
            let message = build_message(config, encode)?;
            Ok(hex::encode(encode_message(&message)?))
        }

        Commands::Segment {
            hex,
            tx,
            frame_size,
        } => {
            let message = parse_hex(&hex)?;
            let frame_size = frame_size.unwrap_or(config.transport.frame_size);
            let frames = segment_message(tx, &message, frame_size)?;
            eprintln!(
                "{} {} bytes into {} frames of {} bytes",
                "Segmented".green(),
                message.len(),
                frames.len(),
                frame_size
            );
            Ok(frames
                .iter()
                .map(hex::encode)
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Reassemble { frames } => {
            let mut reassembler = Reassembler::new(DEFAULT_MAX_MESSAGE_SIZE);
            let mut messages = Vec::new();
            for frame in &frames {
                if let Some(message) = reassembler.push(&parse_hex(frame)?)? {
                    messages.push(hex::encode(message));
                }
            }
            if reassembler.in_progress() > 0 {
                eprintln!(
                    "{}: {} message(s) still incomplete",
                    "Warning".yellow(),
                    reassembler.in_progress()
                );
            }
            if messages.is_empty() {
                return Err("no complete message in the given frames".into());
            }
            Ok(messages.join("\n"))
        }

        Commands::Config => Ok(config.to_yaml()?),
    }
}

fn build_message(config: &Config, cmd: EncodeCommand) -> Result<Message, Box<dyn Error>> {
    let default_source = Address::device(config.connection.source_device);
    let message = match cmd {
        EncodeCommand::Locate {
            dest,
            duration_ms,
            source,
        } => Message::locate(source.unwrap_or(default_source), dest, duration_ms),
        EncodeCommand::Get { dest, ids, source } => {
            Message::multi_param_get(source.unwrap_or(default_source), dest, ids)
        }
        EncodeCommand::Set {
            dest,
            params,
            source,
        } => {
            let parameters = params
                .iter()
                .map(|p| parse_param(p))
                .collect::<Result<Vec<_>, _>>()?;
            Message::multi_param_set(source.unwrap_or(default_source), dest, parameters)
        }
    };
    let mut message = message;
    message.header.hop_count = config.connection.hop_count;
    Ok(message)
}

/// Parses hex, ignoring whitespace, `:` and `-` separators and a `0x` prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let input = input.trim();
    let input = input.strip_prefix("0x").unwrap_or(input);
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    Ok(hex::decode(cleaned)?)
}

/// Parses `id=type:value`.
fn parse_param(input: &str) -> Result<Parameter, Box<dyn Error>> {
    let (id, typed) = input
        .split_once('=')
        .ok_or_else(|| format!("expected id=type:value, got '{}'", input))?;
    let (kind, value) = typed
        .split_once(':')
        .ok_or_else(|| format!("expected type:value, got '{}'", typed))?;
    let id: u16 = id.trim().parse()?;

    let data_type = match kind.trim() {
        "i8" => DataType::I8,
        "u8" => DataType::U8,
        "i16" => DataType::I16,
        "u16" => DataType::U16,
        "i32" => DataType::I32,
        "u32" => DataType::U32,
        "f32" => DataType::F32,
        "f64" => DataType::F64,
        "block" => DataType::Block,
        "string" => DataType::String,
        "i64" => DataType::I64,
        "u64" => DataType::U64,
        other => return Err(format!("unknown parameter type '{}'", other).into()),
    };

    let value = match data_type {
        DataType::I8 => ParamValue::I8(value.parse()?),
        DataType::U8 => ParamValue::U8(value.parse()?),
        DataType::I16 => ParamValue::I16(value.parse()?),
        DataType::U16 => ParamValue::U16(value.parse()?),
        DataType::I32 => ParamValue::I32(value.parse()?),
        DataType::U32 => ParamValue::U32(value.parse()?),
        DataType::F32 => ParamValue::F32(value.parse()?),
        DataType::F64 => ParamValue::F64(value.parse()?),
        DataType::Block => ParamValue::Block(parse_hex(value)?),
        DataType::String => ParamValue::String(value.to_string()),
        DataType::I64 => ParamValue::I64(value.parse()?),
        DataType::U64 => ParamValue::U64(value.parse()?),
    };
    Ok(Parameter::new(id, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiqnet_protocol::Payload;

    fn dest() -> Address {
        "66.0.0.1.0".parse().unwrap()
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("4=f32:36.5").unwrap(),
            Parameter::new(4, ParamValue::F32(36.5))
        );
        assert_eq!(
            parse_param("9=block:0a-0b").unwrap(),
            Parameter::new(9, ParamValue::Block(vec![0x0A, 0x0B]))
        );
        assert_eq!(
            parse_param("2=string:Main: Left").unwrap(),
            Parameter::new(2, ParamValue::String("Main: Left".into()))
        );
        assert!(parse_param("4=f16:1").is_err());
        assert!(parse_param("4=u8:300").is_err());
        assert!(parse_param("4").is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Commands::Config.name(), "config");
        let cmd = Commands::Encode(EncodeCommand::Get {
            dest: dest(),
            ids: vec![1],
            source: None,
        });
        assert_eq!(cmd.name(), "encode get");
    }

    #[test]
    fn test_parse_hex_separators() {
        assert_eq!(parse_hex("0x01 02:03-ff").unwrap(), vec![1, 2, 3, 0xFF]);
        assert!(parse_hex("0g").is_err());
    }

    #[test]
    fn test_encode_locate() {
        let config = Config::default();
        let cmd = Commands::Encode(EncodeCommand::Locate {
            dest: dest(),
            duration_ms: 5000,
            source: None,
        });
        let hex = execute(&config, cmd).unwrap();
        let bytes = parse_hex(&hex).unwrap();
        assert_eq!(&bytes[18..20], &[0x01, 0x29]);
        assert_eq!(&bytes[25..], &[0x13, 0x88]);
    }

    #[test]
    fn test_decode_prints_json() {
        let msg = Message::multi_param_get(Address::device(1), dest(), vec![4]);
        let hex = hex::encode(encode_message(&msg).unwrap());
        let json = execute(&Config::default(), Commands::Decode { hex }).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["payload"]["kind"], "param_get");
        assert_eq!(value["payload"]["ids"][0], 4);
    }

    #[test]
    fn test_segment_then_reassemble() {
        let config = Config::default();
        let msg = Message::multi_param_set(
            Address::device(1),
            dest(),
            vec![
                parse_param("1=string:A fairly long channel name").unwrap(),
                parse_param("2=u64:18446744073709551615").unwrap(),
            ],
        );
        let hex = hex::encode(encode_message(&msg).unwrap());

        let frames = execute(
            &config,
            Commands::Segment {
                hex: hex.clone(),
                tx: 3,
                frame_size: None,
            },
        )
        .unwrap();
        let frames: Vec<String> = frames.lines().map(str::to_string).collect();
        assert!(frames.len() > 1);
        assert!(frames.iter().all(|f| f.len() == 128));

        let reassembled = execute(&config, Commands::Reassemble { frames }).unwrap();
        assert_eq!(reassembled, hex);
        let decoded = decode_message(&parse_hex(&reassembled).unwrap()).unwrap();
        assert!(matches!(decoded.payload, Payload::ParamSet { .. }));
    }

    #[test]
    fn test_reassemble_incomplete() {
        let msg = Message::multi_param_get(Address::device(1), dest(), (0..40).collect());
        let bytes = encode_message(&msg).unwrap();
        let frames = segment_message(1, &bytes, 64).unwrap();
        let first = vec![hex::encode(&frames[0])];
        assert!(execute(&Config::default(), Commands::Reassemble { frames: first }).is_err());
    }

    #[test]
    fn test_config_yaml() {
        let yaml = execute(&Config::default(), Commands::Config).unwrap();
        assert!(yaml.contains("frame_size: 64"));
        assert!(yaml.contains("hop_count: 5"));
    }
}
