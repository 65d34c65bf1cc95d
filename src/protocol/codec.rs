//! Protocol codec for encoding/decoding packet payloads
//!
//! Pure transforms: requests become payload bytes, payload bytes become
//! responses. Framing lives in the transport.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{GameDate, RequestPacket, ResponseKind, ResponsePacket, TypeCounts, FRAME_HEADER_SIZE};

/// Largest payload that still fits in a u16 frame length
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - FRAME_HEADER_SIZE;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated packet: needed {needed} bytes, {remaining} remaining")]
    TruncatedPacket { needed: usize, remaining: usize },

    #[error("String field '{field}' contains a NUL byte")]
    EmbeddedNul { field: &'static str },

    #[error("Packet too large: {0} bytes (max: {})", MAX_PAYLOAD_SIZE)]
    PacketTooLarge(usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

fn put_str(buf: &mut BytesMut, field: &'static str, value: &str) -> CodecResult<()> {
    if value.as_bytes().contains(&0) {
        return Err(CodecError::EmbeddedNul { field });
    }
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
    Ok(())
}

impl RequestPacket {
    /// Encode the payload of this request (without the frame header)
    pub fn encode(&self) -> CodecResult<Bytes> {
        let mut buf = BytesMut::new();

        match self {
            RequestPacket::Join { password, name, version } => {
                put_str(&mut buf, "password", password)?;
                put_str(&mut buf, "name", name)?;
                put_str(&mut buf, "version", version)?;
            }
            RequestPacket::Quit => {}
            RequestPacket::UpdateFrequency { update_type, frequency } => {
                buf.put_u16_le(*update_type as u16);
                buf.put_u16_le(frequency.bits());
            }
            RequestPacket::Poll { update_type, id } => {
                buf.put_u8(*update_type as u8);
                buf.put_u32_le(*id);
            }
            RequestPacket::Chat { action, destination, destination_id, message } => {
                buf.put_u8(*action as u8);
                buf.put_u8(*destination as u8);
                buf.put_u32_le(*destination_id);
                put_str(&mut buf, "message", message)?;
            }
            RequestPacket::Rcon { command } => put_str(&mut buf, "command", command)?,
            RequestPacket::GameScript { json } => put_str(&mut buf, "json", json)?,
            RequestPacket::Ping { token } => buf.put_u32_le(*token),
        }

        if buf.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PacketTooLarge(buf.len()));
        }
        Ok(buf.freeze())
    }
}

/// Bounds-checked little-endian reader over a payload
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        if self.remaining() < N {
            return Err(CodecError::TruncatedPacket {
                needed: N,
                remaining: self.remaining(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> CodecResult<bool> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn date(&mut self) -> CodecResult<GameDate> {
        Ok(GameDate(self.u32()?))
    }

    fn string(&mut self) -> CodecResult<String> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                let value = String::from_utf8_lossy(&rest[..end]).into_owned();
                self.pos += end + 1;
                Ok(value)
            }
            None => Err(CodecError::TruncatedPacket {
                needed: rest.len() + 1,
                remaining: rest.len(),
            }),
        }
    }

    /// Read a `more, key, value, more, ...` group terminated by a false flag
    fn group<K: Ord, V>(
        &mut self,
        mut key: impl FnMut(&mut Self) -> CodecResult<K>,
        mut value: impl FnMut(&mut Self) -> CodecResult<V>,
    ) -> CodecResult<BTreeMap<K, V>> {
        let mut map = BTreeMap::new();
        while self.bool()? {
            let k = key(self)?;
            let v = value(self)?;
            map.insert(k, v);
        }
        Ok(map)
    }

    fn counts(&mut self) -> CodecResult<TypeCounts> {
        Ok(TypeCounts {
            train: self.u16()?,
            lorry: self.u16()?,
            bus: self.u16()?,
            plane: self.u16()?,
            ship: self.u16()?,
        })
    }
}

impl ResponsePacket {
    /// Decode a payload received with the given kind byte
    ///
    /// Unknown kinds are returned as [`ResponsePacket::Unknown`]; bytes past
    /// the end of a known schema are ignored.
    pub fn decode(kind: u8, payload: &[u8]) -> CodecResult<Self> {
        let Some(known) = ResponseKind::from_u8(kind) else {
            return Ok(ResponsePacket::Unknown {
                kind,
                payload: payload.to_vec(),
            });
        };

        let mut r = PayloadReader::new(payload);
        let packet = match known {
            ResponseKind::Full => ResponsePacket::Full,
            ResponseKind::Banned => ResponsePacket::Banned,
            ResponseKind::Error => ResponsePacket::Error { code: r.u8()? },
            ResponseKind::Protocol => decode_protocol(&mut r)?,
            ResponseKind::Welcome => decode_welcome(&mut r)?,
            ResponseKind::Newgame => ResponsePacket::Newgame,
            ResponseKind::Shutdown => ResponsePacket::Shutdown,
            ResponseKind::Date => ResponsePacket::Date { current: r.date()? },
            ResponseKind::ClientJoin => ResponsePacket::ClientJoin { id: r.u32()? },
            ResponseKind::ClientInfo => decode_client_info(&mut r)?,
            ResponseKind::ClientUpdate => ResponsePacket::ClientUpdate {
                id: r.u32()?,
                name: r.string()?,
                company: r.u8()?,
            },
            ResponseKind::ClientQuit => ResponsePacket::ClientQuit { id: r.u32()? },
            ResponseKind::ClientError => ResponsePacket::ClientError {
                id: r.u32()?,
                error: r.u8()?,
            },
            ResponseKind::CompanyNew => ResponsePacket::CompanyNew { id: r.u8()? },
            ResponseKind::CompanyInfo => decode_company_info(&mut r)?,
            ResponseKind::CompanyUpdate => decode_company_update(&mut r)?,
            ResponseKind::CompanyRemove => ResponsePacket::CompanyRemove {
                id: r.u8()?,
                reason: r.u8()?.into(),
            },
            ResponseKind::CompanyEconomy => decode_company_economy(&mut r)?,
            ResponseKind::CompanyStats => ResponsePacket::CompanyStats {
                id: r.u8()?,
                vehicles: r.counts()?,
                stations: r.counts()?,
            },
            ResponseKind::Chat => ResponsePacket::Chat {
                action: r.u8()?,
                destination: r.u8()?,
                client_id: r.u32()?,
                message: r.string()?,
                money: r.u64()?,
            },
            ResponseKind::Rcon => ResponsePacket::Rcon {
                colour: r.u16()?,
                output: r.string()?,
            },
            ResponseKind::Console => ResponsePacket::Console {
                origin: r.string()?,
                message: r.string()?,
            },
            ResponseKind::CmdNames => ResponsePacket::CmdNames {
                commands: r.group(PayloadReader::u16, PayloadReader::string)?,
            },
            ResponseKind::CmdLogging => decode_cmd_logging(&mut r)?,
            ResponseKind::GameScript => ResponsePacket::GameScript { json: r.string()? },
            ResponseKind::RconEnd => ResponsePacket::RconEnd { command: r.string()? },
            ResponseKind::Pong => ResponsePacket::Pong { token: r.u32()? },
        };

        Ok(packet)
    }
}

fn decode_protocol(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    let version = r.u8()?;
    let frequencies = r.group(PayloadReader::u16, PayloadReader::u16)?;
    Ok(ResponsePacket::Protocol { version, frequencies })
}

fn decode_welcome(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    Ok(ResponsePacket::Welcome {
        name: r.string()?,
        version: r.string()?,
        dedicated: r.bool()?,
        map_name: r.string()?,
        seed: r.u32()?,
        landscape: r.u8()?,
        start_date: r.date()?,
        map_width: r.u16()?,
        map_height: r.u16()?,
    })
}

fn decode_client_info(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    Ok(ResponsePacket::ClientInfo {
        id: r.u32()?,
        address: r.string()?,
        name: r.string()?,
        language: r.u8()?,
        join_date: r.date()?,
        company: r.u8()?,
    })
}

fn decode_company_info(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    Ok(ResponsePacket::CompanyInfo {
        id: r.u8()?,
        name: r.string()?,
        manager: r.string()?,
        colour: r.u8()?,
        passworded: r.bool()?,
        start_year: r.u32()?,
        ai: r.bool()?,
    })
}

fn decode_company_update(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    let id = r.u8()?;
    let name = r.string()?;
    let manager = r.string()?;
    let colour = r.u8()?;
    let passworded = r.bool()?;
    let bankruptcy_quarters = r.u8()?;

    // Protocol 3 dropped the share owners; a partial set is still truncation
    let shares = match r.remaining() {
        0 => None,
        _ => Some(r.take::<4>()?),
    };

    Ok(ResponsePacket::CompanyUpdate {
        id,
        name,
        manager,
        colour,
        passworded,
        bankruptcy_quarters,
        shares,
    })
}

fn decode_company_economy(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    Ok(ResponsePacket::CompanyEconomy {
        id: r.u8()?,
        money: r.u64()?,
        loan: r.u64()?,
        income: r.i64()?,
        cargo_this_quarter: r.u16()?,
        value_last_quarter: r.u64()?,
        performance_last_quarter: r.u16()?,
        cargo_last_quarter: r.u16()?,
        value_previous_quarter: r.u64()?,
        performance_previous_quarter: r.u16()?,
        cargo_previous_quarter: r.u16()?,
    })
}

fn decode_cmd_logging(r: &mut PayloadReader<'_>) -> CodecResult<ResponsePacket> {
    Ok(ResponsePacket::CmdLogging {
        client_id: r.u32()?,
        company: r.u8()?,
        command_id: r.u16()?,
        p1: r.u32()?,
        p2: r.u32()?,
        tile: r.u32()?,
        text: r.string()?,
        frame: r.u32()?,
    })
}
