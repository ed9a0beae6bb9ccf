//! Colored-coins payload codec
//!
//! A colored transaction carries exactly one `OP_RETURN` output whose data
//! starts with the `CC` marker:
//!
//! ```text
//! "CC" | version | type | body
//! issuance: amount | divisibility | flags | metadata | n | n x instruction
//! transfer: n | n x instruction
//! instruction: output (u8) | amount (CompactSize)
//! ```

use bitcoin::consensus::encode::{deserialize_partial, serialize, VarInt};
use bitcoin::script::{Instruction as ScriptInstruction, PushBytesBuf};
use bitcoin::{ScriptBuf, Transaction};

/// Marker prefix of every payload
pub const MAGIC: [u8; 2] = *b"CC";
/// Protocol version
pub const VERSION: u8 = 0x01;
/// Standardness limit for `OP_RETURN` data
pub const MAX_PAYLOAD_SIZE: usize = 80;

const TYPE_ISSUANCE: u8 = 0x01;
const TYPE_TRANSFER: u8 = 0x10;

const METADATA_NONE: u8 = 0x00;
const METADATA_COMMITMENT: u8 = 0x01;
const METADATA_INLINE: u8 = 0x02;

const FLAG_REISSUEABLE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE} byte OP_RETURN limit")]
    TooLarge(usize),

    #[error("Too many instructions: {0}")]
    TooManyInstructions(usize),

    #[error("Unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown payload type {0:#04x}")]
    UnknownType(u8),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Assigns `amount` units to output `output`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub output: u8,
    pub amount: u64,
}

/// How issuance metadata is bound to the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRef {
    None,
    /// sha256 of the canonical metadata encoding
    Commitment([u8; 32]),
    /// The canonical metadata encoding itself
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Issuance {
        amount: u64,
        divisibility: u8,
        reissueable: bool,
        metadata: MetadataRef,
        instructions: Vec<Instruction>,
    },
    Transfer {
        instructions: Vec<Instruction>,
    },
}

impl Payload {
    pub fn instructions(&self) -> &[Instruction] {
        match self {
            Payload::Issuance { instructions, .. } | Payload::Transfer { instructions } => {
                instructions
            }
        }
    }

    pub fn is_issuance(&self) -> bool {
        matches!(self, Payload::Issuance { .. })
    }

    /// Serialize, enforcing the `OP_RETURN` size limit
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let mut out = Vec::with_capacity(MAX_PAYLOAD_SIZE);
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);

        match self {
            Payload::Issuance {
                amount,
                divisibility,
                reissueable,
                metadata,
                instructions,
            } => {
                out.push(TYPE_ISSUANCE);
                out.extend(serialize(&VarInt(*amount)));
                out.push(*divisibility);
                out.push(if *reissueable { FLAG_REISSUEABLE } else { 0 });
                match metadata {
                    MetadataRef::None => out.push(METADATA_NONE),
                    MetadataRef::Commitment(hash) => {
                        out.push(METADATA_COMMITMENT);
                        out.extend_from_slice(hash);
                    }
                    MetadataRef::Inline(bytes) => {
                        out.push(METADATA_INLINE);
                        out.extend(serialize(&VarInt(bytes.len() as u64)));
                        out.extend_from_slice(bytes);
                    }
                }
                encode_instructions(&mut out, instructions)?;
            }
            Payload::Transfer { instructions } => {
                out.push(TYPE_TRANSFER);
                encode_instructions(&mut out, instructions)?;
            }
        }

        if out.len() > MAX_PAYLOAD_SIZE {
            return Err(PayloadError::TooLarge(out.len()));
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let mut reader = Reader { data, pos: 0 };

        if reader.take(2)? != MAGIC {
            return Err(PayloadError::Malformed("missing CC marker".to_string()));
        }
        let version = reader.byte()?;
        if version != VERSION {
            return Err(PayloadError::UnsupportedVersion(version));
        }

        let payload = match reader.byte()? {
            TYPE_ISSUANCE => {
                let amount = reader.varint()?;
                let divisibility = reader.byte()?;
                let flags = reader.byte()?;
                let metadata = match reader.byte()? {
                    METADATA_NONE => MetadataRef::None,
                    METADATA_COMMITMENT => {
                        let mut hash = [0u8; 32];
                        hash.copy_from_slice(reader.take(32)?);
                        MetadataRef::Commitment(hash)
                    }
                    METADATA_INLINE => {
                        let len = reader.varint()? as usize;
                        MetadataRef::Inline(reader.take(len)?.to_vec())
                    }
                    other => {
                        return Err(PayloadError::Malformed(format!(
                            "unknown metadata tag {}",
                            other
                        )))
                    }
                };
                let instructions = reader.instructions()?;
                Payload::Issuance {
                    amount,
                    divisibility,
                    reissueable: flags & FLAG_REISSUEABLE != 0,
                    metadata,
                    instructions,
                }
            }
            TYPE_TRANSFER => Payload::Transfer {
                instructions: reader.instructions()?,
            },
            other => return Err(PayloadError::UnknownType(other)),
        };

        if reader.pos != data.len() {
            return Err(PayloadError::Malformed(format!(
                "{} trailing bytes",
                data.len() - reader.pos
            )));
        }
        Ok(payload)
    }

    /// Encode as an `OP_RETURN` script
    pub fn to_script(&self) -> Result<ScriptBuf, PayloadError> {
        let bytes = PushBytesBuf::try_from(self.encode()?)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        Ok(ScriptBuf::new_op_return(bytes))
    }

    /// Locate the colored payload of a transaction
    ///
    /// Returns the index of the carrying output together with the decoded
    /// payload, `None` when no output carries the `CC` marker.
    pub fn find_in(tx: &Transaction) -> Option<Result<(usize, Payload), PayloadError>> {
        tx.output.iter().enumerate().find_map(|(index, output)| {
            let data = op_return_data(&output.script_pubkey)?;
            if !data.starts_with(&MAGIC) {
                return None;
            }
            Some(Payload::decode(&data).map(|payload| (index, payload)))
        })
    }
}

/// Data pushed by an `OP_RETURN` script, if the script is one
fn op_return_data(script: &bitcoin::Script) -> Option<Vec<u8>> {
    if !script.is_op_return() {
        return None;
    }
    let mut data = Vec::new();
    for instruction in script.instructions().skip(1) {
        match instruction.ok()? {
            ScriptInstruction::PushBytes(bytes) => data.extend_from_slice(bytes.as_bytes()),
            ScriptInstruction::Op(_) => return None,
        }
    }
    Some(data)
}

fn encode_instructions(out: &mut Vec<u8>, instructions: &[Instruction]) -> Result<(), PayloadError> {
    let count = u8::try_from(instructions.len())
        .map_err(|_| PayloadError::TooManyInstructions(instructions.len()))?;
    out.push(count);
    for instruction in instructions {
        out.push(instruction.output);
        out.extend(serialize(&VarInt(instruction.amount)));
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| PayloadError::Malformed("unexpected end of payload".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64, PayloadError> {
        let (value, read) = deserialize_partial::<VarInt>(&self.data[self.pos..])
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        self.pos += read;
        Ok(value.0)
    }

    fn instructions(&mut self) -> Result<Vec<Instruction>, PayloadError> {
        let count = self.byte()? as usize;
        let mut instructions = Vec::with_capacity(count);
        for _ in 0..count {
            let output = self.byte()?;
            let amount = self.varint()?;
            instructions.push(Instruction { output, amount });
        }
        Ok(instructions)
    }
}
