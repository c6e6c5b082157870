//! The 7-byte LED control protocol.
//!
//! Frame layout: `[opcode][index][R][G][B][reserved][reserved]`. There are no
//! response frames.

mod codec;

pub use codec::FrameCodec;

use crate::color::Rgb;
use crate::error::DecodeError;
use crate::grid::GridLayout;

pub const PORT_NUMBER: u16 = 55555;
pub const PROTOCOL_MSG_SIZE: usize = 7;
/// Read timeout meaning "never time out an idle connection"
pub const READ_TIMEOUT: i64 = -1;
pub const NUMBER_OF_LEDS: usize = 32;

pub const CMD_SETSTRIPE: u8 = 16;
pub const CMD_SETROW: u8 = 12;
pub const CMD_DEMO: u8 = 254;
pub const CMD_FADEALLTOWHITE: u8 = 22;
pub const CMD_FADEALLTOBLACK: u8 = 21;

/// One decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetStripe { index: u8, color: Rgb },
    SetRow { index: u8, color: Rgb },
    Demo,
    FadeAllToWhite,
    FadeAllToBlack,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetStripe { .. } => CMD_SETSTRIPE,
            Command::SetRow { .. } => CMD_SETROW,
            Command::Demo => CMD_DEMO,
            Command::FadeAllToWhite => CMD_FADEALLTOWHITE,
            Command::FadeAllToBlack => CMD_FADEALLTOBLACK,
        }
    }

    /// Wire form of the command; unused and reserved bytes are zero.
    pub fn encode(&self) -> [u8; PROTOCOL_MSG_SIZE] {
        let mut frame = [0u8; PROTOCOL_MSG_SIZE];
        frame[0] = self.opcode();
        if let Command::SetStripe { index, color } | Command::SetRow { index, color } = *self {
            frame[1] = index;
            frame[2] = color.r;
            frame[3] = color.g;
            frame[4] = color.b;
        }
        frame
    }
}

/// Decode exactly one frame, validating indices against `layout`.
pub fn decode(bytes: &[u8], layout: &GridLayout) -> Result<Command, DecodeError> {
    let frame: &[u8; PROTOCOL_MSG_SIZE] = match bytes.try_into() {
        Ok(frame) => frame,
        Err(_) if bytes.len() < PROTOCOL_MSG_SIZE => {
            return Err(DecodeError::IncompleteFrame {
                received: bytes.len(),
                expected: PROTOCOL_MSG_SIZE,
            })
        }
        Err(_) => {
            return Err(DecodeError::OversizedFrame {
                received: bytes.len(),
                expected: PROTOCOL_MSG_SIZE,
            })
        }
    };

    let [opcode, index, r, g, b, _, _] = *frame;
    let color = Rgb::new(r, g, b);
    let check = |limit: usize| {
        if usize::from(index) < limit {
            Ok(index)
        } else {
            Err(DecodeError::IndexOutOfRange {
                opcode,
                index,
                limit,
            })
        }
    };

    match opcode {
        CMD_SETSTRIPE => Ok(Command::SetStripe {
            index: check(layout.stripes())?,
            color,
        }),
        CMD_SETROW => Ok(Command::SetRow {
            index: check(layout.rows())?,
            color,
        }),
        CMD_DEMO => Ok(Command::Demo),
        CMD_FADEALLTOWHITE => Ok(Command::FadeAllToWhite),
        CMD_FADEALLTOBLACK => Ok(Command::FadeAllToBlack),
        other => Err(DecodeError::UnknownOpcode(other)),
    }
}
