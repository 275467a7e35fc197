//! The sound-macro bytecode interpreter: fetch/decode/execute over a pool
//! object's payload bytes, driving one voice's pitch/volume/pan/sample state.
//!
//! Opcodes are fixed-size, one byte plus a per-opcode argument block. The
//! interpreter runs to completion on each `run` call, blocking only on
//! `Wait`, which consumes ticks across calls via a countdown.

/// One decoded bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MacroOp {
    Stop,
    StartSample { samp_id: u16, offset: i32 },
    StopSample,
    SetVolume { vol: u8 },
    ScaleVolume { percent: u8 },
    SetPan { pan: i8 },
    SetSurroundPan { span: i8 },
    SetReverbVol { rvol: u8 },
    SetPitchKey { cents: i32 },
    SetPitchFrequency { hz: u32, fine: u16 },
    SetPitchAdsr { adsr_id: u16, cents: i32 },
    SetPitchWheelRange { up: i8, down: i8 },
    SetAdsr { adsr_id: u16 },
    SetKeygroup { kg: u8 },
    MessageSelf { val: i32 },
    PlayMacro { add_note: i8, macro_id: u16, macro_step: u16 },
    Wait { ticks: u16 },
    BranchIfCtrl { ctrl: u8, cmp_val: u8, target_pc: u16 },
    SetCtrlValue { ctrl: u8, val: i8 },
}

const OP_STOP: u8 = 0;
const OP_START_SAMPLE: u8 = 1;
const OP_STOP_SAMPLE: u8 = 2;
const OP_SET_VOLUME: u8 = 3;
const OP_SCALE_VOLUME: u8 = 4;
const OP_SET_PAN: u8 = 5;
const OP_SET_SURROUND_PAN: u8 = 6;
const OP_SET_REVERB_VOL: u8 = 7;
const OP_SET_PITCH_KEY: u8 = 8;
const OP_SET_PITCH_FREQUENCY: u8 = 9;
const OP_SET_PITCH_ADSR: u8 = 10;
const OP_SET_PITCH_WHEEL_RANGE: u8 = 11;
const OP_SET_ADSR: u8 = 12;
const OP_SET_KEYGROUP: u8 = 13;
const OP_MESSAGE_SELF: u8 = 14;
const OP_PLAY_MACRO: u8 = 15;
const OP_WAIT: u8 = 16;
const OP_BRANCH_IF_CTRL: u8 = 17;
const OP_SET_CTRL_VALUE: u8 = 18;

/// Decodes one instruction at `pc`, returning the op and the pc just past it.
/// `None` on truncated/unknown data, which the interpreter treats as an
/// implicit `Stop`.
pub fn decode_op(code: &[u8], pc: usize) -> Option<(MacroOp, usize)> {
    let opcode = *code.get(pc)?;
    let args = code.get(pc + 1..)?;
    let (op, len) = match opcode {
        OP_STOP => (MacroOp::Stop, 0),
        OP_START_SAMPLE => {
            let samp_id = read_u16(args, 0)?;
            let offset = read_i32(args, 2)?;
            (MacroOp::StartSample { samp_id, offset }, 6)
        }
        OP_STOP_SAMPLE => (MacroOp::StopSample, 0),
        OP_SET_VOLUME => (MacroOp::SetVolume { vol: *args.first()? }, 1),
        OP_SCALE_VOLUME => (MacroOp::ScaleVolume { percent: *args.first()? }, 1),
        OP_SET_PAN => (MacroOp::SetPan { pan: *args.first()? as i8 }, 1),
        OP_SET_SURROUND_PAN => (MacroOp::SetSurroundPan { span: *args.first()? as i8 }, 1),
        OP_SET_REVERB_VOL => (MacroOp::SetReverbVol { rvol: *args.first()? }, 1),
        OP_SET_PITCH_KEY => (MacroOp::SetPitchKey { cents: read_i32(args, 0)? }, 4),
        OP_SET_PITCH_FREQUENCY => {
            let hz = read_u32(args, 0)?;
            let fine = read_u16(args, 4)?;
            (MacroOp::SetPitchFrequency { hz, fine }, 6)
        }
        OP_SET_PITCH_ADSR => {
            let adsr_id = read_u16(args, 0)?;
            let cents = read_i32(args, 2)?;
            (MacroOp::SetPitchAdsr { adsr_id, cents }, 6)
        }
        OP_SET_PITCH_WHEEL_RANGE => {
            let up = *args.first()? as i8;
            let down = *args.get(1)? as i8;
            (MacroOp::SetPitchWheelRange { up, down }, 2)
        }
        OP_SET_ADSR => (MacroOp::SetAdsr { adsr_id: read_u16(args, 0)? }, 2),
        OP_SET_KEYGROUP => (MacroOp::SetKeygroup { kg: *args.first()? }, 1),
        OP_MESSAGE_SELF => (MacroOp::MessageSelf { val: read_i32(args, 0)? }, 4),
        OP_PLAY_MACRO => {
            let add_note = *args.first()? as i8;
            let macro_id = read_u16(args, 1)?;
            let macro_step = read_u16(args, 3)?;
            (
                MacroOp::PlayMacro {
                    add_note,
                    macro_id,
                    macro_step,
                },
                5,
            )
        }
        OP_WAIT => (MacroOp::Wait { ticks: read_u16(args, 0)? }, 2),
        OP_BRANCH_IF_CTRL => {
            let ctrl = *args.first()?;
            let cmp_val = *args.get(1)?;
            let target_pc = read_u16(args, 2)?;
            (
                MacroOp::BranchIfCtrl {
                    ctrl,
                    cmp_val,
                    target_pc,
                },
                4,
            )
        }
        OP_SET_CTRL_VALUE => {
            let ctrl = *args.first()?;
            let val = *args.get(1)? as i8;
            (MacroOp::SetCtrlValue { ctrl, val }, 2)
        }
        _ => return None,
    };
    Some((op, pc + 1 + len))
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(raw))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

fn read_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    read_u32(bytes, offset).map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_set_volume_then_wait() {
        let code = [OP_SET_VOLUME, 100, OP_WAIT, 0, 10, OP_STOP];
        let (op, pc) = decode_op(&code, 0).unwrap();
        assert_eq!(op, MacroOp::SetVolume { vol: 100 });
        let (op, pc) = decode_op(&code, pc).unwrap();
        assert_eq!(op, MacroOp::Wait { ticks: 10 });
        let (op, _) = decode_op(&code, pc).unwrap();
        assert_eq!(op, MacroOp::Stop);
    }

    #[test]
    fn decodes_start_sample_with_signed_offset() {
        let mut code = vec![OP_START_SAMPLE];
        code.extend_from_slice(&7u16.to_be_bytes());
        code.extend_from_slice(&(-1i32).to_be_bytes());
        let (op, pc) = decode_op(&code, 0).unwrap();
        assert_eq!(
            op,
            MacroOp::StartSample {
                samp_id: 7,
                offset: -1
            }
        );
        assert_eq!(pc, code.len());
    }

    #[test]
    fn truncated_instruction_decodes_to_none() {
        let code = [OP_SET_PITCH_KEY, 0, 0];
        assert!(decode_op(&code, 0).is_none());
    }
}
