#![no_main]

use libfuzzer_sys::fuzz_target;
use repolib_patcher::{
    assembly::{opcodes, CilBody, Instruction},
    metadata::method::MethodBody,
};

fuzz_target!(|data: &[u8]| {
    let Ok(body) = MethodBody::from(data) else {
        return;
    };
    let Ok(mut body) = CilBody::decode(&body) else {
        return;
    };
    body.insert(0, Instruction::new(opcodes::NOP));
    let _ = body.encode();
});
