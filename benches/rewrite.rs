//! Benchmarks for the hot paths of a patch run.
//!
//! - Parsing the method signatures of every call site
//! - Decoding, editing and re-encoding a method body
//! - Re-serializing metadata after rows were appended

extern crate repolib_patcher;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use repolib_patcher::{
    assembly::{opcodes, CilBody, Instruction},
    metadata::{
        method::MethodBody,
        signatures::{parse_method_signature, parse_type_spec_signature},
        tables::TableId,
        Metadata,
    },
};
use std::hint::black_box;

/// `void RegisterValuable(GameObject)`, the shape of every deprecated call site.
fn bench_deprecated_signature(c: &mut Criterion) {
    // DEFAULT, 1 param, VOID return, CLASS TypeRef 2
    let signature = [0x00, 0x01, 0x01, 0x12, 0x09];

    c.bench_function("sig_register_valuable", |b| {
        b.iter(|| {
            let sig = parse_method_signature(black_box(&signature)).unwrap();
            black_box(sig)
        });
    });
}

/// `PrefabRef RegisterValuable(GameObject, List<string>)`
fn bench_replacement_signature(c: &mut Criterion) {
    // DEFAULT, 2 params, CLASS TypeRef 3, CLASS TypeRef 2, GENERICINST CLASS TypeRef 4 <STRING>
    let signature = [0x00, 0x02, 0x12, 0x0D, 0x12, 0x09, 0x15, 0x12, 0x11, 0x01, 0x0E];

    c.bench_function("sig_register_valuable_levels", |b| {
        b.iter(|| {
            let sig = parse_method_signature(black_box(&signature)).unwrap();
            black_box(sig)
        });
    });
}

/// ``List`1<LevelValuables>`` as a TypeSpec
fn bench_generic_type_spec(c: &mut Criterion) {
    let signature = [0x15, 0x12, 0x11, 0x01, 0x12, 0x15];

    c.bench_function("sig_typespec_list", |b| {
        b.iter(|| {
            let sig = parse_type_spec_signature(black_box(&signature)).unwrap();
            black_box(sig)
        });
    });
}

/// A fat body of `count` call sites, each `ldnull; call; br.s +0`.
fn call_heavy_body(count: usize) -> MethodBody {
    let mut code = Vec::with_capacity(count * 8 + 1);
    for _ in 0..count {
        code.push(0x14);
        code.push(opcodes::CALL);
        code.extend_from_slice(&0x0A00_0001_u32.to_le_bytes());
        code.extend_from_slice(&[opcodes::BR_S, 0x00]);
    }
    code.push(opcodes::RET);

    MethodBody {
        max_stack: 8,
        init_locals: true,
        local_var_sig_token: 0,
        code,
        exception_handlers: Vec::new(),
    }
}

fn bench_body_rewrite(c: &mut Criterion) {
    let body = call_heavy_body(256);

    let mut group = c.benchmark_group("body");
    group.throughput(Throughput::Bytes(body.code.len() as u64));

    group.bench_function("decode_encode", |b| {
        b.iter(|| {
            let decoded = CilBody::decode(black_box(&body)).unwrap();
            black_box(decoded.encode().unwrap())
        });
    });

    // every branch grows past its short form once a pop follows each call
    group.bench_function("insert_pop_after_calls", |b| {
        b.iter(|| {
            let mut decoded = CilBody::decode(black_box(&body)).unwrap();
            let mut index = 0;
            while index < decoded.instructions.len() {
                if decoded.instructions[index].is_call() {
                    decoded.insert_after(index, Instruction::new(opcodes::POP));
                    index += 1;
                }
                index += 1;
            }
            black_box(decoded.encode().unwrap())
        });
    });

    group.finish();
}

fn bench_metadata_serialize(c: &mut Criterion) {
    let mut metadata = Metadata::new("v4.0.30319");
    let module = metadata.strings.add("Plugin.dll").unwrap();
    metadata
        .tables
        .push_row(TableId::Module, &[0, module, 0, 0, 0])
        .unwrap();
    for index in 0..512 {
        let name = metadata.strings.add(&format!("Method{index}")).unwrap();
        let signature = metadata.blobs.add(&[0x00, 0x00, 0x01]).unwrap();
        metadata
            .tables
            .push_row(TableId::MemberRef, &[0x09, name, signature])
            .unwrap();
    }
    let data = metadata.serialize().unwrap();

    let mut group = c.benchmark_group("metadata");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("read", |b| {
        b.iter(|| black_box(Metadata::read(black_box(&data)).unwrap()));
    });
    group.bench_function("serialize", |b| {
        b.iter(|| black_box(metadata.serialize().unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_deprecated_signature,
    bench_replacement_signature,
    bench_generic_type_spec,
    bench_body_rewrite,
    bench_metadata_serialize
);
criterion_main!(benches);
