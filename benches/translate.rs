//! Benchmarks for method translation.
//!
//! Measures the full pipeline from a code array to a finished SSA function:
//! - Straight-line arithmetic
//! - A counting loop with phis and a back-edge
//! - A long chain of diamonds, stressing phi construction
//! - A batch of methods through the parallel driver

extern crate stacklift;

use criterion::{criterion_group, criterion_main, Criterion};
use stacklift::{
    bytecode::{Assembler, Opcode},
    method::MethodBody,
    translate, translate_all, TranslatorOptions,
};
use std::hint::black_box;

fn method(name: &str, descriptor: &str, asm: Assembler, max_stack: u16, max_locals: u16) -> MethodBody {
    MethodBody::new("Bench", name, descriptor)
        .unwrap()
        .with_static(true)
        .with_code(asm.finish().unwrap())
        .with_max_stack(max_stack)
        .with_max_locals(max_locals)
}

fn straight_line() -> MethodBody {
    let mut asm = Assembler::new();
    asm.iload(0).unwrap();
    for i in 0..64 {
        asm.iload(1).unwrap().iconst(i).unwrap().imul().unwrap().iadd().unwrap();
    }
    asm.ireturn().unwrap();
    method("straight", "(II)I", asm, 3, 2)
}

fn counting_loop() -> MethodBody {
    let mut asm = Assembler::new();
    asm.iconst(0).unwrap().istore(1).unwrap().iconst(0).unwrap().istore(2).unwrap();
    asm.label("head").unwrap().iload(2).unwrap().iload(0).unwrap();
    asm.branch(Opcode::IfIcmpge, "done").unwrap();
    asm.iload(1).unwrap().iload(2).unwrap().iadd().unwrap().istore(1).unwrap();
    asm.iinc(2, 1).unwrap().goto("head").unwrap();
    asm.label("done").unwrap().iload(1).unwrap().ireturn().unwrap();
    method("sum", "(I)I", asm, 2, 3)
}

/// `count` diamonds in a row, each merging four locals.
fn diamonds(count: usize) -> MethodBody {
    let mut asm = Assembler::new();
    for i in 0..count {
        let (other, join) = (format!("other{i}"), format!("join{i}"));
        asm.iload(0).unwrap().branch(Opcode::Ifeq, &other).unwrap();
        asm.iinc(1, 1).unwrap().iinc(2, 2).unwrap().goto(&join).unwrap();
        asm.label(&other).unwrap().iinc(3, 1).unwrap().iinc(4, -1).unwrap();
        asm.label(&join).unwrap();
    }
    asm.iload(1).unwrap().iload(2).unwrap().iadd().unwrap();
    asm.iload(3).unwrap().iadd().unwrap().iload(4).unwrap().iadd().unwrap();
    asm.ireturn().unwrap();
    method("diamonds", "(IIIII)I", asm, 2, 5)
}

fn bench_straight_line(c: &mut Criterion) {
    let m = straight_line();
    let options = TranslatorOptions::default();
    c.bench_function("translate_straight_line", |b| {
        b.iter(|| black_box(translate(black_box(&m), &options).unwrap()));
    });
}

fn bench_loop(c: &mut Criterion) {
    let m = counting_loop();
    let options = TranslatorOptions::default();
    c.bench_function("translate_counting_loop", |b| {
        b.iter(|| black_box(translate(black_box(&m), &options).unwrap()));
    });
}

fn bench_diamonds(c: &mut Criterion) {
    let m = diamonds(200);
    let mut group = c.benchmark_group("translate_diamonds");
    for (name, options) in [
        ("production", TranslatorOptions::production()),
        ("no_liveness", TranslatorOptions::production().with_liveness(false)),
        ("strict", TranslatorOptions::strict()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(translate(black_box(&m), &options).unwrap()));
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let methods: Vec<_> = (0..64)
        .map(|i| if i % 2 == 0 { counting_loop() } else { diamonds(20) })
        .collect();
    let options = TranslatorOptions::default();
    c.bench_function("translate_all_64", |b| {
        b.iter(|| black_box(translate_all(black_box(&methods), &options)));
    });
}

criterion_group!(
    benches,
    bench_straight_line,
    bench_loop,
    bench_diamonds,
    bench_batch
);
criterion_main!(benches);
