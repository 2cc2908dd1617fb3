#![no_main]

use libfuzzer_sys::fuzz_target;
use stacklift::{method::MethodBody, translate, TranslatorOptions};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let Ok(method) = MethodBody::new("Fuzz", "run", "(IJLjava/lang/Object;)I") else {
        return;
    };
    let method = method
        .with_static(true)
        .with_max_stack(u16::from(data[0] % 16))
        .with_max_locals(4 + u16::from(data[1] % 8))
        .with_code(data[2..].to_vec());
    let _ = translate(&method, &TranslatorOptions::strict());
});
