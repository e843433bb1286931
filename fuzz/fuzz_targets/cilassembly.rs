#![no_main]

use libfuzzer_sys::fuzz_target;
use repolib_patcher::{
    patcher::{ModuleEditor, ModuleView},
    CilAssembly, OpenMode,
};

fuzz_target!(|data: &[u8]| {
    let Ok(assembly) = CilAssembly::from_mem(data.to_vec(), OpenMode::ReadOnly) else {
        return;
    };
    let Ok(types) = assembly.types() else {
        return;
    };
    for method in types.iter().flat_map(|ty| &ty.methods) {
        let _ = assembly.resolve_method(method.token);
        let _ = assembly.method_body(method.token);
    }
});
