//! Interpreter fuzz target: decode arbitrary payloads with a grammar that uses
//! every loop-forming kind. Decoding must not panic and must terminate.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const GRAMMAR: &str = r#"
crumbs Arfcn { 2, 8 }

table Item {
    v: uint(3);
    more: union { _: end; next: type(Item); };
}

table Msg {
    kind: uint_lh(4);
    hi: split_crumb(Arfcn, 0);
    n: uint(3);
    lo: split_crumb(Arfcn, 1);
    arfcn: split_bits(Arfcn);
    list: rec_array(4, list_count);
    items: rec_type_array(Item, item_count);
    has_map: next_exists(1);
    map: var_bitmap(n, 1) ?;
    sel: choice {
        (2, 0b00) => a: uint(5);
        (2, 0b01, keep) => b: uint(6);
        (0, 0) => _: trap(DataNotValid, "unknown selector");
    };
    bytes: var_array(n) ?;
    wide: uint(32);
    vals: uint_array(8, wide);
    more_items: var_type_array(Item, wide) ?;
    _: padding_to_end;
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use std::sync::OnceLock;
    static CODEC: OnceLock<Option<csn1dsl::Codec>> = OnceLock::new();
    let codec = CODEC.get_or_init(|| {
        let g = csn1dsl::parse(GRAMMAR).ok()?;
        let r = csn1dsl::ResolvedGrammar::resolve(g, &csn1dsl::Registry::new()).ok()?;
        Some(csn1dsl::Codec::new(r))
    });
    if let Some(codec) = codec {
        let _ = codec.decode_message("Msg", data);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
