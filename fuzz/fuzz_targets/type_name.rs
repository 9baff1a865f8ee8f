#![no_main]

use dotrun::metadata::typesystem::TypeName;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(parsed) = TypeName::parse(input) {
            let canonical = parsed.canonical();
            let _ = TypeName::parse(&canonical);
        }
    }
});
