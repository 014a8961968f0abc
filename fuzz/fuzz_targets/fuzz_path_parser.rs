#![no_main]

use libfuzzer_sys::fuzz_target;
use tform_core::{InstancePath, ValuePath};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(path) = text.parse::<ValuePath>() {
        let rendered = path.to_string();
        let reparsed: ValuePath = rendered.parse().expect("rendered value path parses");
        assert_eq!(reparsed, path);
        let _ = path.resolve_reference(text);
    }

    if let Ok(path) = text.parse::<InstancePath>() {
        if let Ok(reparsed) = path.to_string().parse::<InstancePath>() {
            assert_eq!(reparsed, path);
        }
    }
});
