#![no_main]
use folio_events::{balance, NamespaceAdapter};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut adapter = NamespaceAdapter::new(Vec::new());
    if adapter.start_document().is_err() {
        return;
    }
    let mut open = Vec::new();
    for chunk in data.chunks(2) {
        let op = chunk[0];
        let prefix = chunk.get(1).copied().unwrap_or(0) % 4;
        if op % 2 == 0 {
            let name = format!("p{}:e", prefix);
            let decl = format!("xmlns:p{}", prefix);
            if adapter.start_element(&name, &[(decl.as_str(), "urn:fuzz")]).is_err() {
                return;
            }
            open.push(name);
        } else if let Some(name) = open.pop() {
            if adapter.end_element(&name).is_err() {
                return;
            }
        }
    }
    while let Some(name) = open.pop() {
        if adapter.end_element(&name).is_err() {
            return;
        }
    }
    if adapter.end_document().is_ok() {
        assert!(balance::validate(&adapter.into_inner()).is_ok());
    }
});
