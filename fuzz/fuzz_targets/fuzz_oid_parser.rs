#![no_main]

use libfuzzer_sys::fuzz_target;

use snmp_query::oid::Oid;

fuzz_target!(|data: &[u8]| {
    if let Ok(oid) = Oid::from_ber(data) {
        // Whatever decodes must print and parse back to itself.
        if let Ok(reparsed) = Oid::parse(&oid.to_string()) {
            assert_eq!(oid, reparsed);
        }
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = Oid::parse(s);
    }
});
