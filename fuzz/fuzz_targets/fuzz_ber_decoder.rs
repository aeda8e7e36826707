#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use snmp_query::ber::Decoder;
use snmp_query::transport::extract_request_id;
use snmp_query::value::Value;
use snmp_query::varbind::{VarBind, decode_varbind_list};

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_integer();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_octet_string();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_oid();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_ip_address();

    // Nested lengths must never read past the outer sequence.
    let mut decoder = Decoder::new(bytes.clone());
    if let Ok(mut seq) = decoder.read_sequence() {
        while !seq.is_empty() {
            if seq.skip_tlv().is_err() {
                break;
            }
        }
    }

    let mut decoder = Decoder::new(bytes.clone());
    let _ = Value::decode(&mut decoder);

    let mut decoder = Decoder::new(bytes.clone());
    let _ = VarBind::decode(&mut decoder);

    let mut decoder = Decoder::new(bytes);
    let _ = decode_varbind_list(&mut decoder);

    // Runs on every received datagram before any other validation.
    let _ = extract_request_id(data);
});
