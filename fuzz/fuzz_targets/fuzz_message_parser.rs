#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use snmp_query::ber::Decoder;
use snmp_query::message::{CommunityMessage, Message, V3Message};
use snmp_query::pdu::Pdu;
use snmp_query::v3::UsmSecurityParams;

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    if let Ok(Message::V3(msg)) = Message::decode(bytes.clone()) {
        let _ = UsmSecurityParams::decode(msg.security_params.clone());
    }
    let _ = CommunityMessage::decode(bytes.clone());
    let _ = V3Message::decode(bytes.clone());
    let _ = UsmSecurityParams::decode(bytes.clone());

    if let Some((offset, len)) = UsmSecurityParams::find_auth_params_offset(data) {
        assert!(offset + len <= data.len());
    }

    let mut decoder = Decoder::new(bytes);
    let _ = Pdu::decode(&mut decoder);
});
