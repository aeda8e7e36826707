//! Common test fixtures and constants.

use snmp_query::{Oid, Value, oid};

// =============================================================================
// Standard system MIB OIDs (1.3.6.1.2.1.1.*)
// =============================================================================

pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}
pub fn sys_object_id() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 2, 0)
}
pub fn sys_uptime() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)
}
pub fn sys_contact() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)
}
pub fn sys_name() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)
}
pub fn sys_location() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 6, 0)
}

/// System subtree root: 1.3.6.1.2.1.1
pub fn system_subtree() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1)
}

/// ifDescr column: 1.3.6.1.2.1.2.2.1.2
pub fn if_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2)
}

/// ifType column: 1.3.6.1.2.1.2.2.1.3
pub fn if_type() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3)
}

/// Nonexistent OID for noSuchObject / noSuchName checks.
pub fn nonexistent_oid() -> Oid {
    oid!(1, 3, 6, 1, 99, 99, 99, 0)
}

/// The objects every fake agent serves: six system scalars and a
/// three-row interface table.
pub fn standard_mib() -> Vec<(Oid, Value)> {
    let mut mib = vec![
        (sys_descr(), Value::OctetString("Fake agent 1.0".into())),
        (sys_object_id(), Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1, 8072, 3, 2, 10))),
        (sys_uptime(), Value::TimeTicks(123_456)),
        (sys_contact(), Value::OctetString("noc@example.net".into())),
        (sys_name(), Value::OctetString("edge-router-1".into())),
        (sys_location(), Value::OctetString("rack 4".into())),
    ];
    for (index, name) in [(1, "lo"), (2, "eth0"), (3, "eth1")] {
        mib.push((if_descr().child(index), Value::OctetString(name.into())));
        mib.push((if_type().child(index), Value::Integer(if index == 1 { 24 } else { 6 })));
    }
    mib
}

// =============================================================================
// Credentials
// =============================================================================

pub const COMMUNITY: &str = "public";
pub const AUTH_PASSWORD: &str = "authpass123";
pub const PRIV_PASSWORD: &str = "privpass123";

pub mod users {
    pub const NOAUTH_USER: &str = "noauth_user";
    pub const AUTHSHA256_USER: &str = "authsha256_user";
    pub const PRIVAES128_USER: &str = "privaes128_user";
    pub const PRIVDES_USER: &str = "privdes_user";
}

/// Route `RUST_LOG` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
