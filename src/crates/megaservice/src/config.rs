//! Environment-driven switches.

use std::sync::OnceLock;

/// Whether verbose payload logging is enabled (`LOGFLAG` truthy).
///
/// The probe runs once per process; later changes to the environment are not
/// observed.
pub fn logflag() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| {
        std::env::var("LOGFLAG")
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false)
    })
}

/// Whether distributed-tracing spans around node calls and stream emission
/// are enabled (`TELEMETRY_ENDPOINT` set and non-empty).
pub fn telemetry_enabled() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var("TELEMETRY_ENDPOINT").is_ok_and(|v| !v.is_empty()))
}
