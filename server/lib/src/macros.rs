//! Tagged logging event macros. Every security decision and administrative
//! fault in the server logs through one of these so downstream collectors
//! can filter on the `event_tag` field.

#[macro_export]
macro_rules! tagged_event {
    ($level:ident, $tag:expr, $($arg:tt)*) => {{
        tracing::event!(tracing::Level::$level, event_tag = $tag, $($arg)*)
    }}
}

#[macro_export]
macro_rules! admin_error {
    ($($arg:tt)*) => { $crate::tagged_event!(ERROR, "admin.error", $($arg)*) }
}

#[macro_export]
macro_rules! admin_warn {
    ($($arg:tt)*) => { $crate::tagged_event!(WARN, "admin.warn", $($arg)*) }
}

#[macro_export]
macro_rules! admin_info {
    ($($arg:tt)*) => { $crate::tagged_event!(INFO, "admin.info", $($arg)*) }
}

#[macro_export]
macro_rules! request_error {
    ($($arg:tt)*) => { $crate::tagged_event!(ERROR, "request.error", $($arg)*) }
}

#[macro_export]
macro_rules! request_trace {
    ($($arg:tt)*) => { $crate::tagged_event!(TRACE, "request.trace", $($arg)*) }
}

#[macro_export]
macro_rules! security_critical {
    ($($arg:tt)*) => { $crate::tagged_event!(INFO, "security.critical", $($arg)*) }
}

#[macro_export]
macro_rules! security_access {
    ($($arg:tt)*) => { $crate::tagged_event!(INFO, "security.access", $($arg)*) }
}

#[macro_export]
macro_rules! security_error {
    ($($arg:tt)*) => { $crate::tagged_event!(ERROR, "security.error", $($arg)*) }
}
