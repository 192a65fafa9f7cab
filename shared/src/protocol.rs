/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Form fields of a registration announcement
pub const FORM_CODE: &str = "code";
pub const FORM_PORT: &str = "port";

/// Proxy forwarding headers honoured by the registrar
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Exact body a registered service must answer a probe with
pub const PROBE_SENTINEL: &str = "OK";

/// Address and port an endpoint is reset to once it fails a probe
pub const UNREACHABLE_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 80;
pub const TLS_PORT: u16 = 443;
