//! Streaming delivery: source validation, range negotiation, local serving
//! and the remote proxy.

mod content_type;
mod delivery;
mod range;
mod url_policy;

pub use content_type::{detect_content_type, is_generic_content_type, FALLBACK_CONTENT_TYPE};
pub use delivery::{
    DeliveryError, DeliverySettings, DeliveryStage, StreamDelivery, DEFAULT_USER_AGENT,
};
pub use range::{
    parse_content_range, parse_range_request, ByteRange, ResolvedRange, HEADER_BYTE_RANGE,
};
pub use url_policy::{is_expired, SourceRejection, UrlPolicy, DEFAULT_ALLOWED_HOSTS};
