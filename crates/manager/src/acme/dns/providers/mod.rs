//! DNS provider implementations
//!
//! Available providers:
//! - [`CloudflareProvider`] - Cloudflare v4 API
//! - [`DnspodProvider`] - Tencent Cloud DNSPod

mod cloudflare;
mod dnspod;

pub use cloudflare::CloudflareProvider;
pub use dnspod::DnspodProvider;
