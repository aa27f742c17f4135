//! Utility modules
//!
//! Provides address parsing and the DNS record encodings:
//! - [`dkim`]: DKIM key generation and TXT records (RFC 6376, RFC 8463)
//! - [`dmarc`]: DMARC TXT records (RFC 7489)
//! - [`email`]: Email address and domain validation (RFC 5321)
//! - [`tlsrpt`]: TLS reporting TXT records (RFC 8460)
//! - [`txt`]: TXT string folding

pub mod dkim;
pub mod dmarc;
pub mod email;
pub mod tlsrpt;
pub mod txt;

pub use email::{parse_address, parse_domain, Address};
pub use txt::txt_strings;
