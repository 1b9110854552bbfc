//! Responses peers send to this node's requests, plus unsolicited
//! announcements (`inv`, `addr`).

pub(crate) mod addr;
pub(crate) mod filters;
pub(crate) mod headers;
pub(crate) mod inv;
pub(crate) mod not_found;

pub use addr::{Addr, MAX_ADDR_SIZE};
pub use filters::{CFCheckpt, CFHeaders, CFilter, MAX_CFHEADERS_SIZE};
pub use headers::Headers;
pub use inv::Inv;
pub use not_found::NotFound;
