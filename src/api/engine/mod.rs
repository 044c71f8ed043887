mod fallback;

pub(crate) use fallback::{open_upstream, Established, UpstreamCall};
