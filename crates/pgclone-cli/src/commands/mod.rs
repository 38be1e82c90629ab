pub mod clone;
pub mod compare;
pub mod follow;
pub mod list;
pub mod ping;
pub mod sentinel;
pub mod snapshot;
pub mod stream;
pub mod support;
