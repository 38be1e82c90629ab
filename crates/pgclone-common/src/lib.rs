//! Ambient stack shared by every pgclone crate: the error taxonomy, the
//! cancellation token passed to every worker, retry/backoff helpers, and
//! logging setup.

pub mod cancel;
pub mod error;
pub mod logging;
pub mod pidfile;
pub mod retry;

pub use cancel::{CancelHandle, CancelState, CancelToken};
pub use error::{CatalogError, Error};
pub use pidfile::PidGuard;

/// Result alias used across worker-facing APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// A stable identifier for a work item (`TablePart`, `Index`, ...), logged
/// on every error so operators can correlate failures with catalog rows
/// without re-deriving them from a qualified name each time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct WorkItemId(pub String);

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic LSN newtype. Postgres LSNs are `u64`s formatted as `%X/%X`; we
/// keep both representations since the catalog stores the integer form but
/// every CLI surface and log line prints the textual one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn parse(s: &str) -> Result<Lsn> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| Error::Other(anyhow::anyhow!("invalid LSN {s:?}")))?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|e| Error::Other(anyhow::anyhow!("invalid LSN {s:?}: {e}")))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|e| Error::Other(anyhow::anyhow!("invalid LSN {s:?}: {e}")))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_round_trips_through_its_text_form() {
        let lsn = Lsn::parse("16/B374D848").unwrap();
        assert_eq!(lsn.to_string(), "16/B374D848");
    }

    #[test]
    fn lsn_orders_numerically_not_lexically() {
        let a = Lsn::parse("1/0").unwrap();
        let b = Lsn::parse("A/0").unwrap();
        assert!(a < b);
    }
}
