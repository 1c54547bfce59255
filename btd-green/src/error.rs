//! Error taxonomy for the BTD Green function engine.
//!
//! Modeled on `StruqtureError` (`struqture::StruqtureError`): a single
//! flat `thiserror` enum rather than per-module error types, since every
//! caller of this crate ends up matching against the same handful of
//! failure classes described in spec §7.

use num_complex::Complex64;

/// Failure classes produced by this crate. See spec §7 for the taxonomy
/// this mirrors: `InvalidArgument`, `NumericSingularity`, `NotImplemented`,
/// `IO/Config`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown electrode, bad format/method combination, non-contiguous
    /// index span, malformed block key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A block inverse in the BTD forward/backward recurrence, or in the
    /// diagonal-tile formulae, hit a singular (or effectively singular)
    /// matrix. Callers may retry with a small imaginary part added to `E`.
    #[error("numeric singularity at E={e}, k=({}, {}, {}): {detail}", k[0], k[1], k[2])]
    NumericSingularity {
        e: Complex64,
        k: [f64; 3],
        detail: String,
    },

    /// A requested format/method combination is currently unsupported
    /// (e.g. `spectral` with `method = propagate` and `format = sparse`).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Missing files, unparsable configuration blocks.
    #[error("configuration error: {0}")]
    Config(String),

    /// An electrode name was not found among the registered electrodes.
    #[error("unknown electrode {0:?}")]
    UnknownElectrode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn singular(e: Complex64, k: [f64; 3], detail: impl Into<String>) -> Self {
        Error::NumericSingularity {
            e,
            k,
            detail: detail.into(),
        }
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }
}
