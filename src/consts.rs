//! Mathematical and numerical constants

/// 0.5 ln(2π)
pub const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;
/// ln(2π)
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;
/// sqrt(2π)
pub const SQRT_2PI: f64 = 2.506_628_274_631_000_7;
/// sqrt(5)
pub const SQRT_5: f64 = 2.236_067_977_499_79;

/// Smallest noise variance an inferred-noise likelihood may take
pub const MIN_INFERRED_NOISE_LEVEL: f64 = 1E-4;

/// Jitter added to Schur complements before a root decomposition
pub const DEFAULT_CHOLESKY_JITTER: f64 = 1E-8;

/// Eigenvalues below this fraction of the largest one are treated as zero
/// when inverting a root.
pub const EIGEN_RELATIVE_CUTOFF: f64 = 1E-12;
