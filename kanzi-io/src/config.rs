//! Stream configuration.
//!
//! Every option is validated up front, and the `level` presets expand to a
//! transform chain plus entropy codec.

use kanzi_core::error::{KanziError, Result};
use kanzi_entropy::factory as entropy_factory;
use kanzi_transform::factory as transform_factory;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 1024;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024 * 1024;
/// Largest accepted worker count.
pub const MAX_CONCURRENCY: usize = 64;

/// Validated stream configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Block size in bytes, multiple of 16 in `[1 KiB, 1 GiB]`.
    pub block_size: usize,
    /// Worker count in `[1, 64]`.
    pub jobs: usize,
    /// Enable per-block xxhash32 checksums.
    pub checksum: bool,
    /// Entropy codec token.
    pub entropy: u32,
    /// 48-bit transform chain type.
    pub transform: u64,
    /// Declared input size, when known up front.
    pub file_size: Option<u64>,
    /// Store blocks whose order-0 entropy crosses the threshold.
    pub skip_blocks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 1024 * 1024,
            jobs: 1,
            checksum: false,
            entropy: entropy_factory::NONE_TYPE,
            transform: 0,
            file_size: None,
            skip_blocks: false,
        }
    }
}

impl Config {
    /// Configuration from codec and transform names.
    pub fn from_names(entropy: &str, transform: &str) -> Result<Self> {
        Ok(Self {
            entropy: entropy_factory::entropy_type(entropy)?,
            transform: transform_factory::transform_type(transform)?,
            ..Self::default()
        })
    }

    /// Convenience presets 0..5 overriding codec and transform.
    pub fn from_level(level: u32) -> Result<Self> {
        let (transform, entropy) = match level {
            0 => ("NONE", "NONE"),
            1 => ("TEXT+LZ4", "HUFFMAN"),
            2 => ("BWT+RANK+ZRLT", "ANS0"),
            3 => ("BWT+RANK+ZRLT", "FPAQ"),
            4 => ("BWT", "CM"),
            5 => ("X86+RLT+TEXT", "TPAQ"),
            _ => {
                return Err(KanziError::invalid_argument(format!(
                    "Invalid compression level: {level} (must be in [0..5])"
                )));
            }
        };

        Self::from_names(entropy, transform)
    }

    /// Check every field, returning `InvalidArgument` on the first offender.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(KanziError::BlockSize {
                size: self.block_size as u64,
            });
        }

        if self.block_size > MAX_BLOCK_SIZE {
            return Err(KanziError::BlockSize {
                size: self.block_size as u64,
            });
        }

        if self.block_size & 15 != 0 {
            return Err(KanziError::invalid_argument(
                "The block size must be a multiple of 16",
            ));
        }

        if self.jobs == 0 || self.jobs > MAX_CONCURRENCY {
            return Err(KanziError::invalid_argument(format!(
                "The number of jobs must be in [1..{MAX_CONCURRENCY}]"
            )));
        }

        entropy_factory::entropy_name(self.entropy)?;
        transform_factory::transform_name(self.transform)?;
        Ok(())
    }

    /// Worker count after the memory clamp: `block_size * jobs < 2^31`.
    pub fn effective_jobs(&self) -> usize {
        let mut jobs = self.jobs;

        if (self.block_size as u64) * (jobs as u64) >= 1 << 31 {
            jobs = ((1u64 << 31) / self.block_size as u64) as usize;
        }

        jobs.max(1)
    }

    /// Declared block count for the header: 0 when unknown, 63 capped.
    pub fn declared_blocks(&self) -> u64 {
        match self.file_size {
            None => 0,
            Some(sz) => {
                let nb = sz.div_ceil(self.block_size as u64);
                nb.min(63)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_levels() {
        for level in 0..=5 {
            let cfg = Config::from_level(level).unwrap();
            cfg.validate().unwrap();
        }

        assert!(Config::from_level(6).is_err());

        let cfg = Config::from_level(2).unwrap();
        assert_eq!(
            cfg.transform,
            transform_factory::transform_type("BWT+RANK+ZRLT").unwrap()
        );
        assert_eq!(cfg.entropy, entropy_factory::entropy_type("ANS0").unwrap());
    }

    #[test]
    fn test_block_size_bounds() {
        let mut cfg = Config::default();
        cfg.block_size = 512;
        assert!(cfg.validate().is_err());

        cfg.block_size = 1024 + 8;
        assert!(cfg.validate().is_err());

        cfg.block_size = 1024;
        cfg.validate().unwrap();
    }

    #[test]
    fn test_jobs_bounds() {
        let mut cfg = Config::default();
        cfg.jobs = 0;
        assert!(cfg.validate().is_err());
        cfg.jobs = 65;
        assert!(cfg.validate().is_err());
        cfg.jobs = 64;
        cfg.validate().unwrap();
    }

    #[test]
    fn test_effective_jobs_clamp() {
        let mut cfg = Config::default();
        cfg.block_size = 1 << 30;
        cfg.jobs = 16;
        assert_eq!(cfg.effective_jobs(), 2);
    }

    #[test]
    fn test_declared_blocks() {
        let mut cfg = Config::default();
        assert_eq!(cfg.declared_blocks(), 0);

        cfg.file_size = Some(3 * cfg.block_size as u64 + 1);
        assert_eq!(cfg.declared_blocks(), 4);

        cfg.file_size = Some(u64::MAX);
        assert_eq!(cfg.declared_blocks(), 63);
    }
}
