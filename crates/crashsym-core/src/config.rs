//! Environment-driven configuration.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `CRASHSYM_SYSROOT` | directory device paths are resolved under |
//! | `CRASHSYM_SHARED_CACHE` | dyld shared cache file |
//! | `CRASHSYM_PROGRESS_STEP` | report progress every N frames (`0` = off) |
//! | `CRASHSYM_SYSTEM_PREFIXES` | comma-separated non-blamable path prefixes |
//! | `CRASHSYM_WIDEN_EXCEPTIONS` | comma-separated exception patterns that widen blame |
//!
//! Command-line flags override these values.

use std::env;
use std::path::PathBuf;

use crate::blame::BlamePolicy;
use crate::error::{CrashsymError, Result};

pub const SYSROOT_ENV: &str = "CRASHSYM_SYSROOT";
pub const SHARED_CACHE_ENV: &str = "CRASHSYM_SHARED_CACHE";
pub const PROGRESS_STEP_ENV: &str = "CRASHSYM_PROGRESS_STEP";
pub const SYSTEM_PREFIXES_ENV: &str = "CRASHSYM_SYSTEM_PREFIXES";
pub const WIDEN_EXCEPTIONS_ENV: &str = "CRASHSYM_WIDEN_EXCEPTIONS";

/// Settings for building a [`crate::symbolicate::Symbolicator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicatorConfig
{
    pub sysroot: Option<PathBuf>,
    pub shared_cache: Option<PathBuf>,
    pub progress_stepping: usize,
    pub blame: BlamePolicy,
}

impl SymbolicatorConfig
{
    /// Read the configuration from the process environment.
    ///
    /// ## Errors
    ///
    /// Returns [`CrashsymError::InvalidArgument`] if `CRASHSYM_PROGRESS_STEP`
    /// is not a number.
    pub fn from_env() -> Result<Self>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    ///
    /// Empty values are treated as unset.
    ///
    /// ## Errors
    ///
    /// Returns [`CrashsymError::InvalidArgument`] if the progress step is not
    /// a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let progress_stepping = match get(PROGRESS_STEP_ENV) {
            Some(value) => value.trim().parse().map_err(|_| {
                CrashsymError::InvalidArgument(format!("{PROGRESS_STEP_ENV} must be a number, got {value:?}"))
            })?,
            None => 0,
        };

        let mut blame = BlamePolicy::default();
        if let Some(prefixes) = get(SYSTEM_PREFIXES_ENV) {
            blame.system_prefixes = split_list(&prefixes);
        }
        if let Some(patterns) = get(WIDEN_EXCEPTIONS_ENV) {
            blame.widening_exceptions = split_list(&patterns);
        }

        Ok(Self {
            sysroot: get(SYSROOT_ENV).map(PathBuf::from),
            shared_cache: get(SHARED_CACHE_ENV).map(PathBuf::from),
            progress_stepping,
            blame,
        })
    }
}

fn split_list(value: &str) -> Vec<String>
{
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<SymbolicatorConfig>
    {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        SymbolicatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults()
    {
        let config = config(&[]).unwrap();
        assert_eq!(config, SymbolicatorConfig::default());
        assert_eq!(config.progress_stepping, 0);
    }

    #[test]
    fn test_reads_paths_and_step()
    {
        let config = config(&[
            (SYSROOT_ENV, "/Volumes/DeviceSupport/17.0"),
            (SHARED_CACHE_ENV, "/tmp/dyld_shared_cache_arm64e"),
            (PROGRESS_STEP_ENV, " 25 "),
        ])
        .unwrap();
        assert_eq!(config.sysroot, Some(PathBuf::from("/Volumes/DeviceSupport/17.0")));
        assert_eq!(config.shared_cache, Some(PathBuf::from("/tmp/dyld_shared_cache_arm64e")));
        assert_eq!(config.progress_stepping, 25);
    }

    #[test]
    fn test_blame_lists()
    {
        let config = config(&[
            (SYSTEM_PREFIXES_ENV, "/System/, /opt/vendor/ ,"),
            (WIDEN_EXCEPTIONS_ENV, "SIGABRT"),
        ])
        .unwrap();
        assert_eq!(config.blame.system_prefixes, vec!["/System/", "/opt/vendor/"]);
        assert_eq!(config.blame.widening_exceptions, vec!["SIGABRT"]);
    }

    #[test]
    fn test_empty_values_are_unset()
    {
        let config = config(&[(SYSROOT_ENV, ""), (PROGRESS_STEP_ENV, "  ")]).unwrap();
        assert_eq!(config.sysroot, None);
        assert_eq!(config.progress_stepping, 0);
    }

    #[test]
    fn test_bad_progress_step()
    {
        assert!(matches!(
            config(&[(PROGRESS_STEP_ENV, "often")]),
            Err(CrashsymError::InvalidArgument(_))
        ));
    }
}
