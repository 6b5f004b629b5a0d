//! Auxiliary Input Generation
//!
//! Files a site run needs in place before its first stage starts.
//!
//! - [`ruptures`]: Rupture descriptor trees generated from the registry
//! - [`site_cfg`]: Per-run `cybershake.cfg` and `config.py`

pub mod ruptures;
pub mod site_cfg;

pub use ruptures::RuptureGenerator;
pub use site_cfg::write_site_cfg;
