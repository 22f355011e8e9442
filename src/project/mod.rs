pub mod build;
pub mod manifest;
pub mod scaffold;

pub use build::{build_site, site_cache, BuildError, BuildReport};
pub use manifest::{ConfigError, SiteConfig, SiteLayout, CONFIG_FILE};
