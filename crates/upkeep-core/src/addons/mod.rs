//! Bundled addons.
//!
//! Each addon is a self-contained feature reacting to lifecycle events; the
//! orchestrator only sees them through [`crate::events::Addon`].

mod allow_plugins;
mod coding_style;
mod deprecations;
mod normalize;
mod translations;

pub use allow_plugins::AllowPlugins;
pub use coding_style::CodingStyle;
pub use deprecations::DeprecationRemover;
pub use normalize::Normalizer;
pub use translations::Translations;

use std::sync::Arc;

use crate::config::Config;
use crate::events::Addon;
use crate::orchestrator::Services;

/// The addon set for a run, in registration order.
pub fn default_addons(config: &Config, services: &Services) -> Vec<Box<dyn Addon>> {
    let mut addons: Vec<Box<dyn Addon>> = vec![
        Box::new(Normalizer::new(Arc::clone(&services.packages))),
        Box::new(AllowPlugins::new(Arc::clone(&services.packages))),
    ];
    if !config.skip_style_fix {
        addons.push(Box::new(CodingStyle::new(
            Arc::clone(&services.packages),
            Arc::clone(&services.style),
        )));
    }
    if !config.skip_deprecation_removal {
        addons.push(Box::new(DeprecationRemover::new(
            Arc::clone(&services.packages),
            Arc::clone(&services.rewriter),
        )));
    }
    addons.push(Box::new(Translations::new(Arc::clone(&services.sites))));
    addons
}
