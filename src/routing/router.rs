//! Route-class lookup.
//!
//! # Responsibilities
//! - Compile route-class configs into resolved policies
//! - Map a request path to exactly one policy
//!
//! # Design Decisions
//! - Immutable after construction (shared via Arc without locks)
//! - Longest matching prefix wins; ties keep configuration order
//! - `general` is the fallback when nothing matches

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::schema::{
    HeaderSettings, RateLimitRule, RouteClass, RouteClassConfig, SanitizationSettings, XssSettings,
};
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

/// Security policy resolved for one route class.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub class: RouteClass,
    pub csrf_enabled: bool,
    pub rate_limit: RateLimitRule,
    pub xss: XssSettings,
    pub sanitization: SanitizationSettings,
    pub headers: HeaderSettings,
}

impl From<&RouteClassConfig> for SecurityPolicy {
    fn from(config: &RouteClassConfig) -> Self {
        Self {
            class: config.class,
            csrf_enabled: config.csrf_enabled,
            rate_limit: config.rate_limit.resolve(),
            xss: config.xss.clone(),
            sanitization: config.sanitization.clone(),
            headers: config.headers.clone(),
        }
    }
}

#[derive(Debug)]
struct CompiledRoute {
    matcher: PathPrefixMatcher,
    policy: Arc<SecurityPolicy>,
}

/// Resolves request paths to route-class policies.
#[derive(Debug)]
pub struct RouteClassifier {
    routes: Vec<CompiledRoute>,
    fallback: Arc<SecurityPolicy>,
}

impl RouteClassifier {
    /// Build from configuration. Missing `general` gets the built-in default.
    pub fn from_config(configs: &[RouteClassConfig]) -> Self {
        let mut policies: HashMap<RouteClass, Arc<SecurityPolicy>> = HashMap::new();
        let mut routes = Vec::new();

        for config in configs {
            let policy = policies
                .entry(config.class)
                .or_insert_with(|| Arc::new(SecurityPolicy::from(config)))
                .clone();
            for prefix in &config.path_prefixes {
                routes.push(CompiledRoute {
                    matcher: PathPrefixMatcher::new(prefix.clone()),
                    policy: policy.clone(),
                });
            }
        }

        // Stable sort keeps configuration order between equal-length prefixes.
        routes.sort_by(|a, b| b.matcher.prefix().len().cmp(&a.matcher.prefix().len()));

        let fallback = policies
            .get(&RouteClass::General)
            .cloned()
            .unwrap_or_else(|| {
                let general = RouteClassConfig::defaults_for(RouteClass::General);
                Arc::new(SecurityPolicy::from(&general))
            });

        Self { routes, fallback }
    }

    /// Policy for a request path.
    pub fn classify(&self, path: &str) -> Arc<SecurityPolicy> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches_path(path))
            .map(|route| route.policy.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// One policy per configured class, for the admin API.
    pub fn policies(&self) -> Vec<Arc<SecurityPolicy>> {
        let mut seen: Vec<Arc<SecurityPolicy>> = Vec::new();
        for route in &self.routes {
            if !seen.iter().any(|p| p.class == route.policy.class) {
                seen.push(route.policy.clone());
            }
        }
        if !seen.iter().any(|p| p.class == self.fallback.class) {
            seen.push(self.fallback.clone());
        }
        seen
    }
}
