//! Route matching (spec.md §4.6, C6).
//!
//! Routes are evaluated in definition order; the first match wins for
//! `final` routes, but non-final matches keep falling through so an event
//! can land in more than one pipeline/destination set. Exactly one route
//! is the default (resolved by name `"default"`, ties broken by definition
//! order — see DESIGN.md Open Question resolution).

use crate::filter_cache::FilterCache;
use crate::model::Route;

const DEFAULT_ROUTE_NAME: &str = "default";

/// Routes matched for one event, in evaluation order.
pub fn matching_routes<'a>(routes: &'a [Route], raw: &str, filter_cache: &FilterCache) -> Vec<&'a Route> {
    let mut ordered: Vec<&Route> = routes.iter().collect();
    ordered.sort_by_key(|r| r.order);

    let mut matched = Vec::new();
    for route in ordered {
        if filter_cache.matches(&route.filter, raw) {
            matched.push(route);
            if route.is_final {
                break;
            }
        }
    }
    matched
}

/// The route that owns fallthrough for events no other route claimed,
/// resolved once at config-load time and cached by the caller.
pub fn resolve_default_route(routes: &[Route]) -> Option<&Route> {
    routes
        .iter()
        .filter(|r| r.name == DEFAULT_ROUTE_NAME)
        .min_by_key(|r| r.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DestinationId, PipelineId, RouteId};

    fn route(name: &str, filter: &str, is_final: bool, order: u32) -> Route {
        Route {
            id: RouteId::new(),
            name: name.to_string(),
            filter: filter.to_string(),
            pipeline_id: PipelineId::new(),
            destination_ids: vec![DestinationId::new()],
            is_final,
            order,
        }
    }

    #[test]
    fn final_route_stops_further_matching() {
        let cache = FilterCache::new();
        let routes = vec![
            route("a", "true", true, 0),
            route("b", "true", false, 1),
        ];
        let matched = matching_routes(&routes, "anything", &cache);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "a");
    }

    #[test]
    fn non_final_routes_all_match() {
        let cache = FilterCache::new();
        let routes = vec![
            route("a", "true", false, 0),
            route("b", "true", false, 1),
        ];
        let matched = matching_routes(&routes, "anything", &cache);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn default_route_resolved_by_name_with_order_tiebreak() {
        let routes = vec![
            route("default", "true", false, 5),
            route("default", "true", false, 1),
            route("other", "true", false, 0),
        ];
        let default = resolve_default_route(&routes).unwrap();
        assert_eq!(default.order, 1);
    }

    #[test]
    fn no_default_route_is_none() {
        let routes = vec![route("custom", "true", false, 0)];
        assert!(resolve_default_route(&routes).is_none());
    }

    #[test]
    fn unmatched_event_yields_empty_match_set() {
        let cache = FilterCache::new();
        let routes = vec![route("a", "^ERROR", false, 0)];
        let matched = matching_routes(&routes, "INFO: fine", &cache);
        assert!(matched.is_empty());
    }
}
