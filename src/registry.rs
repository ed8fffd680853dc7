use std::collections::HashMap;
use tracing::debug;

/// Static tag-to-route lookup table. Readings whose tag is not present here
/// are dropped at ingestion.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    routes: HashMap<String, String>,
}

impl RouteRegistry {
    pub fn new(routes: HashMap<String, String>) -> Self {
        debug!("Route registry loaded with {} tags", routes.len());
        Self { routes }
    }

    /// Look up the display route for a tag id.
    pub fn lookup(&self, tag_id: &str) -> Option<&str> {
        self.routes.get(tag_id).map(String::as_str)
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.routes.contains_key(tag_id)
    }

    /// Tag ids in the registry, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RouteRegistry {
        let mut map = HashMap::new();
        map.insert(
            "E280-11AC-0001".to_string(),
            "Route 402 - Northgate".to_string(),
        );
        map.insert(
            "E280-11AC-0002".to_string(),
            "Route 105 - University District".to_string(),
        );
        RouteRegistry::new(map)
    }

    #[test]
    fn test_lookup_known_tag() {
        let registry = sample();
        assert_eq!(
            registry.lookup("E280-11AC-0001"),
            Some("Route 402 - Northgate")
        );
    }

    #[test]
    fn test_lookup_unknown_tag() {
        let registry = sample();
        assert_eq!(registry.lookup("DEAD-BEEF"), None);
        assert!(!registry.contains("DEAD-BEEF"));
    }
}
